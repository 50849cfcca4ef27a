use colabri_sync::broker::{Broker, MemoryBroker, PgBroker};
use colabri_sync::build_app;
use colabri_sync::collab::CollabService;
use colabri_sync::config::{BrokerKind, Config};
use colabri_sync::db::{DocumentStore, MemoryDocumentStore, PgDocumentStore};
use colabri_sync::routes::AppState;
use sqlx::PgPool;
use std::panic;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "colabri_sync=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    if config.auth_jwt_secret.is_none() {
        warn!("No AUTH_JWT_SECRET configured - every authenticated request will be rejected");
    }

    // Document store
    let mut pool: Option<PgPool> = None;
    let store: Arc<dyn DocumentStore> = match &config.db_url {
        Some(db_url) => match PgDocumentStore::connect(db_url, config.db_max_connections).await {
            Ok(store) => {
                info!("Database initialized successfully");
                pool = Some(store.pool().clone());
                Arc::new(store)
            }
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                warn!("Falling back to the in-memory document store");
                Arc::new(MemoryDocumentStore::new())
            }
        },
        None => {
            warn!("No database URL configured - using the in-memory document store");
            Arc::new(MemoryDocumentStore::new())
        }
    };

    // Message broker
    let broker_kind = config.broker_kind().unwrap_or_else(|e| {
        error!("{}", e);
        BrokerKind::Memory
    });
    let broker: Arc<dyn Broker> = match (broker_kind, pool) {
        (BrokerKind::Postgres, Some(pool)) => match PgBroker::connect(pool).await {
            Ok(broker) => Arc::new(broker),
            Err(e) => {
                error!("Failed to start the Postgres broker: {}", e);
                warn!("Change notifications will only reach clients of this node");
                Arc::new(MemoryBroker::new())
            }
        },
        (BrokerKind::Postgres, None) => {
            warn!("Postgres broker requested without a database - using the in-memory broker");
            Arc::new(MemoryBroker::new())
        }
        (BrokerKind::Memory, _) => Arc::new(MemoryBroker::new()),
    };
    info!("Using {} document store and {} broker", store.name(), broker.name());

    let collab = Arc::new(CollabService::new(store.clone(), broker, config.subscription_capacity));
    let state = AppState {
        collab: collab.clone(),
        store,
        config: Arc::new(config.clone()),
    };
    let app_routes = build_app(state);

    // Start the HTTP/API server
    let listener = match tokio::net::TcpListener::bind(config.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.server_address(), e);
            std::process::exit(1);
        }
    };

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    let shutdown_collab = collab.clone();
    let served = axum::serve(listener, app_routes)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_collab.shutdown();
        })
        .await;
    if let Err(e) = served {
        error!("Server error: {}", e);
    }
    info!("Server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
