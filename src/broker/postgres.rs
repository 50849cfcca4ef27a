use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPool};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{Broker, BrokerError, MessageHandler};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Postgres rejects NOTIFY payloads of 8000 bytes or more; leave room for the envelope tag
const INLINE_LIMIT: usize = 7900;

/// Spilled payloads older than five minutes are assumed delivered
const PRUNE_SPILLED: &str =
    "DELETE FROM broker_payloads WHERE created_at < NOW() - INTERVAL '5 minutes'";

const INLINE_TAG: &str = "i:";
const SPILL_TAG: &str = "r:";

/// What actually travels in a notification: the payload itself, or the id of the
/// `broker_payloads` row holding it when it is too large to notify.
#[derive(Debug, PartialEq)]
enum Envelope<'a> {
    Inline(&'a str),
    Spilled(i64),
}

impl<'a> Envelope<'a> {
    fn parse(raw: &'a str) -> Option<Self> {
        if let Some(payload) = raw.strip_prefix(INLINE_TAG) {
            return Some(Envelope::Inline(payload));
        }
        raw.strip_prefix(SPILL_TAG)?.parse().ok().map(Envelope::Spilled)
    }

    fn encode(&self) -> String {
        match self {
            Envelope::Inline(payload) => format!("{}{}", INLINE_TAG, payload),
            Envelope::Spilled(id) => format!("{}{}", SPILL_TAG, id),
        }
    }
}

fn fits_inline(payload: &str) -> bool {
    payload.len() + INLINE_TAG.len() < INLINE_LIMIT
}

type Handlers = Arc<RwLock<HashMap<String, MessageHandler>>>;

enum ListenCommand {
    Listen(String, oneshot::Sender<Result<(), sqlx::Error>>),
    Unlisten(String, oneshot::Sender<Result<(), sqlx::Error>>),
}

/// Broker backed by PostgreSQL `LISTEN`/`NOTIFY`, so every node sharing the database sees
/// every change. Topics map one-to-one onto notification channels. Payloads too large for a
/// notification are written to `broker_payloads` and only the row id is notified.
pub struct PgBroker {
    pool: PgPool,
    handlers: Handlers,
    commands: mpsc::UnboundedSender<ListenCommand>,
}

impl PgBroker {
    /// Open a dedicated listener connection and spawn the task that owns it
    pub async fn connect(pool: PgPool) -> Result<Self, BrokerError> {
        ensure_spill_table(&pool).await?;
        let listener = PgListener::connect_with(&pool).await?;
        let handlers: Handlers = Arc::new(RwLock::new(HashMap::new()));
        let (commands, rx) = mpsc::unbounded_channel();

        tokio::spawn(run_listener(listener, pool.clone(), rx, handlers.clone()));
        info!("Connected to Postgres notification broker");

        Ok(Self {
            pool,
            handlers,
            commands,
        })
    }

    async fn send_command(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), sqlx::Error>>) -> ListenCommand,
    ) -> Result<(), BrokerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| BrokerError::ListenerGone)?;
        rx.await.map_err(|_| BrokerError::ListenerGone)??;
        Ok(())
    }

    async fn notify(&self, topic: &str, envelope: &Envelope<'_>) -> Result<(), BrokerError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(topic)
            .bind(envelope.encode())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn spill(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO broker_payloads (topic, payload) VALUES ($1, $2) RETURNING id",
        )
        .bind(topic)
        .bind(payload)
        .fetch_one(&mut *tx)
        .await?;
        // Delivered on commit, after the row is visible
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(topic)
            .bind(Envelope::Spilled(id).encode())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!("Spilled {} byte payload on {} to row {}", payload.len(), topic, id);

        let pruned = sqlx::query(PRUNE_SPILLED).execute(&self.pool).await;
        if let Err(e) = pruned {
            warn!("Error pruning spilled broker payloads: {}", e);
        }
        Ok(())
    }
}

async fn ensure_spill_table(pool: &PgPool) -> Result<(), BrokerError> {
    let mut tx = pool.begin().await?;
    // Nodes starting together would otherwise race on the catalog
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext('broker_payloads'))")
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS broker_payloads (
            id BIGSERIAL PRIMARY KEY,
            topic TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

async fn load_spilled(pool: &PgPool, id: i64) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT payload FROM broker_payloads WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

async fn run_listener(
    mut listener: PgListener,
    pool: PgPool,
    mut commands: mpsc::UnboundedReceiver<ListenCommand>,
    handlers: Handlers,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ListenCommand::Listen(channel, reply)) => {
                    let _ = reply.send(listener.listen(&channel).await);
                }
                Some(ListenCommand::Unlisten(channel, reply)) => {
                    let _ = reply.send(listener.unlisten(&channel).await);
                }
                None => {
                    info!("Notification broker shut down");
                    return;
                }
            },
            notification = listener.recv() => match notification {
                Ok(notification) => {
                    let handler = handlers
                        .read()
                        .unwrap_or_else(|e| e.into_inner())
                        .get(notification.channel())
                        .cloned();
                    let Some(handler) = handler else {
                        debug!("Dropping notification on unhandled channel {}", notification.channel());
                        continue;
                    };
                    match Envelope::parse(notification.payload()) {
                        Some(Envelope::Inline(payload)) => handler(payload.as_bytes()),
                        // Fetched in line so deliveries keep their order
                        Some(Envelope::Spilled(id)) => match load_spilled(&pool, id).await {
                            Ok(Some(payload)) => handler(payload.as_bytes()),
                            Ok(None) => warn!("Spilled payload {} on {} is gone", id, notification.channel()),
                            Err(e) => error!("Error loading spilled payload {}: {}", id, e),
                        },
                        None => warn!("Dropping malformed notification on {}", notification.channel()),
                    }
                }
                Err(e) => {
                    // PgListener reconnects and re-issues LISTEN on the next recv
                    error!("Lost connection to notification broker: {}", e);
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            },
        }
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BrokerError> {
        let replaced = self
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic.to_string(), handler)
            .is_some();
        if replaced {
            warn!("Replacing existing handler for topic {}", topic);
            return Ok(());
        }

        let channel = topic.to_string();
        if let Err(e) = self.send_command(|reply| ListenCommand::Listen(channel, reply)).await {
            self.handlers
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(topic);
            return Err(e);
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(topic);
        let channel = topic.to_string();
        self.send_command(|reply| ListenCommand::Unlisten(channel, reply))
            .await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let payload = String::from_utf8(payload).map_err(|_| BrokerError::InvalidPayload)?;
        if fits_inline(&payload) {
            self.notify(topic, &Envelope::Inline(&payload)).await
        } else {
            self.spill(topic, &payload).await
        }
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
