use axum::{extract::State, http::StatusCode, Json};
use tracing::{debug, error};

use crate::models::{HealthResponse, ReadyResponse};
use crate::routes::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        service: state.config.service_name.clone(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint. Not ready while the document store is unreachable.
pub async fn ready_check(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    debug!("Readiness check requested");
    let (status_code, status) = match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            error!("Document store {} is not reachable: {}", state.store.name(), e);
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };
    (
        status_code,
        Json(ReadyResponse {
            status: status.to_string(),
            store: state.store.name().to_string(),
            broker: state.collab.broker_name().to_string(),
        }),
    )
}
