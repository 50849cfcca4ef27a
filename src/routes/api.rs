use crate::handlers::{
    diagnostics, doc_changes, doc_sync, health_check, ready_check, session_cursor, session_join,
    session_leave, session_users,
};
use crate::routes::{auth_middleware::auth_middleware, AppState};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

/// Create API routes
pub fn create_api_routes(state: AppState) -> Router {
    let authenticated = Router::<AppState>::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/documents/:document_id/session/join", post(session_join))
        .route("/v1/documents/:document_id/session/leave", post(session_leave))
        .route("/v1/documents/:document_id/session/users", get(session_users))
        .route("/v1/documents/:document_id/session/cursor", post(session_cursor))
        .route("/v1/documents/:document_id/changes", get(doc_changes))
        .route("/v1/documents/:document_id/sync", post(doc_sync))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)); // Applies to all routes added above

    Router::<AppState>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .merge(authenticated)
        .with_state(state)
}
