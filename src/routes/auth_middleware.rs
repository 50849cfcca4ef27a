use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::{debug, error};

use crate::routes::AppState;
use crate::services::auth_service::{get_auth_token, resolve_identity};

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Get the auth token from the request
    let token = match get_auth_token(&req) {
        Ok(token) => token,
        Err(e) => {
            debug!("Rejecting unauthenticated request: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // 2. Validate the token
    let Some(secret) = state.config.auth_jwt_secret.as_deref() else {
        error!("Auth JWT secret not configured");
        return Err(StatusCode::UNAUTHORIZED);
    };
    let identity = match resolve_identity(&token, secret) {
        Ok(identity) => identity,
        Err(e) => {
            error!("JWT validation failed: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // 3. Hand the caller to downstream handlers
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
