use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::auth::auth;
use crate::broker::{document_topic, presence_topic};
use crate::models::{
    ActiveUsersResponse, CursorUpdateRequest, CursorUpdateResponse, ErrorResponse, JoinSessionResponse,
    LeaveSessionResponse,
};
use crate::routes::AppState;
use crate::services::auth_service::CallerIdentity;

/// Join the collaboration session of a document
pub async fn session_join(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(document_id): Path<String>,
) -> Result<(StatusCode, Json<JoinSessionResponse>), (StatusCode, Json<ErrorResponse>)> {
    auth::ensure_document_reader(state.store.as_ref(), &document_id, &caller.user_id).await?;

    let active_users = state
        .collab
        .join_session(&document_id, &caller.user_id, &caller.username)
        .await;
    info!(
        "User {} joined document {} ({} present)",
        caller.user_id,
        document_id,
        active_users.len()
    );

    Ok((
        StatusCode::OK,
        Json(JoinSessionResponse {
            change_topic: document_topic(&document_id),
            presence_topic: presence_topic(&document_id),
            session_id: document_id,
            active_users,
        }),
    ))
}

/// Leave the session. Always succeeds, even if the caller was not present.
pub async fn session_leave(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(document_id): Path<String>,
) -> Result<(StatusCode, Json<LeaveSessionResponse>), (StatusCode, Json<ErrorResponse>)> {
    auth::parse_document_id(&document_id)?;

    state.collab.leave_session(&document_id, &caller.user_id).await;
    info!("User {} left document {}", caller.user_id, document_id);

    Ok((StatusCode::OK, Json(LeaveSessionResponse { success: true })))
}

pub async fn session_users(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(document_id): Path<String>,
) -> Result<(StatusCode, Json<ActiveUsersResponse>), (StatusCode, Json<ErrorResponse>)> {
    auth::ensure_document_reader(state.store.as_ref(), &document_id, &caller.user_id).await?;

    let users = state.collab.get_active_users(&document_id);
    Ok((StatusCode::OK, Json(ActiveUsersResponse { users })))
}

/// Cursor move / heartbeat
pub async fn session_cursor(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(document_id): Path<String>,
    Json(request): Json<CursorUpdateRequest>,
) -> Result<(StatusCode, Json<CursorUpdateResponse>), (StatusCode, Json<ErrorResponse>)> {
    auth::ensure_document_reader(state.store.as_ref(), &document_id, &caller.user_id).await?;

    state
        .collab
        .update_user_activity(&document_id, &caller.user_id, &request.cursor_position)
        .await;

    Ok((StatusCode::OK, Json(CursorUpdateResponse { success: true })))
}
