use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info};

use crate::auth::auth;
use crate::collab::sync::{SyncError, SyncOutcome};
use crate::models::{ErrorResponse, SyncDocumentRequest, SyncDocumentResponse};
use crate::routes::AppState;
use crate::services::auth_service::CallerIdentity;

/// Submit edits against a base version. A stale base is answered with the changes the
/// caller missed instead of an error.
pub async fn doc_sync(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(document_id): Path<String>,
    Json(request): Json<SyncDocumentRequest>,
) -> Result<(StatusCode, Json<SyncDocumentResponse>), (StatusCode, Json<ErrorResponse>)> {
    auth::ensure_document_reader(state.store.as_ref(), &document_id, &caller.user_id).await?;

    let n_operations = request.operations.len();
    let outcome = state
        .collab
        .sync_document(&document_id, &caller.user_id, request.operations, &request.base_version)
        .await;

    match outcome {
        Ok(SyncOutcome::Applied { new_version, .. }) => {
            info!(
                "Applied {} operations from {} to document {} at version {}",
                n_operations, caller.user_id, document_id, new_version
            );
            Ok((
                StatusCode::OK,
                Json(SyncDocumentResponse {
                    success: true,
                    new_version,
                    concurrent_changes: None,
                }),
            ))
        }
        Ok(SyncOutcome::Conflict {
            current_version,
            concurrent_changes,
        }) => Ok((
            StatusCode::OK,
            Json(SyncDocumentResponse {
                success: true,
                new_version: current_version,
                concurrent_changes: Some(concurrent_changes),
            }),
        )),
        Err(SyncError::NotFound(id)) => Err(ErrorResponse::reply(
            StatusCode::NOT_FOUND,
            format!("Document '{}' not found", id),
        )),
        Err(e) => {
            error!("Failed to sync document {}: {}", document_id, e);
            Err(ErrorResponse::reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to sync document",
            ))
        }
    }
}
