use axum::{http::StatusCode, Json};
use tracing::{error, warn};
use uuid::Uuid;

use crate::db::{DocumentRow, DocumentStore};
use crate::models::ErrorResponse;

pub fn parse_document_id(document_id: &str) -> Result<Uuid, (StatusCode, Json<ErrorResponse>)> {
    Uuid::parse_str(document_id).map_err(|e| {
        error!("Invalid document UUID '{}': {}", document_id, e);
        ErrorResponse::reply(
            StatusCode::BAD_REQUEST,
            format!("Invalid document UUID '{}'", document_id),
        )
    })
}

/// Read access check delegated to the document store. Missing documents are reported as
/// forbidden too, so callers can't probe for ids they may not see.
pub async fn ensure_document_reader(
    store: &dyn DocumentStore,
    document_id: &str,
    user_id: &str,
) -> Result<DocumentRow, (StatusCode, Json<ErrorResponse>)> {
    parse_document_id(document_id)?;

    match store.get_viewable_document(document_id, user_id).await {
        Ok(Some(document)) => Ok(document),
        Ok(None) => {
            warn!("User {} may not access document {}", user_id, document_id);
            Err(ErrorResponse::reply(
                StatusCode::FORBIDDEN,
                format!("Access to document '{}' denied", document_id),
            ))
        }
        Err(e) => {
            error!("Error checking access to document {}: {}", document_id, e);
            Err(ErrorResponse::reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to check document access",
            ))
        }
    }
}
