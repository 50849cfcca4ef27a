use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use crate::models::{DocumentChange, Operation};

/// Request payload for submitting edits against a base version
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SyncDocumentRequest {
    pub operations: Vec<Operation>,
    pub base_version: String,
}

/// Result of a sync. `concurrent_changes` is only present when the base version was stale,
/// in which case `new_version` is the document's current version and nothing was applied.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SyncDocumentResponse {
    pub success: bool,
    pub new_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrent_changes: Option<Vec<DocumentChange>>,
}
