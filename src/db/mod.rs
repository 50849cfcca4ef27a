pub mod dbsync;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::DocumentChange;

pub use dbsync::PgDocumentStore;
pub use memory::MemoryDocumentStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document {0} not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("error decoding stored change: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("version of document {0} moved during commit")]
    LostUpdate(String),
    #[error("user id {0} is not a UUID")]
    InvalidUserId(String),
}

/// Document metadata visible to a user with read access
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentRow {
    pub id: uuid::Uuid,
    pub title: String,
    pub owner_id: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed,
    /// The base version was stale. Nothing was written.
    Conflict {
        current_version: String,
        changes: Vec<DocumentChange>,
    },
}

/// The document persistence collaborator. Owns permissions, the current-version pointer and
/// the append-only version history.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    /// `None` when the document does not exist or the user may not read it
    async fn get_viewable_document(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> Result<Option<DocumentRow>, StoreError>;

    async fn current_version(&self, document_id: &str) -> Result<Option<String>, StoreError>;

    /// Atomically compare the document's current version against `base_version` and, on a
    /// match, append `change` to the history and move the version pointer to
    /// `change.version`. On a mismatch return every history entry created after
    /// `base_version`, oldest first.
    async fn commit_change(
        &self,
        change: &DocumentChange,
        base_version: &str,
    ) -> Result<CommitOutcome, StoreError>;

    fn name(&self) -> &'static str;
}
