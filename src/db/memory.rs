use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{CommitOutcome, DocumentRow, DocumentStore, StoreError};
use crate::models::DocumentChange;

struct StoredDocument {
    row: DocumentRow,
    readers: HashSet<String>,
    history: Vec<DocumentChange>,
}

/// In-process document store for development and tests. A single mutex spans the whole
/// read-compare-write, which gives the same guarantee as the Postgres row lock.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, StoredDocument>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document owned (and readable) by `owner_id` at `version`
    pub fn insert_document(&self, document_id: uuid::Uuid, title: &str, owner_id: &str, version: &str) {
        let now = Utc::now();
        let row = DocumentRow {
            id: document_id,
            title: title.to_string(),
            owner_id: owner_id.to_string(),
            version: version.to_string(),
            created_at: now,
            updated_at: now,
        };
        let mut readers = HashSet::new();
        readers.insert(owner_id.to_string());
        self.lock().insert(
            document_id.to_string(),
            StoredDocument {
                row,
                readers,
                history: Vec::new(),
            },
        );
    }

    pub fn grant(&self, document_id: &str, user_id: &str) -> bool {
        match self.lock().get_mut(document_id) {
            Some(doc) => {
                doc.readers.insert(user_id.to_string());
                true
            }
            None => false,
        }
    }

    pub fn history(&self, document_id: &str) -> Vec<DocumentChange> {
        self.lock()
            .get(document_id)
            .map(|doc| doc.history.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredDocument>> {
        self.documents.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_viewable_document(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> Result<Option<DocumentRow>, StoreError> {
        Ok(self
            .lock()
            .get(document_id)
            .filter(|doc| doc.readers.contains(user_id))
            .map(|doc| doc.row.clone()))
    }

    async fn current_version(&self, document_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(document_id).map(|doc| doc.row.version.clone()))
    }

    async fn commit_change(
        &self,
        change: &DocumentChange,
        base_version: &str,
    ) -> Result<CommitOutcome, StoreError> {
        let mut documents = self.lock();
        let doc = documents
            .get_mut(&change.document_id)
            .ok_or_else(|| StoreError::NotFound(change.document_id.clone()))?;

        if doc.row.version != base_version {
            let start = doc
                .history
                .iter()
                .rposition(|c| c.version == base_version)
                .map_or(0, |i| i + 1);
            return Ok(CommitOutcome::Conflict {
                current_version: doc.row.version.clone(),
                changes: doc.history[start..].to_vec(),
            });
        }

        doc.history.push(change.clone());
        doc.row.version = change.version.clone();
        doc.row.updated_at = Utc::now();
        Ok(CommitOutcome::Committed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Operation;

    fn change(document_id: &str, version: &str) -> DocumentChange {
        DocumentChange {
            document_id: document_id.to_string(),
            user_id: "u1".to_string(),
            version: version.to_string(),
            operations: vec![Operation::insert(0, "x")],
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn read_access_follows_grants() {
        let store = MemoryDocumentStore::new();
        let id = uuid::Uuid::new_v4();
        store.insert_document(id, "notes", "owner", "1");

        assert!(store.get_viewable_document(&id.to_string(), "owner").await.unwrap().is_some());
        assert!(store.get_viewable_document(&id.to_string(), "guest").await.unwrap().is_none());
        assert!(store.grant(&id.to_string(), "guest"));
        assert!(store.get_viewable_document(&id.to_string(), "guest").await.unwrap().is_some());
        assert!(!store.grant("missing", "guest"));
    }

    #[tokio::test]
    async fn conflict_returns_history_after_base() {
        let store = MemoryDocumentStore::new();
        let id = uuid::Uuid::new_v4();
        let doc = id.to_string();
        store.insert_document(id, "notes", "owner", "1");

        assert_eq!(store.commit_change(&change(&doc, "2"), "1").await.unwrap(), CommitOutcome::Committed);
        assert_eq!(store.commit_change(&change(&doc, "3"), "2").await.unwrap(), CommitOutcome::Committed);

        match store.commit_change(&change(&doc, "x"), "2").await.unwrap() {
            CommitOutcome::Conflict { current_version, changes } => {
                assert_eq!(current_version, "3");
                let versions: Vec<_> = changes.iter().map(|c| c.version.as_str()).collect();
                assert_eq!(versions, vec!["3"]);
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        // The initial version never appears in the history, so everything is returned
        match store.commit_change(&change(&doc, "y"), "1").await.unwrap() {
            CommitOutcome::Conflict { changes, .. } => assert_eq!(changes.len(), 2),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(store.current_version(&doc).await.unwrap().as_deref(), Some("3"));
        assert_eq!(store.history(&doc).len(), 2);
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let store = MemoryDocumentStore::new();
        let err = store.commit_change(&change("nope", "2"), "1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "nope"));
    }
}
