use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use crate::broker::{document_topic, BrokerBridge};
use crate::db::{CommitOutcome, DocumentStore, StoreError};
use crate::models::{DocumentChange, Operation};

/// Issues version stamps as `max(wall clock nanos, previous + 1)`, so stamps stay unique and
/// strictly increasing within the process even if the wall clock steps backwards.
#[derive(Debug, Default)]
pub struct VersionClock {
    last: AtomicU64,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let now = Utc::now()
            .timestamp_nanos_opt()
            .map_or(0, |nanos| nanos.max(0) as u64);
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn next_version(&self) -> String {
        self.next().to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Applied {
        new_version: String,
        change: DocumentChange,
    },
    /// Someone else committed first. The caller's operations were not applied.
    Conflict {
        current_version: String,
        concurrent_changes: Vec<DocumentChange>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("document {0} not found")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => SyncError::NotFound(id),
            other => SyncError::Storage(other),
        }
    }
}

/// Optimistic-concurrency reconciliation of edit batches against the document store
pub struct DocumentSync {
    store: Arc<dyn DocumentStore>,
    bridge: Arc<BrokerBridge>,
    clock: VersionClock,
}

impl DocumentSync {
    pub fn new(store: Arc<dyn DocumentStore>, bridge: Arc<BrokerBridge>) -> Self {
        Self {
            store,
            bridge,
            clock: VersionClock::new(),
        }
    }

    /// Commit `operations` if `base_version` is still the document's current version,
    /// otherwise hand back the history the caller has not seen yet. The broadcast after a
    /// commit is best-effort: the change is already durable.
    pub async fn sync_document(
        &self,
        document_id: &str,
        user_id: &str,
        operations: Vec<Operation>,
        base_version: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let change = DocumentChange {
            document_id: document_id.to_string(),
            user_id: user_id.to_string(),
            version: self.clock.next_version(),
            operations,
            timestamp: Utc::now(),
        };

        match self.store.commit_change(&change, base_version).await? {
            CommitOutcome::Conflict {
                current_version,
                changes,
            } => {
                info!(
                    "Version conflict on document {}: base {} but current {} ({} newer changes)",
                    document_id,
                    base_version,
                    current_version,
                    changes.len()
                );
                Ok(SyncOutcome::Conflict {
                    current_version,
                    concurrent_changes: changes,
                })
            }
            CommitOutcome::Committed => {
                if let Err(e) = self.bridge.publish(&document_topic(document_id), &change).await {
                    error!("Error broadcasting change {} of document {}: {}", change.version, document_id, e);
                }
                Ok(SyncOutcome::Applied {
                    new_version: change.version.clone(),
                    change,
                })
            }
        }
    }

    pub async fn current_version(&self, document_id: &str) -> Result<Option<String>, SyncError> {
        Ok(self.store.current_version(document_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::collab::multiplexer::{ChangeMultiplexer, DEFAULT_QUEUE_CAPACITY};
    use crate::db::MemoryDocumentStore;

    fn setup() -> (Arc<MemoryDocumentStore>, Arc<BrokerBridge>, Arc<DocumentSync>, String) {
        let store = Arc::new(MemoryDocumentStore::new());
        let id = uuid::Uuid::new_v4();
        store.insert_document(id, "draft", "alice", "100");
        let bridge = Arc::new(BrokerBridge::new(Arc::new(MemoryBroker::new())));
        let sync = Arc::new(DocumentSync::new(store.clone(), bridge.clone()));
        (store, bridge, sync, id.to_string())
    }

    #[test]
    fn clock_is_strictly_increasing() {
        let clock = VersionClock::new();
        let mut prev = clock.next();
        for _ in 0..1000 {
            let next = clock.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[tokio::test]
    async fn matching_base_commits_new_version() {
        let (store, _, sync, doc) = setup();
        let outcome = sync
            .sync_document(&doc, "alice", vec![Operation::insert(0, "hi")], "100")
            .await
            .unwrap();

        let SyncOutcome::Applied { new_version, change } = outcome else {
            panic!("expected the change to apply");
        };
        assert_ne!(new_version, "100");
        assert_eq!(change.user_id, "alice");
        assert_eq!(store.current_version(&doc).await.unwrap(), Some(new_version));
    }

    #[tokio::test]
    async fn concurrent_syncs_on_same_base_conflict() {
        let (store, _, sync, doc) = setup();
        let (a, b) = tokio::join!(
            sync.sync_document(&doc, "alice", vec![Operation::insert(0, "a")], "100"),
            sync.sync_document(&doc, "bob", vec![Operation::insert(0, "b")], "100"),
        );
        let outcomes = [a.unwrap(), b.unwrap()];

        let winner = outcomes
            .iter()
            .find_map(|o| match o {
                SyncOutcome::Applied { change, .. } => Some(change.clone()),
                _ => None,
            })
            .expect("one sync applies");
        let (current_version, concurrent_changes) = outcomes
            .iter()
            .find_map(|o| match o {
                SyncOutcome::Conflict { current_version, concurrent_changes } => {
                    Some((current_version.clone(), concurrent_changes.clone()))
                }
                _ => None,
            })
            .expect("one sync conflicts");

        assert_ne!(current_version, "100");
        assert_eq!(current_version, winner.version);
        assert_eq!(concurrent_changes, vec![winner.clone()]);
        // The loser's operations were never persisted
        assert_eq!(store.history(&doc), vec![winner]);
    }

    #[tokio::test]
    async fn conflict_lists_changes_oldest_first() {
        let (_, _, sync, doc) = setup();
        let mut base = "100".to_string();
        let mut versions = Vec::new();
        for n in 0..3 {
            let SyncOutcome::Applied { new_version, .. } = sync
                .sync_document(&doc, "alice", vec![Operation::insert(n, "x")], &base)
                .await
                .unwrap()
            else {
                panic!("expected apply");
            };
            versions.push(new_version.clone());
            base = new_version;
        }

        let SyncOutcome::Conflict { concurrent_changes, .. } = sync
            .sync_document(&doc, "bob", vec![Operation::delete(0, 1)], &versions[0])
            .await
            .unwrap()
        else {
            panic!("expected conflict");
        };
        let got: Vec<_> = concurrent_changes.into_iter().map(|c| c.version).collect();
        assert_eq!(got, versions[1..].to_vec());
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let (_, _, sync, _) = setup();
        let err = sync
            .sync_document("missing", "alice", vec![], "1")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn applied_change_reaches_every_subscription() {
        let (_, bridge, sync, doc) = setup();
        let mux = ChangeMultiplexer::new(bridge, DEFAULT_QUEUE_CAPACITY);
        let mut author = mux.open_subscription(&doc, "alice/1").await;
        let mut reader = mux.open_subscription(&doc, "bob/1").await;

        let SyncOutcome::Applied { new_version, .. } = sync
            .sync_document(&doc, "alice", vec![Operation::insert(0, "hi")], "100")
            .await
            .unwrap()
        else {
            panic!("expected apply");
        };

        for sub in [&mut author, &mut reader] {
            let event = sub.recv().await.unwrap();
            let change = event.as_change().unwrap();
            assert_eq!(change.document_id, doc);
            assert_eq!(change.version, new_version);
        }
    }
}
