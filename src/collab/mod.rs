//! The collaboration engine: presence, change fan-out and optimistic sync, composed behind
//! [`CollabService`] so the HTTP layer only ever holds one handle.

pub mod multiplexer;
pub mod presence;
pub mod session;
pub mod sync;

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::broker::{Broker, BrokerBridge};
use crate::db::DocumentStore;
use crate::models::{ActiveUser, Operation};
use multiplexer::{ChangeMultiplexer, Subscription};
use presence::PresenceService;
use session::SessionRegistry;
use sync::{DocumentSync, SyncError, SyncOutcome};

pub struct CollabService {
    sessions: Arc<SessionRegistry>,
    presence: PresenceService,
    mux: Arc<ChangeMultiplexer>,
    sync: DocumentSync,
    bridge: Arc<BrokerBridge>,
    shutdown: watch::Sender<bool>,
}

impl CollabService {
    pub fn new(store: Arc<dyn DocumentStore>, broker: Arc<dyn Broker>, queue_capacity: usize) -> Self {
        let bridge = Arc::new(BrokerBridge::new(broker));
        let sessions = Arc::new(SessionRegistry::new());
        let mux = ChangeMultiplexer::new(bridge.clone(), queue_capacity);
        let presence = PresenceService::new(sessions.clone(), mux.clone(), bridge.clone());
        let sync = DocumentSync::new(store, bridge.clone());
        let (shutdown, _) = watch::channel(false);

        Self {
            sessions,
            presence,
            mux,
            sync,
            bridge,
            shutdown,
        }
    }

    pub async fn join_session(&self, document_id: &str, user_id: &str, username: &str) -> Vec<ActiveUser> {
        self.presence
            .join_session(document_id, ActiveUser::new(user_id, username))
            .await
    }

    pub async fn leave_session(&self, document_id: &str, user_id: &str) {
        self.presence.leave_session(document_id, user_id).await
    }

    pub fn get_active_users(&self, document_id: &str) -> Vec<ActiveUser> {
        self.presence.get_active_users(document_id)
    }

    pub async fn update_user_activity(&self, document_id: &str, user_id: &str, cursor_position: &str) {
        self.presence
            .update_user_activity(document_id, user_id, cursor_position)
            .await
    }

    /// Open a change stream for `user_id`. Each call gets its own consumer id, so several
    /// streams of one user coexist.
    pub async fn stream_changes(&self, document_id: &str, user_id: &str) -> Subscription {
        let consumer_id = format!("{}/{}", user_id, uuid::Uuid::new_v4());
        self.mux.open_subscription(document_id, &consumer_id).await
    }

    pub async fn sync_document(
        &self,
        document_id: &str,
        user_id: &str,
        operations: Vec<Operation>,
        base_version: &str,
    ) -> Result<SyncOutcome, SyncError> {
        self.sync
            .sync_document(document_id, user_id, operations, base_version)
            .await
    }

    /// Streams watch this to end with a cancel when the server is going down
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn shutdown(&self) {
        info!("Closing {} open change streams", self.mux.total_subscriptions());
        self.shutdown.send_replace(true);
    }

    pub fn broker_name(&self) -> &'static str {
        self.bridge.broker_name()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.session_count()
    }

    pub fn user_count(&self) -> usize {
        self.sessions.user_count()
    }

    pub fn subscribed_document_count(&self) -> usize {
        self.mux.document_count()
    }

    pub fn subscription_count(&self) -> usize {
        self.mux.total_subscriptions()
    }

    pub fn broker_topic_count(&self) -> usize {
        self.bridge.topic_count()
    }
}
