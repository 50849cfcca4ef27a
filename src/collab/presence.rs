use std::sync::Arc;
use tracing::{debug, error};

use super::multiplexer::ChangeMultiplexer;
use super::session::SessionRegistry;
use crate::broker::{presence_topic, BrokerBridge};
use crate::models::{ActiveUser, PresenceEvent};

/// Join/leave/cursor bookkeeping on top of the session registry. Presence is soft state:
/// broker failures are logged and never reach the caller.
pub struct PresenceService {
    sessions: Arc<SessionRegistry>,
    mux: Arc<ChangeMultiplexer>,
    bridge: Arc<BrokerBridge>,
}

impl PresenceService {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        mux: Arc<ChangeMultiplexer>,
        bridge: Arc<BrokerBridge>,
    ) -> Self {
        Self {
            sessions,
            mux,
            bridge,
        }
    }

    /// Register `user` and return everyone currently present, `user` included
    pub async fn join_session(&self, document_id: &str, user: ActiveUser) -> Vec<ActiveUser> {
        let (session, created) = self.sessions.join(document_id, user.clone());
        if created {
            debug!("Created session for document {}", document_id);
        }
        self.mux.pin(document_id).await;

        self.publish(document_id, PresenceEvent::Join { user }).await;
        session.active_users()
    }

    /// Announces the departure before the feed can be released, so open streams still see it
    pub async fn leave_session(&self, document_id: &str, user_id: &str) {
        let departure = self.sessions.leave(document_id, user_id);

        self.publish(
            document_id,
            PresenceEvent::Leave {
                user_id: user_id.to_string(),
            },
        )
        .await;

        if departure.session_closed {
            debug!("Closed session for document {}", document_id);
            self.mux.unpin(document_id).await;
            // A join may have recreated the session between the leave and the unpin
            if self.sessions.contains(document_id) {
                self.mux.pin(document_id).await;
            }
        }
    }

    pub async fn update_user_activity(&self, document_id: &str, user_id: &str, cursor_position: &str) {
        if let Some(session) = self.sessions.get_session(document_id) {
            if !session.update_user_activity(user_id, cursor_position) {
                debug!("Cursor update from {} who is not in document {}", user_id, document_id);
            }
        }

        self.publish(
            document_id,
            PresenceEvent::Cursor {
                user_id: user_id.to_string(),
                cursor_position: cursor_position.to_string(),
            },
        )
        .await;
    }

    pub fn get_active_users(&self, document_id: &str) -> Vec<ActiveUser> {
        self.sessions
            .get_session(document_id)
            .map(|session| session.active_users())
            .unwrap_or_default()
    }

    async fn publish(&self, document_id: &str, event: PresenceEvent) {
        if let Err(e) = self.bridge.publish(&presence_topic(document_id), &event).await {
            error!("Error publishing presence update for document {}: {}", document_id, e);
        }
    }
}
