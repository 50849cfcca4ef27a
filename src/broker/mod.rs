//! Publish/subscribe plumbing between this node and the message broker.
//!
//! [`Broker`] is the transport seam (in-process or Postgres LISTEN/NOTIFY). [`BrokerBridge`]
//! sits on top of it, owns the set of topics this node listens to and does the JSON
//! encoding/decoding, so callers only ever deal in typed payloads.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

pub use memory::MemoryBroker;
pub use postgres::PgBroker;

/// Callback invoked with the raw payload of every message delivered on a topic.
/// Runs on the broker's delivery context and must not block.
pub type MessageHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("error encoding payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("broker transport error: {0}")]
    Transport(#[from] sqlx::Error),
    #[error("broker listener is not running")]
    ListenerGone,
    #[error("payload is not valid UTF-8")]
    InvalidPayload,
}

/// A topic-based message transport. One local handler per topic: subscribing again replaces
/// the previous handler.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BrokerError>;
    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError>;
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;
    fn name(&self) -> &'static str;
}

pub fn document_topic(document_id: &str) -> String {
    format!("documents/{}/changes", document_id)
}

pub fn presence_topic(document_id: &str) -> String {
    format!("documents/{}/presence", document_id)
}

pub struct BrokerBridge {
    broker: Arc<dyn Broker>,
    topics: Mutex<HashSet<String>>,
}

impl BrokerBridge {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            topics: Mutex::new(HashSet::new()),
        }
    }

    pub fn broker_name(&self) -> &'static str {
        self.broker.name()
    }

    /// Subscribe `topic` unless this node already listens to it. Returns `true` when a new
    /// broker subscription was made.
    pub async fn subscribe_json<T, F>(&self, topic: &str, on_message: F) -> Result<bool, BrokerError>
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        {
            let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
            if !topics.insert(topic.to_string()) {
                return Ok(false);
            }
        }

        let topic_name = topic.to_string();
        let handler: MessageHandler = Arc::new(move |payload: &[u8]| {
            match serde_json::from_slice::<T>(payload) {
                Ok(message) => on_message(message),
                Err(e) => error!("Error decoding message on topic {}: {}", topic_name, e),
            }
        });

        if let Err(e) = self.broker.subscribe(topic, handler).await {
            self.topics.lock().unwrap_or_else(|e| e.into_inner()).remove(topic);
            return Err(e);
        }
        debug!("Subscribed to topic {}", topic);
        Ok(true)
    }

    /// Drop the subscription for `topic`. Returns `false` if this node was not subscribed.
    pub async fn unsubscribe(&self, topic: &str) -> Result<bool, BrokerError> {
        let was_subscribed = self
            .topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(topic);
        if !was_subscribed {
            return Ok(false);
        }
        self.broker.unsubscribe(topic).await?;
        debug!("Unsubscribed from topic {}", topic);
        Ok(true)
    }

    pub async fn publish<T: Serialize>(&self, topic: &str, payload: &T) -> Result<(), BrokerError> {
        let data = serde_json::to_vec(payload)?;
        self.broker.publish(topic, data).await
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(topic)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
