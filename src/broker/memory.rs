use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use super::{Broker, BrokerError, MessageHandler};

/// In-process broker. Publishing delivers synchronously to the topic's handler, so a single
/// node behaves exactly as if its own publishes round-tripped through an external broker.
#[derive(Default)]
pub struct MemoryBroker {
    handlers: RwLock<HashMap<String, MessageHandler>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_handler(&self, topic: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(topic)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BrokerError> {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic.to_string(), handler);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        // Clone the handler out so it never runs under the map lock
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .cloned();
        match handler {
            Some(handler) => handler(&payload),
            None => debug!("No subscriber for topic {}", topic),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn resubscribe_replaces_handler() {
        let broker = MemoryBroker::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let c = first.clone();
        broker
            .subscribe("t", Arc::new(move |_: &[u8]| {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();
        let c = second.clone();
        broker
            .subscribe("t", Arc::new(move |_: &[u8]| {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();

        broker.publish("t", b"{}".to_vec()).await.unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_without_subscriber_is_ok() {
        let broker = MemoryBroker::new();
        broker.publish("nobody", b"{}".to_vec()).await.unwrap();
        assert!(!broker.has_handler("nobody"));
    }
}
