//! Per-document fan-out of broker events into bounded per-consumer queues.
//!
//! The broker callback only ever does `try_send`, so a slow consumer loses events instead of
//! stalling the broker or its neighbours. The multiplexer also owns the document's change and
//! presence topic subscriptions: they are held while the document is pinned (has a presence
//! session) or has at least one open subscription, and each topic is subscribed at most once
//! per document.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::broker::{document_topic, presence_topic, BrokerBridge, BrokerError};
use crate::models::{DocumentChange, PresenceEvent};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// One item of a document stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Change(Arc<DocumentChange>),
    Presence(Arc<PresenceEvent>),
}

impl StreamEvent {
    pub fn as_change(&self) -> Option<&DocumentChange> {
        match self {
            StreamEvent::Change(change) => Some(&**change),
            StreamEvent::Presence(_) => None,
        }
    }

    pub fn as_presence(&self) -> Option<&PresenceEvent> {
        match self {
            StreamEvent::Presence(event) => Some(&**event),
            StreamEvent::Change(_) => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            StreamEvent::Change(change) => format!("change {}", change.version),
            StreamEvent::Presence(_) => "presence event".to_string(),
        }
    }
}

struct Slot {
    id: u64,
    tx: mpsc::Sender<StreamEvent>,
}

pub struct ChangeMultiplexer {
    bridge: Arc<BrokerBridge>,
    capacity: usize,
    next_id: AtomicU64,
    buckets: RwLock<HashMap<String, HashMap<String, Slot>>>,
    pins: Mutex<HashSet<String>>,
    // Serializes subscribe/unsubscribe decisions against the idle check
    feed_ops: tokio::sync::Mutex<()>,
}

impl ChangeMultiplexer {
    pub fn new(bridge: Arc<BrokerBridge>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            bridge,
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            buckets: RwLock::new(HashMap::new()),
            pins: Mutex::new(HashSet::new()),
            feed_ops: tokio::sync::Mutex::new(()),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocate a bounded queue for `(document_id, consumer_id)`. Reopening an existing
    /// consumer id replaces its queue, which closes the previous one.
    pub async fn open_subscription(
        self: &Arc<Self>,
        document_id: &str,
        consumer_id: &str,
    ) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
            let replaced = buckets
                .entry(document_id.to_string())
                .or_default()
                .insert(consumer_id.to_string(), Slot { id, tx });
            if replaced.is_some() {
                warn!("Replacing open subscription {} on document {}", consumer_id, document_id);
            }
        }
        debug!("Opened subscription {} on document {}", consumer_id, document_id);

        self.ensure_feed(document_id).await;

        Subscription {
            document_id: document_id.to_string(),
            consumer_id: consumer_id.to_string(),
            id,
            rx,
            mux: Arc::downgrade(self),
            released: false,
        }
    }

    /// Close and remove one subscription. Only the subscription that created the slot can
    /// remove it, so releasing twice (or after a replacement) leaves the registry untouched.
    /// Returns `true` if something was removed.
    pub fn release_subscription(self: &Arc<Self>, document_id: &str, consumer_id: &str, id: u64) -> bool {
        let (removed, bucket_gone) = {
            let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
            let Some(bucket) = buckets.get_mut(document_id) else {
                return false;
            };
            let removed = match bucket.get(consumer_id) {
                Some(slot) if slot.id == id => bucket.remove(consumer_id).is_some(),
                _ => false,
            };
            let bucket_gone = bucket.is_empty();
            if bucket_gone {
                buckets.remove(document_id);
            }
            (removed, bucket_gone)
        };

        if removed {
            debug!("Released subscription {} on document {}", consumer_id, document_id);
        }
        if bucket_gone && !self.is_pinned(document_id) {
            self.schedule_feed_release(document_id);
        }
        removed
    }

    /// Broker callback: non-blocking enqueue into every live subscription of the document
    pub fn on_broker_change(&self, document_id: &str, change: DocumentChange) {
        self.dispatch(document_id, StreamEvent::Change(Arc::new(change)));
    }

    pub fn on_presence_event(&self, document_id: &str, event: PresenceEvent) {
        self.dispatch(document_id, StreamEvent::Presence(Arc::new(event)));
    }

    fn dispatch(&self, document_id: &str, event: StreamEvent) {
        let buckets = self.buckets.read().unwrap_or_else(|e| e.into_inner());
        let Some(bucket) = buckets.get(document_id) else {
            debug!("No subscriptions for document {}, dropping {}", document_id, event.describe());
            return;
        };
        for (consumer_id, slot) in bucket {
            match slot.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Stream queue full for {} on document {}, dropping {}",
                        consumer_id,
                        document_id,
                        event.describe()
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Stream queue for {} on document {} already closed", consumer_id, document_id);
                }
            }
        }
    }

    /// Keep the change feed alive for a document with a presence session
    pub async fn pin(self: &Arc<Self>, document_id: &str) {
        self.pins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(document_id.to_string());
        self.ensure_feed(document_id).await;
    }

    pub async fn unpin(&self, document_id: &str) {
        self.pins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(document_id);
        self.release_feed_if_idle(document_id).await;
    }

    fn is_pinned(&self, document_id: &str) -> bool {
        self.pins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(document_id)
    }

    fn is_idle(&self, document_id: &str) -> bool {
        !self.is_pinned(document_id) && !self.has_subscriptions(document_id)
    }

    async fn ensure_feed(self: &Arc<Self>, document_id: &str) {
        let _guard = self.feed_ops.lock().await;

        let topic = document_topic(document_id);
        if !self.bridge.is_subscribed(&topic) {
            let mux = Arc::downgrade(self);
            let doc = document_id.to_string();
            let result = self
                .bridge
                .subscribe_json(&topic, move |change: DocumentChange| {
                    if let Some(mux) = mux.upgrade() {
                        mux.on_broker_change(&doc, change);
                    }
                })
                .await;
            log_subscribe(document_id, "changes", result);
        }

        let topic = presence_topic(document_id);
        if !self.bridge.is_subscribed(&topic) {
            let mux = Arc::downgrade(self);
            let doc = document_id.to_string();
            let result = self
                .bridge
                .subscribe_json(&topic, move |event: PresenceEvent| {
                    if let Some(mux) = mux.upgrade() {
                        mux.on_presence_event(&doc, event);
                    }
                })
                .await;
            log_subscribe(document_id, "presence", result);
        }
    }

    async fn release_feed_if_idle(&self, document_id: &str) {
        let _guard = self.feed_ops.lock().await;
        if !self.is_idle(document_id) {
            return;
        }
        for topic in [document_topic(document_id), presence_topic(document_id)] {
            match self.bridge.unsubscribe(&topic).await {
                Ok(true) => info!("Stopped listening on {}", topic),
                Ok(false) => {}
                Err(e) => error!("Error unsubscribing from {}: {}", topic, e),
            }
        }
    }

    // Release runs from Drop, so the unsubscribe has to happen on a spawned task
    fn schedule_feed_release(self: &Arc<Self>, document_id: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to release change feed of document {}", document_id);
            return;
        };
        let mux = self.clone();
        let doc = document_id.to_string();
        handle.spawn(async move {
            mux.release_feed_if_idle(&doc).await;
        });
    }

    pub fn has_subscriptions(&self, document_id: &str) -> bool {
        self.buckets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(document_id)
    }

    pub fn subscription_count(&self, document_id: &str) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(document_id)
            .map_or(0, |bucket| bucket.len())
    }

    pub fn document_count(&self) -> usize {
        self.buckets.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn total_subscriptions(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|bucket| bucket.len())
            .sum()
    }
}

/// The consumer side of one queue. Dropping it releases the subscription.
pub struct Subscription {
    document_id: String,
    consumer_id: String,
    id: u64,
    rx: mpsc::Receiver<StreamEvent>,
    mux: Weak<ChangeMultiplexer>,
    released: bool,
}

impl Subscription {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    /// Wait for the next event. `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.rx.try_recv().ok()
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(mux) = self.mux.upgrade() {
            mux.release_subscription(&self.document_id, &self.consumer_id, self.id);
        }
    }
}

fn log_subscribe(document_id: &str, feed: &str, result: Result<bool, BrokerError>) {
    match result {
        Ok(true) => info!("Listening for {} on document {}", feed, document_id),
        Ok(false) => {}
        Err(e) => error!("Error subscribing to {} of document {}: {}", feed, document_id, e),
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
