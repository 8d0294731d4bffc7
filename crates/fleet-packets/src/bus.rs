//! Pub/sub transport abstraction.
//!
//! The dispatcher only ever talks to a [`Transport`]: publish bytes on a topic,
//! subscribe a handler to a topic. Delivery is at-most-once and ordered per
//! topic per subscriber. [`LocalBroker`] is the in-process implementation used
//! by single-process clusters and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::error::BusError;
use crate::topic::Topic;

/// Callback invoked with the raw bytes of each message on a topic.
pub type TopicHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Handle returned by [`Transport::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A topic-based publish/subscribe transport.
pub trait Transport: Send + Sync {
    /// Publish a payload on a topic.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Unreachable` if the transport cannot be reached.
    fn publish(&self, topic: &Topic, payload: &[u8]) -> Result<(), BusError>;

    /// Subscribe a handler to a topic.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Unreachable` if the transport cannot be reached.
    fn subscribe(&self, topic: &Topic, handler: TopicHandler) -> Result<SubscriptionId, BusError>;

    /// Drop a subscription. Unknown handles are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

struct LocalSubscription {
    id: SubscriptionId,
    queue: mpsc::UnboundedSender<Arc<[u8]>>,
}

/// In-process [`Transport`].
///
/// Each subscription owns a queue drained by its own task, so a slow handler
/// only delays its own topic.
pub struct LocalBroker {
    topics: RwLock<HashMap<String, Vec<LocalSubscription>>>,
    next_id: AtomicU64,
    reachable: AtomicBool,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            reachable: AtomicBool::new(true),
        }
    }
}

impl LocalBroker {
    /// Create a new broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the connection to the broker.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of live subscriptions on a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics.read().get(&topic.name()).map_or(0, Vec::len)
    }

    fn ensure_reachable(&self) -> Result<(), BusError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Unreachable("local broker offline".to_string()))
        }
    }
}

impl Transport for LocalBroker {
    fn publish(&self, topic: &Topic, payload: &[u8]) -> Result<(), BusError> {
        self.ensure_reachable()?;

        let message: Arc<[u8]> = Arc::from(payload);
        if let Some(subscriptions) = self.topics.read().get(&topic.name()) {
            for subscription in subscriptions {
                // A closed queue means the subscriber is gone; at-most-once.
                let _ = subscription.queue.send(Arc::clone(&message));
            }
        }
        Ok(())
    }

    /// Must be called from within a Tokio runtime.
    fn subscribe(&self, topic: &Topic, handler: TopicHandler) -> Result<SubscriptionId, BusError> {
        self.ensure_reachable()?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = mpsc::unbounded_channel::<Arc<[u8]>>();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                handler(&message[..]);
            }
        });

        self.topics
            .write()
            .entry(topic.name())
            .or_default()
            .push(LocalSubscription { id, queue: tx });

        tracing::trace!(%topic, ?id, "Subscribed");
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut topics = self.topics.write();
        for subscriptions in topics.values_mut() {
            subscriptions.retain(|s| s.id != id);
        }
        topics.retain(|_, subscriptions| !subscriptions.is_empty());
    }
}
