//! In-process publish/subscribe bus.
//!
//! Subscribers get a bounded channel each. Publishing never blocks: a full
//! subscriber loses the message and the bus counts the drop; a subscriber
//! whose handle was dropped is removed on the next publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NotificationError;

use super::payload::TagNotification;
use super::sink::NotificationSink;

/// Unique identifier for a bus subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// A message delivered to bus subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Unique message id.
    pub id: Uuid,
    /// Channel the message was published on.
    pub channel: String,
    /// Publish time.
    pub published_at: DateTime<Utc>,
    /// JSON body.
    pub body: String,
}

impl BusMessage {
    /// Parse the body as JSON.
    ///
    /// # Errors
    /// Returns `NotificationError::Encode` if the body is not valid JSON.
    pub fn json(&self) -> Result<serde_json::Value, NotificationError> {
        serde_json::from_str(&self.body).map_err(|e| NotificationError::Encode {
            message: e.to_string(),
        })
    }
}

/// Bus settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-subscriber buffer capacity.
    pub subscriber_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 1024,
        }
    }
}

#[derive(Debug)]
struct Subscriber {
    channel: Option<String>,
    tx: Sender<BusMessage>,
}

type Registry = RwLock<HashMap<SubscriptionId, Subscriber>>;

/// In-process publish/subscribe bus.
#[derive(Debug)]
pub struct PubSubBus {
    cfg: BusConfig,
    subscribers: Arc<Registry>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl Default for PubSubBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl PubSubBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new(cfg: BusConfig) -> Self {
        Self {
            cfg,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Subscribe to one channel, or to every channel with `None`.
    ///
    /// # Errors
    /// Returns `NotificationError::Disconnected` if the registry lock is poisoned.
    pub fn subscribe(&self, channel: Option<&str>) -> Result<BusSubscription, NotificationError> {
        let id = SubscriptionId::new();
        let (tx, rx) = bounded(self.cfg.subscriber_capacity.max(1));
        self.subscribers
            .write()
            .map_err(|_| NotificationError::Disconnected { sink: "pubsub" })?
            .insert(
                id,
                Subscriber {
                    channel: channel.map(str::to_string),
                    tx,
                },
            );
        Ok(BusSubscription {
            id,
            rx,
            registry: Arc::downgrade(&self.subscribers),
        })
    }

    /// Deliver `body` to every subscriber of `channel`.
    ///
    /// Returns the number of subscribers that received it.
    ///
    /// # Errors
    /// Returns `NotificationError::Disconnected` if the registry lock is poisoned.
    pub fn publish(&self, channel: &str, body: String) -> Result<usize, NotificationError> {
        let message = BusMessage {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            published_at: Utc::now(),
            body,
        };

        let mut delivered = 0usize;
        let mut gone = Vec::new();
        {
            let subscribers = self
                .subscribers
                .read()
                .map_err(|_| NotificationError::Disconnected { sink: "pubsub" })?;
            for (id, sub) in subscribers.iter() {
                if sub.channel.as_deref().is_some_and(|c| c != channel) {
                    continue;
                }
                match sub.tx.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Disconnected(_)) => gone.push(*id),
                }
            }
        }

        if !gone.is_empty() {
            if let Ok(mut subscribers) = self.subscribers.write() {
                for id in gone {
                    subscribers.remove(&id);
                }
            }
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(delivered)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map_or(0, |s| s.len())
    }

    /// Messages published so far.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Deliveries lost to full subscriber buffers.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving end of a bus subscription.
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct BusSubscription {
    id: SubscriptionId,
    rx: Receiver<BusMessage>,
    registry: Weak<Registry>,
}

impl BusSubscription {
    /// The subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next message (blocking).
    ///
    /// # Errors
    /// Returns `NotificationError::Disconnected` once the bus is gone.
    pub fn recv(&self) -> Result<BusMessage, NotificationError> {
        self.rx
            .recv()
            .map_err(|_| NotificationError::Disconnected { sink: "pubsub" })
    }

    /// Receive the next message, or `None` after `timeout`.
    ///
    /// # Errors
    /// Returns `NotificationError::Disconnected` once the bus is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<BusMessage>, NotificationError> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(NotificationError::Disconnected { sink: "pubsub" })
            }
        }
    }

    /// Take a buffered message without waiting.
    #[must_use]
    pub fn try_recv(&self) -> Option<BusMessage> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Every message currently buffered.
    #[must_use]
    pub fn drain(&self) -> Vec<BusMessage> {
        self.rx.try_iter().collect()
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut subscribers) = registry.write() {
                subscribers.remove(&self.id);
            }
        }
    }
}

/// Sink publishing tag notifications on a [`PubSubBus`].
#[derive(Debug, Clone)]
pub struct PubSubSink {
    bus: Arc<PubSubBus>,
}

impl PubSubSink {
    /// Publish through `bus`.
    #[must_use]
    pub const fn new(bus: Arc<PubSubBus>) -> Self {
        Self { bus }
    }

    /// The underlying bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<PubSubBus> {
        &self.bus
    }
}

impl NotificationSink for PubSubSink {
    fn name(&self) -> &'static str {
        "pubsub"
    }

    fn publish(
        &self,
        destination: &str,
        payload: &TagNotification,
        verb: &str,
    ) -> Result<(), NotificationError> {
        let body = payload.encode_message(verb)?;
        let delivered = self.bus.publish(destination, body)?;
        tracing::debug!(channel = destination, delivered, "tag notification published on bus");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_filtering() {
        let bus = PubSubBus::default();
        let tags = bus.subscribe(Some("misp_json_tag")).unwrap();
        let all = bus.subscribe(None).unwrap();

        bus.publish("misp_json_tag", "{}".to_string()).unwrap();
        bus.publish("misp_json_event", "{}".to_string()).unwrap();

        assert_eq!(tags.drain().len(), 1);
        assert_eq!(all.drain().len(), 2);
        assert_eq!(bus.published(), 2);
    }

    #[test]
    fn full_subscriber_counts_drop() {
        let bus = PubSubBus::new(BusConfig {
            subscriber_capacity: 1,
        });
        let sub = bus.subscribe(None).unwrap();

        assert_eq!(bus.publish("c", "1".to_string()).unwrap(), 1);
        assert_eq!(bus.publish("c", "2".to_string()).unwrap(), 0);
        assert_eq!(bus.dropped(), 1);
        assert_eq!(sub.try_recv().unwrap().body, "1");
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = PubSubBus::default();
        let sub = bus.subscribe(None).unwrap();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn recv_timeout_returns_none_when_idle() {
        let bus = PubSubBus::default();
        let sub = bus.subscribe(None).unwrap();
        assert!(sub
            .recv_timeout(Duration::from_millis(5))
            .unwrap()
            .is_none());
    }

    #[test]
    fn recv_fails_after_bus_dropped() {
        let bus = PubSubBus::default();
        let sub = bus.subscribe(None).unwrap();
        drop(bus);
        assert!(matches!(
            sub.recv(),
            Err(NotificationError::Disconnected { .. })
        ));
    }
}
