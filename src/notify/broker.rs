//! Message broker sink.
//!
//! The sink turns a notification into JSON bytes and hands them to a
//! [`BrokerTransport`]. Network transports live outside this crate;
//! [`MemoryBroker`] keeps per-topic logs in process.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::error::NotificationError;

use super::payload::TagNotification;
use super::sink::NotificationSink;

/// Produces raw messages to a broker topic.
pub trait BrokerTransport: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Append `message` to `topic`.
    ///
    /// # Errors
    /// Returns `NotificationError::Transport` if the broker rejects the message.
    fn produce(&self, topic: &str, message: &[u8]) -> Result<(), NotificationError>;
}

/// One record in a [`MemoryBroker`] topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    /// Position in the topic, starting at 0.
    pub offset: u64,
    /// When the record was produced.
    pub produced_at: DateTime<Utc>,
    /// Raw message bytes.
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, Vec<BrokerRecord>>,
    closed: HashSet<String>,
}

/// In-process broker with append-only topic logs.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: RwLock<BrokerState>,
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in `topic`, oldest first.
    ///
    /// # Errors
    /// Returns `NotificationError::Transport` if the broker state is poisoned.
    pub fn records(&self, topic: &str) -> Result<Vec<BrokerRecord>, NotificationError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.topics.get(topic).cloned().unwrap_or_default())
    }

    /// Refuse further produces to `topic`.
    ///
    /// # Errors
    /// Returns `NotificationError::Transport` if the broker state is poisoned.
    pub fn close_topic(&self, topic: &str) -> Result<(), NotificationError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.closed.insert(topic.to_string());
        Ok(())
    }
}

fn poisoned() -> NotificationError {
    NotificationError::Transport {
        transport: "memory",
        message: "poisoned lock".to_string(),
    }
}

impl BrokerTransport for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn produce(&self, topic: &str, message: &[u8]) -> Result<(), NotificationError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if state.closed.contains(topic) {
            return Err(NotificationError::Transport {
                transport: "memory",
                message: format!("topic '{topic}' is closed"),
            });
        }
        let log = state.topics.entry(topic.to_string()).or_default();
        log.push(BrokerRecord {
            offset: log.len() as u64,
            produced_at: Utc::now(),
            payload: message.to_vec(),
        });
        Ok(())
    }
}

/// Sink producing tag notifications through a [`BrokerTransport`].
#[derive(Clone)]
pub struct BrokerSink {
    transport: Arc<dyn BrokerTransport>,
}

impl BrokerSink {
    /// Produce through `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn BrokerTransport>) -> Self {
        Self { transport }
    }
}

impl std::fmt::Debug for BrokerSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSink")
            .field("transport", &self.transport.name())
            .finish()
    }
}

impl NotificationSink for BrokerSink {
    fn name(&self) -> &'static str {
        "broker"
    }

    fn publish(
        &self,
        destination: &str,
        payload: &TagNotification,
        verb: &str,
    ) -> Result<(), NotificationError> {
        let message = payload.encode_message(verb)?;
        self.transport.produce(destination, message.as_bytes())?;
        tracing::debug!(
            topic = destination,
            transport = self.transport.name(),
            bytes = message.len(),
            "tag notification produced"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::association::{Association, AssociationId, TaggedAssociation};
    use crate::event::EventId;
    use crate::tag::{Tag, TagId};

    fn payload() -> TagNotification {
        TagNotification::from_joined(&TaggedAssociation {
            association: Association {
                id: AssociationId::new(1),
                event_id: EventId::new(3),
                tag_id: TagId::new(2),
            },
            tag: Tag::new(TagId::new(2), "osint"),
        })
    }

    #[test]
    fn produces_json_with_action() {
        let broker = Arc::new(MemoryBroker::new());
        let sink = BrokerSink::new(Arc::clone(&broker) as Arc<dyn BrokerTransport>);

        sink.publish("tags", &payload(), "attached to event").unwrap();
        sink.publish("tags", &payload(), "detached from event").unwrap();

        let records = broker.records("tags").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].offset, 1);

        let first: serde_json::Value = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(first["action"], "attached to event");
        assert_eq!(first["Tag"]["name"], "osint");
        assert_eq!(first["Tag"]["event_id"], "3");
    }

    #[test]
    fn closed_topic_is_transport_error() {
        let broker = Arc::new(MemoryBroker::new());
        broker.close_topic("tags").unwrap();
        let sink = BrokerSink::new(Arc::clone(&broker) as Arc<dyn BrokerTransport>);

        let err = sink.publish("tags", &payload(), "attached to event").unwrap_err();
        assert!(matches!(err, NotificationError::Transport { transport: "memory", .. }));
        assert!(broker.records("tags").unwrap().is_empty());
    }

    #[test]
    fn poisoned_state_is_reported() {
        let broker = Arc::new(MemoryBroker::new());
        let held = Arc::clone(&broker);
        let _ = std::thread::spawn(move || {
            let _guard = held.state.write().unwrap();
            panic!("poison the broker state");
        })
        .join();

        assert!(matches!(
            broker.records("tags"),
            Err(NotificationError::Transport { transport: "memory", .. })
        ));
        assert!(broker.close_topic("tags").is_err());
        assert!(broker.produce("tags", b"{}").is_err());
    }
}
