//! Change notifications for association mutations.
//!
//! Two channels can receive a notification when a tag is attached to or
//! detached from an event: an in-process pub/sub bus and a message broker.
//! Each is enabled independently by [`NotifierConfig`].

/// Message broker sink and in-process broker.
pub mod broker;
/// Notifier configuration.
pub mod config;
/// Fan-out of association changes.
pub mod notifier;
/// Notification payloads.
pub mod payload;
/// In-process pub/sub bus and its sink.
pub mod pubsub;
/// The sink capability.
pub mod sink;

pub use broker::{BrokerRecord, BrokerSink, BrokerTransport, MemoryBroker};
pub use config::{BrokerConfig, NotifierConfig, PubSubConfig, DEFAULT_TAG_CHANNEL};
pub use notifier::{ChangeNotifier, FanOut, NotifierStats};
pub use payload::{ChangeVerb, NotifiedTag, TagNotification};
pub use pubsub::{BusConfig, BusMessage, BusSubscription, PubSubBus, PubSubSink, SubscriptionId};
pub use sink::NotificationSink;
