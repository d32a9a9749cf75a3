//! # eventtag - Event/Tag Associations with Change Notifications
//!
//! eventtag models the many-to-many link between threat-intelligence events
//! and tags. It stores the links, derives tag rankings and score vectors from
//! them, and announces every attach and detach on a pub/sub bus and a message
//! broker.
//!
//! ## Core Concepts
//!
//! - **Association**: one event linked to one tag, unique per pair
//! - **TagAssociations**: attach, detach, delete and query associations
//! - **TagAggregator**: popularity ranking and per-tag score vectors
//! - **ChangeNotifier**: best-effort fan-out of changes to the enabled sinks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use eventtag::{
//!     AssociationStore, ChangeNotifier, EventId, InMemoryStores, NotificationSink,
//!     NotifierConfig, PubSubBus, PubSubSink, TagAssociations, TagId, TagStore,
//! };
//!
//! let stores = InMemoryStores::new();
//! let bus = Arc::new(PubSubBus::default());
//! let notifier = ChangeNotifier::new(NotifierConfig::from_json_str(
//!     r#"{"pubsub": {"enable": true, "tag_notifications_enable": true}}"#,
//! )?)
//! .with_pubsub_sink(Arc::new(PubSubSink::new(bus)) as Arc<dyn NotificationSink>);
//!
//! let tags = TagAssociations::new(
//!     stores.associations.clone() as Arc<dyn AssociationStore>,
//!     stores.tags.clone() as Arc<dyn TagStore>,
//!     notifier,
//! );
//! let outcome = tags.attach(EventId::new(1), TagId::new(7))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod association;
pub mod error;
pub mod event;
pub mod tag;

mod id;

// Storage, services and notifications
pub mod aggregate;
pub mod associations;
pub mod notify;
pub mod storage;

pub use aggregate::{ScoreMode, SortedTagEntry, TagAggregator, TagScores};
pub use association::{
    validate_pair, Association, AssociationId, TagCount, TaggedAssociation, TaggedEventAssociation,
};
pub use associations::{AttachOutcome, TagAssociations, UserRef};
pub use error::{EventTagError, EventTagResult, NotificationError, ValidationError};
pub use event::{EventId, EventSummary};
pub use notify::{
    BrokerConfig, BrokerSink, BrokerTransport, BusMessage, BusSubscription, ChangeNotifier,
    ChangeVerb, MemoryBroker, NotificationSink, NotifierConfig, PubSubBus, PubSubConfig,
    PubSubSink, TagNotification,
};
pub use storage::{
    AssociationStore, EventStore, InMemoryAssociationStore, InMemoryEventStore, InMemoryStores,
    InMemoryTagStore, StorageError, TagStore,
};
pub use tag::{Tag, TagId, TagNameFilter};
