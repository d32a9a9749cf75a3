//! Change notifier.
//!
//! Fans association changes out to the pub/sub bus and the message broker.
//! Every trigger is fire-and-forget: sink errors are logged and counted,
//! never returned to the mutation that caused them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::association::AssociationId;
use crate::storage::AssociationStore;

use super::config::NotifierConfig;
use super::payload::{ChangeVerb, TagNotification};
use super::sink::NotificationSink;

/// Counters describing what the notifier has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierStats {
    /// Successful sink publishes.
    pub published: u64,
    /// Sink publishes that returned an error.
    pub failed: u64,
    /// Triggers where the association or its tag could not be loaded.
    pub unresolved: u64,
}

/// Outcome of one trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Sinks a publish was attempted on.
    pub attempted: u8,
    /// Sinks that accepted the message.
    pub delivered: u8,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    failed: AtomicU64,
    unresolved: AtomicU64,
}

/// Builds tag notifications and pushes them to the enabled sinks.
pub struct ChangeNotifier {
    config: NotifierConfig,
    pubsub: Option<Arc<dyn NotificationSink>>,
    broker: Option<Arc<dyn NotificationSink>>,
    counters: Counters,
}

impl ChangeNotifier {
    /// A notifier with no sinks attached yet.
    #[must_use]
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            config,
            pubsub: None,
            broker: None,
            counters: Counters::default(),
        }
    }

    /// A notifier that never publishes.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(NotifierConfig::default())
    }

    /// Attach the pub/sub bus sink.
    #[must_use]
    pub fn with_pubsub_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.pubsub = Some(sink);
        self
    }

    /// Attach the message broker sink.
    #[must_use]
    pub fn with_broker_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.broker = Some(sink);
        self
    }

    /// The configuration this notifier was built with.
    #[must_use]
    pub const fn config(&self) -> &NotifierConfig {
        &self.config
    }

    fn pubsub_target(&self) -> Option<(&dyn NotificationSink, &str)> {
        if !self.config.pubsub_enabled() {
            return None;
        }
        self.pubsub
            .as_deref()
            .map(|sink| (sink, self.config.pubsub.channel.as_str()))
    }

    fn broker_target(&self) -> Option<(&dyn NotificationSink, &str)> {
        let topic = self.config.broker_topic()?;
        self.broker.as_deref().map(|sink| (sink, topic))
    }

    /// Whether any enabled channel has a sink attached.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.pubsub_target().is_some() || self.broker_target().is_some()
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> NotifierStats {
        NotifierStats {
            published: self.counters.published.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            unresolved: self.counters.unresolved.load(Ordering::Relaxed),
        }
    }

    /// Trigger after an attach has committed.
    pub fn association_attached(&self, store: &dyn AssociationStore, id: AssociationId) -> FanOut {
        self.notify(store, id, ChangeVerb::Attached)
    }

    /// Trigger before an existing association is removed.
    pub fn association_detaching(&self, store: &dyn AssociationStore, id: AssociationId) -> FanOut {
        self.notify(store, id, ChangeVerb::Detached)
    }

    fn notify(&self, store: &dyn AssociationStore, id: AssociationId, verb: ChangeVerb) -> FanOut {
        let pubsub = self.pubsub_target();
        let broker = self.broker_target();
        if pubsub.is_none() && broker.is_none() {
            return FanOut::default();
        }

        let joined = match store.find_with_tag(id) {
            Ok(Some(joined)) => joined,
            Ok(None) => {
                self.counters.unresolved.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    association_id = %id,
                    %verb,
                    "association or tag missing, nothing to notify"
                );
                return FanOut::default();
            }
            Err(e) => {
                self.counters.unresolved.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    association_id = %id,
                    %verb,
                    error = %e,
                    "failed to load association for notification"
                );
                return FanOut::default();
            }
        };
        let payload = TagNotification::from_joined(&joined);

        let mut out = FanOut::default();
        for (sink, destination) in [pubsub, broker].into_iter().flatten() {
            out.attempted += 1;
            match sink.publish(destination, &payload, verb.as_str()) {
                Ok(()) => {
                    out.delivered += 1;
                    self.counters.published.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        sink = sink.name(),
                        destination,
                        association_id = %id,
                        %verb,
                        error = %e,
                        "tag notification not delivered"
                    );
                }
            }
        }
        out
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("config", &self.config)
            .field("pubsub", &self.pubsub.as_ref().map(|s| s.name()))
            .field("broker", &self.broker.as_ref().map(|s| s.name()))
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use crate::error::NotificationError;
    use crate::event::EventId;
    use crate::storage::{InMemoryStores, TagStore};
    use crate::tag::{Tag, TagId};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, String, String)>>,
        fail: bool,
    }

    impl NotificationSink for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn publish(
            &self,
            destination: &str,
            payload: &TagNotification,
            verb: &str,
        ) -> Result<(), NotificationError> {
            self.calls.lock().unwrap().push((
                destination.to_string(),
                payload.tag.tag.name.clone(),
                verb.to_string(),
            ));
            if self.fail {
                return Err(NotificationError::Transport {
                    transport: "recorder",
                    message: "down".to_string(),
                });
            }
            Ok(())
        }
    }

    fn stores_with_row() -> (InMemoryStores, AssociationId) {
        let stores = InMemoryStores::new();
        stores.tags.insert(Tag::new(TagId::new(1), "phishing")).unwrap();
        let a = stores
            .associations
            .insert(EventId::new(5), TagId::new(1))
            .unwrap();
        (stores, a.id)
    }

    #[test]
    fn disabled_config_skips_everything() {
        let (stores, id) = stores_with_row();
        let sink = Arc::new(Recorder::default());
        let notifier = ChangeNotifier::new(NotifierConfig::default())
            .with_pubsub_sink(Arc::clone(&sink) as Arc<dyn NotificationSink>)
            .with_broker_sink(Arc::clone(&sink) as Arc<dyn NotificationSink>);

        assert!(!notifier.is_listening());
        let out = notifier.association_attached(stores.associations.as_ref(), id);
        assert_eq!(out, FanOut::default());
        assert!(sink.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn both_sinks_receive_one_call_each() {
        let (stores, id) = stores_with_row();
        let bus = Arc::new(Recorder::default());
        let broker = Arc::new(Recorder::default());
        let notifier = ChangeNotifier::new(NotifierConfig::all_enabled("misp_tags"))
            .with_pubsub_sink(Arc::clone(&bus) as Arc<dyn NotificationSink>)
            .with_broker_sink(Arc::clone(&broker) as Arc<dyn NotificationSink>);

        let out = notifier.association_detaching(stores.associations.as_ref(), id);
        assert_eq!(out, FanOut { attempted: 2, delivered: 2 });

        let bus_calls = bus.calls.lock().unwrap();
        assert_eq!(bus_calls.len(), 1);
        assert_eq!(bus_calls[0].0, "misp_json_tag");
        assert_eq!(bus_calls[0].2, "detached from event");

        let broker_calls = broker.calls.lock().unwrap();
        assert_eq!(broker_calls.len(), 1);
        assert_eq!(broker_calls[0].0, "misp_tags");
        assert_eq!(broker_calls[0].1, "phishing");
    }

    #[test]
    fn broker_without_topic_is_skipped() {
        let (stores, id) = stores_with_row();
        let bus = Arc::new(Recorder::default());
        let broker = Arc::new(Recorder::default());
        let mut cfg = NotifierConfig::all_enabled("");
        cfg.broker.tag_notifications_topic = None;
        let notifier = ChangeNotifier::new(cfg)
            .with_pubsub_sink(Arc::clone(&bus) as Arc<dyn NotificationSink>)
            .with_broker_sink(Arc::clone(&broker) as Arc<dyn NotificationSink>);

        let out = notifier.association_attached(stores.associations.as_ref(), id);
        assert_eq!(out.attempted, 1);
        assert_eq!(bus.calls.lock().unwrap().len(), 1);
        assert!(broker.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_sink_does_not_stop_the_other() {
        let (stores, id) = stores_with_row();
        let bus = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let broker = Arc::new(Recorder::default());
        let notifier = ChangeNotifier::new(NotifierConfig::all_enabled("t"))
            .with_pubsub_sink(Arc::clone(&bus) as Arc<dyn NotificationSink>)
            .with_broker_sink(Arc::clone(&broker) as Arc<dyn NotificationSink>);

        let out = notifier.association_attached(stores.associations.as_ref(), id);
        assert_eq!(out, FanOut { attempted: 2, delivered: 1 });
        assert_eq!(broker.calls.lock().unwrap().len(), 1);

        let stats = notifier.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn missing_association_is_counted_not_published() {
        let stores = InMemoryStores::new();
        let bus = Arc::new(Recorder::default());
        let notifier = ChangeNotifier::new(NotifierConfig::all_enabled("t"))
            .with_pubsub_sink(Arc::clone(&bus) as Arc<dyn NotificationSink>);

        let out =
            notifier.association_attached(stores.associations.as_ref(), AssociationId::new(99));
        assert_eq!(out, FanOut::default());
        assert_eq!(notifier.stats().unresolved, 1);
        assert!(bus.calls.lock().unwrap().is_empty());
    }
}
