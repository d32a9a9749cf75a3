//! The tag association store.
//!
//! `TagAssociations` owns the lifecycle of event/tag links: it validates,
//! deduplicates, persists and deletes them, and runs the change notifier
//! after an attach commits and before a delete removes the row.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::association::{validate_pair, Association, AssociationId};
use crate::error::EventTagResult;
use crate::event::EventId;
use crate::notify::ChangeNotifier;
use crate::storage::{AssociationStore, StorageError, TagStore};
use crate::tag::{TagId, TagNameFilter};

/// The user a query runs on behalf of.
///
/// Counting is not scoped by user; the argument exists so call sites look
/// the same as the host platform's other ACL-aware queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRef {
    /// User id.
    pub id: u64,
    /// Organisation id.
    pub org_id: u64,
}

/// Result of a successful attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachOutcome {
    /// The association linking the pair.
    pub association: Association,
    /// False if the pair was already linked.
    pub created: bool,
}

/// Store for event/tag associations.
pub struct TagAssociations {
    store: Arc<dyn AssociationStore>,
    tags: Arc<dyn TagStore>,
    notifier: ChangeNotifier,
}

impl TagAssociations {
    /// Build the store on top of the given persistence collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn AssociationStore>,
        tags: Arc<dyn TagStore>,
        notifier: ChangeNotifier,
    ) -> Self {
        Self {
            store,
            tags,
            notifier,
        }
    }

    /// The change notifier mutations run through.
    #[must_use]
    pub const fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// The underlying association rows.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AssociationStore> {
        &self.store
    }

    /// Attach `tag_id` to `event_id`.
    ///
    /// Attaching an already-linked pair succeeds without writing. The attach
    /// notification runs after the commit in both cases; its outcome never
    /// affects the result.
    ///
    /// # Errors
    /// - `Validation` if either id is empty; nothing is written
    /// - `Persistence` if the store fails to write
    pub fn attach(&self, event_id: EventId, tag_id: TagId) -> EventTagResult<AttachOutcome> {
        validate_pair(event_id, tag_id)?;

        let outcome = match self.store.find_by_pair(event_id, tag_id)? {
            Some(association) => AttachOutcome {
                association,
                created: false,
            },
            None => match self.store.insert(event_id, tag_id) {
                Ok(association) => AttachOutcome {
                    association,
                    created: true,
                },
                // A concurrent attach of the same pair won the insert.
                Err(StorageError::DuplicateKey(key)) => {
                    match self.store.find_by_pair(event_id, tag_id)? {
                        Some(association) => AttachOutcome {
                            association,
                            created: false,
                        },
                        None => return Err(StorageError::DuplicateKey(key).into()),
                    }
                }
                Err(e) => return Err(e.into()),
            },
        };

        debug!(
            association_id = %outcome.association.id,
            %event_id,
            %tag_id,
            created = outcome.created,
            "tag attached to event"
        );
        self.notifier.association_attached(self.store.as_ref(), outcome.association.id);
        Ok(outcome)
    }

    /// Detach `tag_id` from `event_id`. Returns false if they were not linked.
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub fn detach(&self, event_id: EventId, tag_id: TagId) -> EventTagResult<bool> {
        match self.store.find_by_pair(event_id, tag_id)? {
            Some(association) => self.delete(association.id),
            None => Ok(false),
        }
    }

    /// Get an association by id.
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub fn get(&self, id: AssociationId) -> EventTagResult<Option<Association>> {
        Ok(self.store.get(id)?)
    }

    /// Whether the pair is already linked.
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub fn exists(&self, event_id: EventId, tag_id: TagId) -> EventTagResult<bool> {
        Ok(self.store.find_by_pair(event_id, tag_id)?.is_some())
    }

    /// Total number of associations.
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub fn count(&self) -> EventTagResult<usize> {
        Ok(self.store.count()?)
    }

    /// Delete an association. Returns false if it did not exist.
    ///
    /// The detach notification runs first, while the row can still be read.
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub fn delete(&self, id: AssociationId) -> EventTagResult<bool> {
        if self.store.get(id)?.is_none() {
            return Ok(false);
        }
        self.notifier.association_detaching(self.store.as_ref(), id);

        match self.store.delete(id) {
            Ok(()) => {
                debug!(association_id = %id, "tag detached from event");
                Ok(true)
            }
            Err(StorageError::AssociationNotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Soft-delete entry point. Currently removes the row exactly like
    /// [`delete`](Self::delete).
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub fn soft_delete(&self, id: AssociationId) -> EventTagResult<bool> {
        self.delete(id)
    }

    /// Number of associations referencing `tag_id`, across all events.
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub fn count_for_tag(
        &self,
        tag_id: TagId,
        _user: Option<&UserRef>,
    ) -> EventTagResult<usize> {
        Ok(self.store.count_by_tag(tag_id)?)
    }

    /// Events carrying at least one tag selected by the name filters.
    ///
    /// A non-empty `included` list selects tags named in it; a non-empty
    /// `excluded` list drops tags named in it. Exclusion applies to tags,
    /// so an event with one excluded and one other tag is still returned.
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub fn event_ids_for_tags<S: AsRef<str>>(
        &self,
        included: &[S],
        excluded: &[S],
    ) -> EventTagResult<BTreeSet<EventId>> {
        let filter = TagNameFilter::new(
            included.iter().map(AsRef::as_ref),
            excluded.iter().map(AsRef::as_ref),
        );
        let tag_ids = self.tags.find_ids(&filter)?;
        if tag_ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        Ok(self
            .store
            .find_event_ids_by_tags(&tag_ids)?
            .into_iter()
            .collect())
    }
}

impl std::fmt::Debug for TagAssociations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagAssociations")
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use crate::association::{TagCount, TaggedAssociation, TaggedEventAssociation};
    use crate::notify::{NotificationSink, NotifierConfig, PubSubBus, PubSubSink};
    use crate::storage::{InMemoryAssociationStore, InMemoryStores};
    use crate::tag::Tag;

    /// Association store whose next pair lookup misses, as if another
    /// writer inserted the pair between the lookup and the insert.
    struct StaleLookup {
        inner: Arc<InMemoryAssociationStore>,
        miss_next: AtomicBool,
    }

    impl AssociationStore for StaleLookup {
        fn insert(&self, event_id: EventId, tag_id: TagId) -> Result<Association, StorageError> {
            self.inner.insert(event_id, tag_id)
        }

        fn get(&self, id: AssociationId) -> Result<Option<Association>, StorageError> {
            self.inner.get(id)
        }

        fn find_by_pair(
            &self,
            event_id: EventId,
            tag_id: TagId,
        ) -> Result<Option<Association>, StorageError> {
            if self.miss_next.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.find_by_pair(event_id, tag_id)
        }

        fn delete(&self, id: AssociationId) -> Result<(), StorageError> {
            self.inner.delete(id)
        }

        fn count(&self) -> Result<usize, StorageError> {
            self.inner.count()
        }

        fn count_by_tag(&self, tag_id: TagId) -> Result<usize, StorageError> {
            self.inner.count_by_tag(tag_id)
        }

        fn find_event_ids_by_tags(&self, tag_ids: &[TagId]) -> Result<Vec<EventId>, StorageError> {
            self.inner.find_event_ids_by_tags(tag_ids)
        }

        fn find_with_tag(
            &self,
            id: AssociationId,
        ) -> Result<Option<TaggedAssociation>, StorageError> {
            self.inner.find_with_tag(id)
        }

        fn count_grouped_by_tag(
            &self,
            event_id: Option<EventId>,
        ) -> Result<Vec<TagCount>, StorageError> {
            self.inner.count_grouped_by_tag(event_id)
        }

        fn find_with_tag_and_event(&self) -> Result<Vec<TaggedEventAssociation>, StorageError> {
            self.inner.find_with_tag_and_event()
        }
    }

    fn pubsub_notifier(bus: &Arc<PubSubBus>) -> ChangeNotifier {
        let mut cfg = NotifierConfig::default();
        cfg.pubsub.enable = true;
        cfg.pubsub.tag_notifications_enable = true;
        ChangeNotifier::new(cfg).with_pubsub_sink(
            Arc::new(PubSubSink::new(Arc::clone(bus))) as Arc<dyn NotificationSink>
        )
    }

    fn setup(notifier: ChangeNotifier) -> (InMemoryStores, TagAssociations) {
        let stores = InMemoryStores::new();
        for (id, name) in [(1, "x"), (2, "y"), (3, "z")] {
            stores.tags.insert(Tag::new(TagId::new(id), name)).unwrap();
        }
        let assoc = TagAssociations::new(
            Arc::clone(&stores.associations) as Arc<dyn AssociationStore>,
            Arc::clone(&stores.tags) as Arc<dyn TagStore>,
            notifier,
        );
        (stores, assoc)
    }

    #[test]
    fn attach_is_idempotent() {
        let (_, assoc) = setup(ChangeNotifier::disabled());

        let first = assoc.attach(EventId::new(1), TagId::new(1)).unwrap();
        let second = assoc.attach(EventId::new(1), TagId::new(1)).unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.association, second.association);
        assert_eq!(assoc.count().unwrap(), 1);
    }

    #[test]
    fn attach_rejects_empty_ids() {
        let (_, assoc) = setup(ChangeNotifier::disabled());

        assert!(assoc
            .attach(EventId::empty(), TagId::new(1))
            .unwrap_err()
            .is_validation());
        assert!(assoc
            .attach(EventId::new(1), TagId::empty())
            .unwrap_err()
            .is_validation());
        assert_eq!(assoc.count().unwrap(), 0);
    }

    #[test]
    fn delete_and_soft_delete_remove_rows() {
        let (_, assoc) = setup(ChangeNotifier::disabled());
        let a = assoc.attach(EventId::new(1), TagId::new(1)).unwrap().association;
        let b = assoc.attach(EventId::new(1), TagId::new(2)).unwrap().association;

        assert!(assoc.delete(a.id).unwrap());
        assert!(!assoc.delete(a.id).unwrap());
        assert!(assoc.soft_delete(b.id).unwrap());
        assert!(assoc.get(b.id).unwrap().is_none());
        assert_eq!(assoc.count().unwrap(), 0);
    }

    #[test]
    fn detach_by_pair() {
        let (_, assoc) = setup(ChangeNotifier::disabled());
        assoc.attach(EventId::new(4), TagId::new(3)).unwrap();

        assert!(assoc.exists(EventId::new(4), TagId::new(3)).unwrap());
        assert!(assoc.detach(EventId::new(4), TagId::new(3)).unwrap());
        assert!(!assoc.exists(EventId::new(4), TagId::new(3)).unwrap());
        assert!(!assoc.detach(EventId::new(4), TagId::new(3)).unwrap());
    }

    #[test]
    fn count_for_tag_ignores_user() {
        let (_, assoc) = setup(ChangeNotifier::disabled());
        assoc.attach(EventId::new(1), TagId::new(2)).unwrap();
        assoc.attach(EventId::new(2), TagId::new(2)).unwrap();
        assoc.attach(EventId::new(2), TagId::new(1)).unwrap();

        let user = UserRef { id: 9, org_id: 3 };
        assert_eq!(assoc.count_for_tag(TagId::new(2), Some(&user)).unwrap(), 2);
        assert_eq!(assoc.count_for_tag(TagId::new(2), None).unwrap(), 2);
        assert_eq!(assoc.count_for_tag(TagId::new(3), None).unwrap(), 0);
    }

    #[test]
    fn event_ids_for_tags_include_and_exclude() {
        let (_, assoc) = setup(ChangeNotifier::disabled());
        assoc.attach(EventId::new(1), TagId::new(1)).unwrap(); // x
        assoc.attach(EventId::new(1), TagId::new(2)).unwrap(); // y
        assoc.attach(EventId::new(2), TagId::new(2)).unwrap(); // y
        assoc.attach(EventId::new(3), TagId::new(1)).unwrap(); // x only

        let none: [&str; 0] = [];
        let only_x = assoc.event_ids_for_tags(&["x"], &none).unwrap();
        assert_eq!(only_x, BTreeSet::from([EventId::new(1), EventId::new(3)]));

        let not_x = assoc.event_ids_for_tags(&none, &["x"]).unwrap();
        assert_eq!(not_x, BTreeSet::from([EventId::new(1), EventId::new(2)]));
        assert!(!not_x.contains(&EventId::new(3)));

        let everything = assoc.event_ids_for_tags(&none, &none).unwrap();
        assert_eq!(everything.len(), 3);

        let unknown = assoc.event_ids_for_tags(&["nope"], &none).unwrap();
        assert!(unknown.is_empty());
    }

    #[test]
    fn attach_notifies_on_both_branches() {
        let bus = Arc::new(PubSubBus::default());
        let sub = bus.subscribe(None).unwrap();
        let (_, assoc) = setup(pubsub_notifier(&bus));

        assoc.attach(EventId::new(1), TagId::new(1)).unwrap();
        assoc.attach(EventId::new(1), TagId::new(1)).unwrap();

        let messages = sub.drain();
        assert_eq!(messages.len(), 2);
        let body = messages[0].json().unwrap();
        assert_eq!(body["action"], "attached to event");
        assert_eq!(body["Tag"]["name"], "x");
        assert_eq!(body["Tag"]["event_id"], "1");
    }

    #[test]
    fn lost_insert_race_returns_existing_row() {
        let stores = InMemoryStores::new();
        stores.tags.insert(Tag::new(TagId::new(1), "x")).unwrap();
        let winner = stores
            .associations
            .insert(EventId::new(1), TagId::new(1))
            .unwrap();

        let racing = Arc::new(StaleLookup {
            inner: Arc::clone(&stores.associations),
            miss_next: AtomicBool::new(true),
        });
        let bus = Arc::new(PubSubBus::default());
        let sub = bus.subscribe(None).unwrap();
        let assoc = TagAssociations::new(
            Arc::clone(&racing) as Arc<dyn AssociationStore>,
            Arc::clone(&stores.tags) as Arc<dyn TagStore>,
            pubsub_notifier(&bus),
        );

        let outcome = assoc.attach(EventId::new(1), TagId::new(1)).unwrap();

        assert!(!racing.miss_next.load(Ordering::SeqCst));
        assert!(!outcome.created);
        assert_eq!(outcome.association.id, winner.id);
        assert_eq!(assoc.count().unwrap(), 1);

        let messages = sub.drain();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].json().unwrap()["action"], "attached to event");
    }

    #[test]
    fn concurrent_attach_creates_one_row() {
        let (_, assoc) = setup(ChangeNotifier::disabled());
        let assoc = Arc::new(assoc);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let assoc = Arc::clone(&assoc);
                thread::spawn(move || assoc.attach(EventId::new(7), TagId::new(2)).unwrap())
            })
            .collect();
        let outcomes: Vec<AttachOutcome> = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        assert_eq!(assoc.count().unwrap(), 1);
        assert_eq!(outcomes.iter().filter(|o| o.created).count(), 1);
        let id = outcomes[0].association.id;
        assert!(outcomes.iter().all(|o| o.association.id == id));
    }
}
