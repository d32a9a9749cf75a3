//! In-memory storage backend.
//!
//! This module provides thread-safe in-memory implementations of the storage traits.
//! It is intended for embedded usage, tests, and as a reference implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::association::{
    Association, AssociationId, TagCount, TaggedAssociation, TaggedEventAssociation,
};
use crate::event::{EventId, EventSummary};
use crate::storage::index::{join_counts, join_tag, join_tag_and_event, AssociationIndex};
use crate::storage::traits::{AssociationStore, EventStore, StorageError, TagStore};
use crate::tag::{Tag, TagId, TagNameFilter};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct TagState {
    by_id: BTreeMap<TagId, Tag>,
    by_name: HashMap<String, TagId>,
}

/// Thread-safe in-memory tag store.
///
/// Tag names are unique, as in the host platform's tag table.
#[derive(Debug, Default)]
pub struct InMemoryTagStore {
    state: RwLock<TagState>,
}

impl InMemoryTagStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TagStore for InMemoryTagStore {
    fn insert(&self, tag: Tag) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("tag.insert"))?;
        if state.by_id.contains_key(&tag.id) {
            return Err(StorageError::DuplicateKey(tag.id.to_string()));
        }
        if state.by_name.contains_key(&tag.name) {
            return Err(StorageError::DuplicateKey(tag.name));
        }
        state.by_name.insert(tag.name.clone(), tag.id);
        state.by_id.insert(tag.id, tag);
        Ok(())
    }

    fn get(&self, id: TagId) -> Result<Option<Tag>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("tag.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn find_ids(&self, filter: &TagNameFilter) -> Result<Vec<TagId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("tag.find_ids"))?;
        Ok(state
            .by_id
            .values()
            .filter(|t| filter.matches(&t.name))
            .map(|t| t.id)
            .collect())
    }
}

/// Thread-safe in-memory event summary store.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<HashMap<EventId, EventSummary>>,
}

impl InMemoryEventStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for InMemoryEventStore {
    fn put(&self, event: EventSummary) -> Result<(), StorageError> {
        let mut events = self.events.write().map_err(|_| lock_err("event.put"))?;
        events.insert(event.id, event);
        Ok(())
    }

    fn get(&self, id: EventId) -> Result<Option<EventSummary>, StorageError> {
        let events = self.events.read().map_err(|_| lock_err("event.get"))?;
        Ok(events.get(&id).copied())
    }
}

/// Thread-safe in-memory association store.
///
/// Joins read through the tag and event stores it was built with.
pub struct InMemoryAssociationStore {
    index: RwLock<AssociationIndex>,
    tags: Arc<dyn TagStore>,
    events: Arc<dyn EventStore>,
}

impl InMemoryAssociationStore {
    /// Create a new empty store joining against `tags` and `events`.
    #[must_use]
    pub fn new(tags: Arc<dyn TagStore>, events: Arc<dyn EventStore>) -> Self {
        Self {
            index: RwLock::new(AssociationIndex::default()),
            tags,
            events,
        }
    }
}

impl std::fmt::Debug for InMemoryAssociationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryAssociationStore")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl AssociationStore for InMemoryAssociationStore {
    fn insert(&self, event_id: EventId, tag_id: TagId) -> Result<Association, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("association.insert"))?;
        let association = index.prepare_insert(event_id, tag_id)?;
        index.apply_insert(association)?;
        Ok(association)
    }

    fn get(&self, id: AssociationId) -> Result<Option<Association>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("association.get"))?;
        Ok(index.get(id))
    }

    fn find_by_pair(
        &self,
        event_id: EventId,
        tag_id: TagId,
    ) -> Result<Option<Association>, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| lock_err("association.find_by_pair"))?;
        Ok(index.find_by_pair(event_id, tag_id))
    }

    fn delete(&self, id: AssociationId) -> Result<(), StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("association.delete"))?;
        index.apply_delete(id).map(|_| ())
    }

    fn count(&self) -> Result<usize, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("association.count"))?;
        Ok(index.len())
    }

    fn count_by_tag(&self, tag_id: TagId) -> Result<usize, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| lock_err("association.count_by_tag"))?;
        Ok(index.count_by_tag(tag_id))
    }

    fn find_event_ids_by_tags(&self, tag_ids: &[TagId]) -> Result<Vec<EventId>, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| lock_err("association.find_event_ids_by_tags"))?;
        Ok(index.event_ids_by_tags(tag_ids))
    }

    fn find_with_tag(&self, id: AssociationId) -> Result<Option<TaggedAssociation>, StorageError> {
        let row = {
            let index = self
                .index
                .read()
                .map_err(|_| lock_err("association.find_with_tag"))?;
            index.get(id)
        };
        join_tag(self.tags.as_ref(), row)
    }

    fn count_grouped_by_tag(
        &self,
        event_id: Option<EventId>,
    ) -> Result<Vec<TagCount>, StorageError> {
        let counts = {
            let index = self
                .index
                .read()
                .map_err(|_| lock_err("association.count_grouped_by_tag"))?;
            index.grouped_counts(event_id)
        };
        join_counts(self.tags.as_ref(), counts)
    }

    fn find_with_tag_and_event(&self) -> Result<Vec<TaggedEventAssociation>, StorageError> {
        let rows = {
            let index = self
                .index
                .read()
                .map_err(|_| lock_err("association.find_with_tag_and_event"))?;
            index.rows()
        };
        join_tag_and_event(self.tags.as_ref(), self.events.as_ref(), rows)
    }
}

/// Bundle of linked in-memory stores.
#[derive(Debug)]
pub struct InMemoryStores {
    /// Tag store.
    pub tags: Arc<InMemoryTagStore>,
    /// Event summary store.
    pub events: Arc<InMemoryEventStore>,
    /// Association store, joining against `tags` and `events`.
    pub associations: Arc<InMemoryAssociationStore>,
}

impl InMemoryStores {
    /// Create a new bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for InMemoryStores {
    fn default() -> Self {
        let tags = Arc::new(InMemoryTagStore::new());
        let events = Arc::new(InMemoryEventStore::new());
        let associations = Arc::new(InMemoryAssociationStore::new(
            Arc::clone(&tags) as Arc<dyn TagStore>,
            Arc::clone(&events) as Arc<dyn EventStore>,
        ));
        Self {
            tags,
            events,
            associations,
        }
    }
}
