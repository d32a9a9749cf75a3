//! Association row index shared by the storage backends.
//!
//! The index is plain data; backends wrap it in a lock and, for the durable
//! backend, log every mutation before applying it here.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::association::{
    Association, AssociationId, TagCount, TaggedAssociation, TaggedEventAssociation,
};
use crate::event::EventId;
use crate::tag::TagId;

use super::traits::{EventStore, StorageError, TagStore};

#[derive(Debug, Default)]
pub(crate) struct AssociationIndex {
    by_id: BTreeMap<AssociationId, Association>,
    by_pair: HashMap<(EventId, TagId), AssociationId>,
    by_tag: HashMap<TagId, BTreeSet<AssociationId>>,
    last_id: u64,
}

fn pair_key(event_id: EventId, tag_id: TagId) -> String {
    format!("event_id={event_id} tag_id={tag_id}")
}

impl AssociationIndex {
    /// The association a new insert of this pair would create.
    pub fn prepare_insert(
        &self,
        event_id: EventId,
        tag_id: TagId,
    ) -> Result<Association, StorageError> {
        if self.by_pair.contains_key(&(event_id, tag_id)) {
            return Err(StorageError::DuplicateKey(pair_key(event_id, tag_id)));
        }
        let next = self
            .last_id
            .checked_add(1)
            .ok_or_else(|| {
                StorageError::BackendError("association id space exhausted".to_string())
            })?;
        Ok(Association {
            id: AssociationId::new(next),
            event_id,
            tag_id,
        })
    }

    /// Applies an insert with an already-assigned ID.
    pub fn apply_insert(&mut self, association: Association) -> Result<(), StorageError> {
        if self.by_id.contains_key(&association.id) {
            return Err(StorageError::DuplicateKey(association.id.to_string()));
        }
        let pair = (association.event_id, association.tag_id);
        if self.by_pair.contains_key(&pair) {
            return Err(StorageError::DuplicateKey(pair_key(pair.0, pair.1)));
        }
        self.by_pair.insert(pair, association.id);
        self.by_tag
            .entry(association.tag_id)
            .or_default()
            .insert(association.id);
        self.last_id = self.last_id.max(association.id.get());
        self.by_id.insert(association.id, association);
        Ok(())
    }

    pub fn apply_delete(&mut self, id: AssociationId) -> Result<Association, StorageError> {
        let association = self
            .by_id
            .remove(&id)
            .ok_or(StorageError::AssociationNotFound(id))?;
        self.by_pair
            .remove(&(association.event_id, association.tag_id));
        if let Some(set) = self.by_tag.get_mut(&association.tag_id) {
            set.remove(&id);
            if set.is_empty() {
                self.by_tag.remove(&association.tag_id);
            }
        }
        Ok(association)
    }

    #[cfg_attr(not(feature = "persistent"), allow(dead_code))]
    pub fn contains(&self, id: AssociationId) -> bool {
        self.by_id.contains_key(&id)
    }

    #[cfg_attr(not(feature = "persistent"), allow(dead_code))]
    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    #[cfg_attr(not(feature = "persistent"), allow(dead_code))]
    /// Makes sure no ID at or below `last_id` is handed out again.
    pub fn raise_floor(&mut self, last_id: u64) {
        self.last_id = self.last_id.max(last_id);
    }

    pub fn get(&self, id: AssociationId) -> Option<Association> {
        self.by_id.get(&id).copied()
    }

    pub fn find_by_pair(&self, event_id: EventId, tag_id: TagId) -> Option<Association> {
        self.by_pair
            .get(&(event_id, tag_id))
            .and_then(|id| self.by_id.get(id))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn count_by_tag(&self, tag_id: TagId) -> usize {
        self.by_tag.get(&tag_id).map_or(0, BTreeSet::len)
    }

    pub fn event_ids_by_tags(&self, tag_ids: &[TagId]) -> Vec<EventId> {
        let wanted: BTreeSet<TagId> = tag_ids.iter().copied().collect();
        self.by_id
            .values()
            .filter(|a| wanted.contains(&a.tag_id))
            .map(|a| a.event_id)
            .collect()
    }

    /// Per-tag row counts, ascending by tag ID.
    pub fn grouped_counts(&self, event_id: Option<EventId>) -> BTreeMap<TagId, u64> {
        let mut counts = BTreeMap::new();
        for a in self.by_id.values() {
            if event_id.is_some_and(|e| e != a.event_id) {
                continue;
            }
            *counts.entry(a.tag_id).or_insert(0u64) += 1;
        }
        counts
    }

    pub fn rows(&self) -> Vec<Association> {
        self.by_id.values().copied().collect()
    }
}

pub(crate) fn join_tag(
    tags: &dyn TagStore,
    association: Option<Association>,
) -> Result<Option<TaggedAssociation>, StorageError> {
    let Some(association) = association else {
        return Ok(None);
    };
    Ok(tags
        .get(association.tag_id)?
        .map(|tag| TaggedAssociation { association, tag }))
}

pub(crate) fn join_counts(
    tags: &dyn TagStore,
    counts: BTreeMap<TagId, u64>,
) -> Result<Vec<TagCount>, StorageError> {
    let mut out = Vec::with_capacity(counts.len());
    for (tag_id, count) in counts {
        if let Some(tag) = tags.get(tag_id)? {
            out.push(TagCount {
                tag_id,
                name: tag.name,
                count,
            });
        }
    }
    Ok(out)
}

pub(crate) fn join_tag_and_event(
    tags: &dyn TagStore,
    events: &dyn EventStore,
    rows: Vec<Association>,
) -> Result<Vec<TaggedEventAssociation>, StorageError> {
    let mut out = Vec::with_capacity(rows.len());
    for association in rows {
        let Some(tag) = tags.get(association.tag_id)? else {
            continue;
        };
        let Some(event) = events.get(association.event_id)? else {
            continue;
        };
        out.push(TaggedEventAssociation {
            association,
            tag,
            event,
        });
    }
    Ok(out)
}
