//! Abstract storage traits for eventtag.
//!
//! These traits are the persistence collaborator of the association layer.
//! Relationship traversal is explicit: every join the association layer
//! needs is its own query method returning a joined DTO.

use thiserror::Error;

use crate::association::{
    Association, AssociationId, TagCount, TaggedAssociation, TaggedEventAssociation,
};
use crate::event::{EventId, EventSummary};
use crate::tag::{Tag, TagId, TagNameFilter};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Association not found.
    #[error("Association not found: {0}")]
    AssociationNotFound(AssociationId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Read access to tags owned by the host platform.
pub trait TagStore: Send + Sync {
    /// Insert a tag. Returns error if the ID already exists.
    fn insert(&self, tag: Tag) -> Result<(), StorageError>;

    /// Get a tag by ID.
    fn get(&self, id: TagId) -> Result<Option<Tag>, StorageError>;

    /// IDs of all tags whose name passes `filter`, ascending.
    fn find_ids(&self, filter: &TagNameFilter) -> Result<Vec<TagId>, StorageError>;
}

/// Read access to event summaries owned by the host platform.
pub trait EventStore: Send + Sync {
    /// Insert or replace an event summary.
    fn put(&self, event: EventSummary) -> Result<(), StorageError>;

    /// Get an event summary by ID.
    fn get(&self, id: EventId) -> Result<Option<EventSummary>, StorageError>;
}

/// Storage trait for association rows.
///
/// # Uniqueness
/// `insert` must reject a second row for the same `(event_id, tag_id)` pair
/// with `DuplicateKey`, atomically with respect to concurrent inserts.
///
/// # Ordering
/// Multi-row queries return rows in ascending association ID order, and
/// grouped counts in ascending tag ID order.
pub trait AssociationStore: Send + Sync {
    /// Create a row for the pair and return it with its assigned ID.
    fn insert(&self, event_id: EventId, tag_id: TagId) -> Result<Association, StorageError>;

    /// Get an association by ID.
    fn get(&self, id: AssociationId) -> Result<Option<Association>, StorageError>;

    /// Find the association for an exact `(event_id, tag_id)` pair.
    fn find_by_pair(
        &self,
        event_id: EventId,
        tag_id: TagId,
    ) -> Result<Option<Association>, StorageError>;

    /// Delete an association by ID. Returns error if not found.
    fn delete(&self, id: AssociationId) -> Result<(), StorageError>;

    /// Total number of associations.
    fn count(&self) -> Result<usize, StorageError>;

    /// Number of associations referencing `tag_id`.
    fn count_by_tag(&self, tag_id: TagId) -> Result<usize, StorageError>;

    /// Event IDs of every association referencing one of `tag_ids`.
    ///
    /// One entry per matching row; callers deduplicate.
    fn find_event_ids_by_tags(&self, tag_ids: &[TagId]) -> Result<Vec<EventId>, StorageError>;

    /// Get an association joined with its tag.
    ///
    /// Returns `None` if the association or its tag does not exist.
    fn find_with_tag(&self, id: AssociationId) -> Result<Option<TaggedAssociation>, StorageError>;

    /// Association counts grouped by tag and joined with the tag name,
    /// optionally restricted to one event. Tags missing from the tag store
    /// are left out.
    fn count_grouped_by_tag(
        &self,
        event_id: Option<EventId>,
    ) -> Result<Vec<TagCount>, StorageError>;

    /// Every association joined with its tag and event. Rows whose tag or
    /// event is missing are left out.
    fn find_with_tag_and_event(&self) -> Result<Vec<TaggedEventAssociation>, StorageError>;
}
