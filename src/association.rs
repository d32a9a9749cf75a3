//! The event/tag association entity and its joined views.
//!
//! An association links exactly one event to exactly one tag. The store owns
//! its lifetime; events and tags are referenced by identifier only.

use serde::{Deserialize, Serialize};

use crate::error::{EventTagError, EventTagResult};
use crate::event::{EventId, EventSummary};
use crate::id::define_id;
use crate::tag::{Tag, TagId};

define_id!(
    /// Identifier of an association row.
    AssociationId
);

/// A persisted link between one event and one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Association {
    /// Row identifier assigned by the store.
    pub id: AssociationId,
    /// The tagged event.
    pub event_id: EventId,
    /// The attached tag.
    pub tag_id: TagId,
}

impl Association {
    /// Returns true if this association links `event_id` and `tag_id`.
    #[must_use]
    pub fn links(&self, event_id: EventId, tag_id: TagId) -> bool {
        self.event_id == event_id && self.tag_id == tag_id
    }
}

/// Rejects empty identifiers before anything is written.
///
/// # Errors
/// Returns a validation error naming the first empty field.
pub fn validate_pair(event_id: EventId, tag_id: TagId) -> EventTagResult<()> {
    if event_id.is_empty() {
        return Err(EventTagError::missing("event_id"));
    }
    if tag_id.is_empty() {
        return Err(EventTagError::missing("tag_id"));
    }
    Ok(())
}

/// An association joined with its tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedAssociation {
    /// The association row.
    pub association: Association,
    /// The referenced tag.
    pub tag: Tag,
}

/// An association joined with its tag and event.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEventAssociation {
    /// The association row.
    pub association: Association,
    /// The referenced tag.
    pub tag: Tag,
    /// The referenced event.
    pub event: EventSummary,
}

/// Per-tag association count, joined with the tag name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCount {
    /// The grouped tag.
    pub tag_id: TagId,
    /// The tag's name.
    pub name: String,
    /// Number of associations referencing the tag.
    pub count: u64,
}
