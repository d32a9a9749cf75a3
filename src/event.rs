//! Event summaries.
//!
//! Events belong to the host platform; the association layer only needs an
//! event's id and its attribute count for propagate-mode tag scoring.

use serde::{Deserialize, Serialize};

use crate::id::define_id;

define_id!(
    /// Identifier of an event row.
    EventId
);

/// The slice of an event that tag scoring reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    /// Event identifier.
    pub id: EventId,
    /// Number of attributes on the event, maintained by the host platform.
    pub attribute_count: u64,
}

impl EventSummary {
    /// Creates an event summary.
    #[must_use]
    pub const fn new(id: EventId, attribute_count: u64) -> Self {
        Self { id, attribute_count }
    }
}
