//! Tag aggregation.
//!
//! Read-only views derived from the association set: a global popularity
//! ranking of tags, and score vectors over a caller-supplied set of allowed
//! tag names. Nothing here mutates or notifies.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EventTagResult;
use crate::event::EventId;
use crate::storage::AssociationStore;
use crate::tag::TagId;

/// One entry of the popularity ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortedTagEntry {
    /// The ranked tag.
    pub tag_id: TagId,
    /// The tag's name.
    pub name: String,
    /// Associations referencing the tag.
    #[serde(rename = "eventCount")]
    pub event_count: u64,
}

/// Scores keyed by tag name, with their maximum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagScores {
    /// Score per tag name.
    pub scores: BTreeMap<String, u64>,
    /// Largest value in `scores`, 0 when empty.
    #[serde(rename = "maxScore")]
    pub max_score: u64,
}

impl TagScores {
    fn from_scores(scores: BTreeMap<String, u64>) -> Self {
        let max_score = scores.values().copied().max().unwrap_or(0);
        Self { scores, max_score }
    }

    /// Whether no tag scored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// How a tag's score is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMode {
    /// Number of associations referencing the tag.
    #[default]
    AssociationCount,
    /// Attribute count of the tagged event.
    EventAttribute,
}

/// Computes rankings and score vectors over the association set.
#[derive(Clone)]
pub struct TagAggregator {
    store: Arc<dyn AssociationStore>,
}

impl TagAggregator {
    /// Aggregate over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn AssociationStore>) -> Self {
        Self { store }
    }

    /// Every tag with at least one association, most used first.
    ///
    /// Ties keep ascending tag id order.
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub fn sorted_tag_list(&self) -> EventTagResult<Vec<SortedTagEntry>> {
        let mut entries: Vec<SortedTagEntry> = self
            .store
            .count_grouped_by_tag(None)?
            .into_iter()
            .map(|c| SortedTagEntry {
                tag_id: c.tag_id,
                name: c.name,
                event_count: c.count,
            })
            .collect();
        entries.sort_by(|a, b| b.event_count.cmp(&a.event_count));
        Ok(entries)
    }

    /// Association count per allowed tag name, optionally within one event.
    ///
    /// An empty event id counts across all events.
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub fn tag_scores_by_association_count<S: AsRef<str>>(
        &self,
        event_id: Option<EventId>,
        allowed_tags: &[S],
    ) -> EventTagResult<TagScores> {
        let allowed = allowed_set(allowed_tags);
        if allowed.is_empty() {
            return Ok(TagScores::default());
        }

        let event_id = event_id.filter(|id| !id.is_empty());
        let mut scores = BTreeMap::new();
        for count in self.store.count_grouped_by_tag(event_id)? {
            if allowed.contains(count.name.as_str()) {
                scores.insert(count.name, count.count);
            }
        }
        Ok(TagScores::from_scores(scores))
    }

    /// Attribute count of the tagged event per allowed tag name.
    ///
    /// When a name is attached to several events, the most recently created
    /// association decides its score.
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub fn tag_scores_by_event_attribute<S: AsRef<str>>(
        &self,
        allowed_tags: &[S],
    ) -> EventTagResult<TagScores> {
        let allowed = allowed_set(allowed_tags);
        if allowed.is_empty() {
            return Ok(TagScores::default());
        }

        let mut scores = BTreeMap::new();
        for row in self.store.find_with_tag_and_event()? {
            if allowed.contains(row.tag.name.as_str()) {
                scores.insert(row.tag.name, row.event.attribute_count);
            }
        }
        Ok(TagScores::from_scores(scores))
    }

    /// Score vector in the given mode. `event_id` only applies to
    /// [`ScoreMode::AssociationCount`].
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub fn tag_scores<S: AsRef<str>>(
        &self,
        event_id: Option<EventId>,
        allowed_tags: &[S],
        mode: ScoreMode,
    ) -> EventTagResult<TagScores> {
        match mode {
            ScoreMode::AssociationCount => {
                self.tag_scores_by_association_count(event_id, allowed_tags)
            }
            ScoreMode::EventAttribute => self.tag_scores_by_event_attribute(allowed_tags),
        }
    }
}

impl std::fmt::Debug for TagAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagAggregator").finish_non_exhaustive()
    }
}

fn allowed_set<S: AsRef<str>>(names: &[S]) -> HashSet<&str> {
    names.iter().map(AsRef::as_ref).collect()
}
