//! Tag records as seen by the association layer.
//!
//! Tags are owned by the host platform. This crate only reads them: to join
//! a tag name onto an association, to resolve names to ids, and to carry the
//! full field set in change notifications.

use serde::{Deserialize, Serialize};

use crate::id::define_id;

define_id!(
    /// Identifier of a tag row.
    TagId
);

/// A tag with the full field set published in notifications.
///
/// Field names are part of the notification wire format and must not be
/// renamed.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub colour: String,
    pub exportable: bool,
    pub org_id: u64,
    pub user_id: u64,
    pub hide_tag: bool,
    pub numerical_value: Option<i64>,
    pub is_galaxy: bool,
    pub is_custom_galaxy: bool,
    pub local_only: bool,
}

impl Tag {
    /// Creates an exportable, visible tag with default colour and no owner.
    #[must_use]
    pub fn new(id: TagId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            colour: "#ffffff".to_string(),
            exportable: true,
            org_id: 0,
            user_id: 0,
            hide_tag: false,
            numerical_value: None,
            is_galaxy: false,
            is_custom_galaxy: false,
            local_only: false,
        }
    }

    /// Sets the display colour.
    #[must_use]
    pub fn with_colour(mut self, colour: impl Into<String>) -> Self {
        self.colour = colour.into();
        self
    }
}

/// Name predicate used to resolve tag names to tag ids.
///
/// The two halves are independent: a non-empty `included` list requires the
/// name to be one of them, a non-empty `excluded` list requires it to be none
/// of them. An empty filter matches every tag.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagNameFilter {
    pub included: Vec<String>,
    pub excluded: Vec<String>,
}

impl TagNameFilter {
    /// Builds a filter from included and excluded tag names.
    #[must_use]
    pub fn new<I, E, S, T>(included: I, excluded: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            included: included.into_iter().map(Into::into).collect(),
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if `name` passes both halves of the filter.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        let included = self.included.is_empty() || self.included.iter().any(|n| n == name);
        let excluded = !self.excluded.is_empty() && self.excluded.iter().any(|n| n == name);
        included && !excluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_wire_field_names() {
        let tag = Tag::new(TagId::new(3), "tlp:green").with_colour("#33ff00");
        let json = serde_json::to_value(&tag).unwrap();
        let obj = json.as_object().unwrap();

        assert_eq!(obj["id"], "3");
        assert_eq!(obj["name"], "tlp:green");
        assert_eq!(obj["colour"], "#33ff00");
        for key in [
            "exportable",
            "org_id",
            "user_id",
            "hide_tag",
            "numerical_value",
            "is_galaxy",
            "is_custom_galaxy",
            "local_only",
        ] {
            assert!(obj.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = TagNameFilter::default();
        assert!(filter.matches("anything"));
    }

    #[test]
    fn test_filter_included_only() {
        let filter = TagNameFilter::new(["x"], Vec::<String>::new());
        assert!(filter.matches("x"));
        assert!(!filter.matches("y"));
    }

    #[test]
    fn test_filter_excluded_only() {
        let filter = TagNameFilter::new(Vec::<String>::new(), ["x"]);
        assert!(!filter.matches("x"));
        assert!(filter.matches("y"));
    }

    #[test]
    fn test_filter_both_halves_compose() {
        let filter = TagNameFilter::new(["x", "y"], ["y"]);
        assert!(filter.matches("x"));
        assert!(!filter.matches("y"));
        assert!(!filter.matches("z"));
    }
}
