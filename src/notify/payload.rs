//! Notification payloads.
//!
//! The wire shape is fixed by downstream consumers of the host platform:
//!
//! ```text
//! {"Tag": {<every tag field>, "event_id": "<id>"}}
//! ```
//!
//! Transports add a top-level `"action"` key carrying the verb.

use serde::{Deserialize, Serialize};

use crate::association::TaggedAssociation;
use crate::error::NotificationError;
use crate::event::EventId;
use crate::tag::Tag;

/// What happened to the association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeVerb {
    /// The tag was attached to the event.
    Attached,
    /// The tag is about to be detached from the event.
    Detached,
}

impl ChangeVerb {
    /// The verb string published to sinks.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attached => "attached to event",
            Self::Detached => "detached from event",
        }
    }
}

impl std::fmt::Display for ChangeVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tag fields plus the event the association points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifiedTag {
    /// Full tag record.
    #[serde(flatten)]
    pub tag: Tag,
    /// Copied from the association.
    pub event_id: EventId,
}

/// Payload published when an association changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagNotification {
    /// The only top-level key.
    #[serde(rename = "Tag")]
    pub tag: NotifiedTag,
}

impl TagNotification {
    /// Build the payload for a joined association row.
    #[must_use]
    pub fn from_joined(joined: &TaggedAssociation) -> Self {
        Self {
            tag: NotifiedTag {
                tag: joined.tag.clone(),
                event_id: joined.association.event_id,
            },
        }
    }

    /// Encode the payload with the verb added as a trailing `"action"` key.
    ///
    /// Field order is kept exactly as declared.
    ///
    /// # Errors
    /// Returns `NotificationError::Encode` if serialization fails.
    pub fn encode_message(&self, verb: &str) -> Result<String, NotificationError> {
        serde_json::to_string(&Envelope {
            payload: self,
            action: verb,
        })
        .map_err(|e| NotificationError::Encode {
            message: e.to_string(),
        })
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(flatten)]
    payload: &'a TagNotification,
    action: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::association::{Association, AssociationId};
    use crate::tag::TagId;

    fn joined() -> TaggedAssociation {
        TaggedAssociation {
            association: Association {
                id: AssociationId::new(9),
                event_id: EventId::new(42),
                tag_id: TagId::new(7),
            },
            tag: Tag::new(TagId::new(7), "tlp:amber").with_colour("#ffc000"),
        }
    }

    #[test]
    fn test_wire_shape() {
        let payload = TagNotification::from_joined(&joined());
        let json = serde_json::to_value(&payload).unwrap();
        let top = json.as_object().unwrap();

        assert_eq!(top.len(), 1);
        let tag = top["Tag"].as_object().unwrap();
        assert_eq!(tag["id"], "7");
        assert_eq!(tag["name"], "tlp:amber");
        assert_eq!(tag["colour"], "#ffc000");
        assert_eq!(tag["event_id"], "42");
        assert!(!tag.contains_key("association"));
    }

    #[test]
    fn test_event_id_serialized_last() {
        let payload = TagNotification::from_joined(&joined());
        let text = serde_json::to_string(&payload).unwrap();
        assert!(text.starts_with(r#"{"Tag":{"id":"7","name":"tlp:amber""#));
        assert!(text.ends_with(r#""event_id":"42"}}"#));
    }

    #[test]
    fn test_payload_parses_back() {
        let payload = TagNotification::from_joined(&joined());
        let text = serde_json::to_string(&payload).unwrap();
        let parsed: TagNotification = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_message_adds_action() {
        let payload = TagNotification::from_joined(&joined());
        let text = payload.encode_message(ChangeVerb::Detached.as_str()).unwrap();
        assert!(text.ends_with(r#""event_id":"42"},"action":"detached from event"}"#));

        let msg: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(msg["action"], "detached from event");
        assert_eq!(msg["Tag"]["name"], "tlp:amber");
    }

    #[test]
    fn test_verbs() {
        assert_eq!(ChangeVerb::Attached.to_string(), "attached to event");
        assert_eq!(ChangeVerb::Detached.to_string(), "detached from event");
    }
}
