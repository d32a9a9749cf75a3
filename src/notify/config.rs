//! Notifier configuration.
//!
//! Each channel is switched by two independent flags: the channel's master
//! switch and its tag-notification switch. The broker additionally needs a
//! non-empty topic. All of it is passed in at construction time.

use serde::Deserialize;

use crate::error::{EventTagError, ValidationError};

/// Default pub/sub channel for tag notifications.
pub const DEFAULT_TAG_CHANNEL: &str = "misp_json_tag";

/// Pub/sub bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// Master switch for the bus.
    pub enable: bool,
    /// Publish tag notifications on the bus.
    pub tag_notifications_enable: bool,
    /// Channel tag notifications are published on.
    pub channel: String,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            enable: false,
            tag_notifications_enable: false,
            channel: DEFAULT_TAG_CHANNEL.to_string(),
        }
    }
}

/// Message broker settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Master switch for the broker.
    pub enable: bool,
    /// Publish tag notifications to the broker.
    pub tag_notifications_enable: bool,
    /// Topic tag notifications are produced to.
    pub tag_notifications_topic: Option<String>,
}

/// Settings for [`ChangeNotifier`](super::ChangeNotifier).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Pub/sub bus channel.
    pub pubsub: PubSubConfig,
    /// Message broker channel.
    pub broker: BrokerConfig,
}

impl NotifierConfig {
    /// Parse a JSON document. Missing keys take their defaults.
    ///
    /// # Errors
    /// Returns a validation error on malformed JSON or invalid settings.
    pub fn from_json_str(text: &str) -> Result<Self, EventTagError> {
        let cfg: Self = serde_json::from_str(text).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        cfg.validate()
    }

    /// Reject settings that enable a channel with nowhere to publish.
    ///
    /// # Errors
    /// - the bus is enabled with an empty channel name
    /// - the broker is enabled with a whitespace-only topic
    pub fn validate(self) -> Result<Self, EventTagError> {
        if self.pubsub_enabled() && self.pubsub.channel.trim().is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "pubsub.channel must not be empty".to_string(),
            }
            .into());
        }
        if let Some(topic) = self.broker_topic() {
            if topic.trim().is_empty() {
                return Err(ValidationError::InvalidConfig {
                    reason: "broker.tag_notifications_topic must not be blank".to_string(),
                }
                .into());
            }
        }
        Ok(self)
    }

    /// Whether tag notifications go to the bus.
    #[must_use]
    pub const fn pubsub_enabled(&self) -> bool {
        self.pubsub.enable && self.pubsub.tag_notifications_enable
    }

    /// The broker topic, if tag notifications go to the broker.
    #[must_use]
    pub fn broker_topic(&self) -> Option<&str> {
        if !(self.broker.enable && self.broker.tag_notifications_enable) {
            return None;
        }
        self.broker
            .tag_notifications_topic
            .as_deref()
            .filter(|t| !t.is_empty())
    }

    /// Whether any channel is enabled.
    #[must_use]
    pub fn any_enabled(&self) -> bool {
        self.pubsub_enabled() || self.broker_topic().is_some()
    }

    /// Convenience: both channels on, broker producing to `topic`.
    #[must_use]
    pub fn all_enabled(topic: impl Into<String>) -> Self {
        Self {
            pubsub: PubSubConfig {
                enable: true,
                tag_notifications_enable: true,
                ..PubSubConfig::default()
            },
            broker: BrokerConfig {
                enable: true,
                tag_notifications_enable: true,
                tag_notifications_topic: Some(topic.into()),
            },
        }
    }
}
