//! Error types for eventtag.
//!
//! Errors are strongly typed using thiserror so callers can match on the
//! layer that failed: input validation, persistence, or a notification sink.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors raised before anything reaches the persistence layer.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField {
        field: &'static str,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors reported by a notification sink.
///
/// These never propagate out of a store mutation; the change notifier logs
/// and counts them.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Failed to encode notification payload: {message}")]
    Encode {
        message: String,
    },

    #[error("Transport '{transport}' rejected message: {message}")]
    Transport {
        transport: &'static str,
        message: String,
    },

    #[error("Sink '{sink}' is disconnected")]
    Disconnected {
        sink: &'static str,
    },
}

/// Top-level error type for eventtag.
#[derive(Debug, Error)]
pub enum EventTagError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),
}

impl EventTagError {
    /// Shorthand for a missing required field.
    #[must_use]
    pub const fn missing(field: &'static str) -> Self {
        Self::Validation(ValidationError::MissingField { field })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a persistence error.
    #[must_use]
    pub const fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// Returns true if this is a notification error.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        matches!(self, Self::Notification(_))
    }

    /// Returns true if retrying the same call could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Persistence(e) => matches!(e, StorageError::ConnectionError(_)),
            Self::Notification(e) => matches!(e, NotificationError::Transport { .. }),
        }
    }
}

/// Result type alias for eventtag operations.
pub type EventTagResult<T> = Result<T, EventTagError>;
