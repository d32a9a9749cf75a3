//! The capability every notification channel exposes.

use crate::error::NotificationError;

use super::payload::TagNotification;

/// A channel that receives association change notifications.
///
/// Implementations own their transport's failure semantics; the
/// [`ChangeNotifier`](super::ChangeNotifier) only logs and counts errors.
pub trait NotificationSink: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Publish `payload` to `destination` (a channel or topic) with `verb`.
    ///
    /// # Errors
    /// Returns a `NotificationError` if the message could not be handed to
    /// the transport.
    fn publish(
        &self,
        destination: &str,
        payload: &TagNotification,
        verb: &str,
    ) -> Result<(), NotificationError>;
}
