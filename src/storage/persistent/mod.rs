//! Durable storage backend for associations.
//!
//! - Write-ahead log for crash recovery
//! - Exclusive directory lock for single-process access
//! - CRC32 frame checksums for corruption detection
//!
//! Tags and events are not persisted here; the host platform owns them and
//! the store joins against whatever [`TagStore`](crate::storage::TagStore)
//! and [`EventStore`](crate::storage::EventStore) it is given.

mod codec;
mod file_lock;
mod store;
mod wal;

pub use file_lock::DirLock;
pub use store::PersistentAssociationStore;
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{EventTagError, ValidationError};
use crate::storage::{EventStore, TagStore};

/// Configuration for persistent storage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
    /// WAL size in bytes above which the log is compacted on open.
    pub max_wal_size: u64,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            max_wal_size: 16 * 1024 * 1024,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Reject settings that would compact on every open.
    ///
    /// # Errors
    /// Returns a validation error if `max_wal_size` is below 4 KiB.
    pub fn validate(self) -> Result<Self, EventTagError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "max_wal_size must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            }
            .into());
        }
        Ok(self)
    }
}

/// Open or create a durable association store at `path`.
///
/// # Errors
/// - invalid configuration
/// - another process holds the store lock
/// - the directory or log cannot be read or written
///
/// # Example
/// ```rust,ignore
/// use eventtag::storage::persistent::open_association_store;
///
/// let stores = eventtag::InMemoryStores::new();
/// let associations = open_association_store(
///     "./event_tags",
///     None,
///     stores.tags.clone() as Arc<dyn TagStore>,
///     stores.events.clone() as Arc<dyn EventStore>,
/// )?;
/// ```
pub fn open_association_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
    tags: Arc<dyn TagStore>,
    events: Arc<dyn EventStore>,
) -> Result<PersistentAssociationStore, EventTagError> {
    let cfg = config.unwrap_or_default().validate()?;
    Ok(PersistentAssociationStore::open(path.as_ref(), &cfg, tags, events)?)
}
