//! Durable association store.
//!
//! Wraps the shared in-memory index with WAL-backed writes. Reads never
//! touch disk.

use std::fs;
use std::io::Error as IoError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::association::{
    Association, AssociationId, TagCount, TaggedAssociation, TaggedEventAssociation,
};
use crate::event::EventId;
use crate::storage::index::{join_counts, join_tag, join_tag_and_event, AssociationIndex};
use crate::storage::traits::{AssociationStore, EventStore, StorageError, TagStore};
use crate::tag::TagId;

use super::file_lock::DirLock;
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "associations.wal";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn io_err(context: &'static str) -> impl FnOnce(IoError) -> StorageError {
    move |e| StorageError::BackendError(format!("{context}: {e}"))
}

/// Association store persisted through a write-ahead log.
pub struct PersistentAssociationStore {
    dir: PathBuf,
    index: RwLock<AssociationIndex>,
    wal: WriteAheadLog,
    tags: Arc<dyn TagStore>,
    events: Arc<dyn EventStore>,
    _lock: DirLock,
}

impl PersistentAssociationStore {
    /// Open (or create) the store in `dir`, replaying its log.
    ///
    /// # Errors
    /// - `ConnectionError` if another process owns the directory
    /// - `BackendError` on I/O failure or an unreplayable log
    pub fn open(
        dir: &Path,
        config: &PersistentConfig,
        tags: Arc<dyn TagStore>,
        events: Arc<dyn EventStore>,
    ) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(io_err("create store directory"))?;
        let lock = DirLock::acquire(dir).map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(io_err("open wal"))?;

        let mut index = AssociationIndex::default();
        let mut replayed = 0usize;
        for entry in wal.iter().map_err(io_err("read wal"))? {
            let Ok(entry) = entry else {
                // `WriteAheadLog::open` already truncated past the last valid frame.
                break;
            };
            match entry.kind {
                WalEntryKind::AssociationInsert(a) => index.apply_insert(a)?,
                WalEntryKind::AssociationDelete { id } => {
                    index.apply_delete(id)?;
                }
                WalEntryKind::IdFloor { last_id } => index.raise_floor(last_id),
            }
            replayed += 1;
        }
        tracing::debug!(
            dir = %dir.display(),
            replayed,
            rows = index.len(),
            "association wal replayed"
        );

        let store = Self {
            dir: dir.to_path_buf(),
            index: RwLock::new(index),
            wal,
            tags,
            events,
            _lock: lock,
        };

        if store.wal.size_bytes().map_err(io_err("stat wal"))? > config.max_wal_size {
            store.compact()?;
        }
        Ok(store)
    }

    /// Directory holding the store files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rewrite the log so it holds only live rows.
    ///
    /// # Errors
    /// Returns `BackendError` if the rewrite fails; the previous log stays
    /// in place in that case.
    pub fn compact(&self) -> Result<(), StorageError> {
        let index = self.index.read().map_err(|_| lock_err("association.compact"))?;
        let floor = WalEntryKind::IdFloor {
            last_id: index.last_id(),
        };
        let rows = index.rows().into_iter().map(WalEntryKind::AssociationInsert);
        self.wal
            .rewrite(std::iter::once(floor).chain(rows))
            .map_err(io_err("compact wal"))?;
        tracing::debug!(rows = index.len(), "association wal compacted");
        Ok(())
    }
}

impl std::fmt::Debug for PersistentAssociationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentAssociationStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl AssociationStore for PersistentAssociationStore {
    fn insert(&self, event_id: EventId, tag_id: TagId) -> Result<Association, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("association.insert"))?;
        let association = index.prepare_insert(event_id, tag_id)?;
        self.wal
            .append(WalEntryKind::AssociationInsert(association))
            .map_err(io_err("append wal"))?;
        index.apply_insert(association)?;
        Ok(association)
    }

    fn get(&self, id: AssociationId) -> Result<Option<Association>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("association.get"))?;
        Ok(index.get(id))
    }

    fn find_by_pair(
        &self,
        event_id: EventId,
        tag_id: TagId,
    ) -> Result<Option<Association>, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| lock_err("association.find_by_pair"))?;
        Ok(index.find_by_pair(event_id, tag_id))
    }

    fn delete(&self, id: AssociationId) -> Result<(), StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("association.delete"))?;
        if !index.contains(id) {
            return Err(StorageError::AssociationNotFound(id));
        }
        self.wal
            .append(WalEntryKind::AssociationDelete { id })
            .map_err(io_err("append wal"))?;
        index.apply_delete(id).map(|_| ())
    }

    fn count(&self) -> Result<usize, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("association.count"))?;
        Ok(index.len())
    }

    fn count_by_tag(&self, tag_id: TagId) -> Result<usize, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| lock_err("association.count_by_tag"))?;
        Ok(index.count_by_tag(tag_id))
    }

    fn find_event_ids_by_tags(&self, tag_ids: &[TagId]) -> Result<Vec<EventId>, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| lock_err("association.find_event_ids_by_tags"))?;
        Ok(index.event_ids_by_tags(tag_ids))
    }

    fn find_with_tag(&self, id: AssociationId) -> Result<Option<TaggedAssociation>, StorageError> {
        let row = self
            .index
            .read()
            .map_err(|_| lock_err("association.find_with_tag"))?
            .get(id);
        join_tag(self.tags.as_ref(), row)
    }

    fn count_grouped_by_tag(
        &self,
        event_id: Option<EventId>,
    ) -> Result<Vec<TagCount>, StorageError> {
        let counts = self
            .index
            .read()
            .map_err(|_| lock_err("association.count_grouped_by_tag"))?
            .grouped_counts(event_id);
        join_counts(self.tags.as_ref(), counts)
    }

    fn find_with_tag_and_event(&self) -> Result<Vec<TaggedEventAssociation>, StorageError> {
        let rows = self
            .index
            .read()
            .map_err(|_| lock_err("association.find_with_tag_and_event"))?
            .rows();
        join_tag_and_event(self.tags.as_ref(), self.events.as_ref(), rows)
    }
}
