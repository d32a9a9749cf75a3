//! Write-ahead log for the durable association store.
//!
//! Every mutation is appended (and optionally fsynced) before it is applied
//! to the in-memory index; on open the log is replayed to rebuild the index.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec frame]
//! [ENTRY 2: codec frame]
//! ...
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::association::{Association, AssociationId};

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The logged mutation.
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    AssociationInsert(Association),
    AssociationDelete { id: AssociationId },
    /// Written first by compaction so IDs of deleted rows are never reissued.
    IdFloor { last_id: u64 },
}

struct WalWriter {
    file: BufWriter<File>,
    sequence: u64,
}

/// Append-only write-ahead log.
///
/// Thread-safe via an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal.writer")
}

impl WriteAheadLog {
    /// Open or create a WAL file.
    ///
    /// An existing file is scanned for its last valid sequence number; a new
    /// file gets a header.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let exists = path.exists() && fs::metadata(path)?.len() >= 5;

        let sequence = if exists {
            let (sequence, valid_end) = Self::scan(path)?;
            let len = fs::metadata(path)?.len();
            if valid_end < len {
                tracing::warn!(
                    path = %path.display(),
                    discarded_bytes = len - valid_end,
                    "truncating wal after last valid entry"
                );
                OpenOptions::new().write(true).open(path)?.set_len(valid_end)?;
            }
            sequence
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                file: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        })
    }

    fn lock(&self) -> IoResult<MutexGuard<'_, WalWriter>> {
        self.writer.lock().map_err(|_| poisoned())
    }

    /// Append an entry, returning its sequence number.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self.lock()?;
        let sequence = writer.sequence + 1;
        let entry = WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        };
        let encoded = codec::encode(&entry)?;

        writer.file.write_all(&encoded)?;
        writer.file.flush()?;
        if self.sync_on_write {
            writer.file.get_ref().sync_all()?;
        }

        writer.sequence = sequence;
        Ok(sequence)
    }

    /// Iterate over all entries in the WAL.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// The last sequence number written.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock()?.sequence)
    }

    /// The WAL file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Replace the log with `entries`, atomically via a rename.
    ///
    /// Sequence numbers restart at 1.
    pub fn rewrite(&self, entries: impl IntoIterator<Item = WalEntryKind>) -> IoResult<()> {
        let mut writer = self.lock()?;
        writer.file.flush()?;

        let tmp_path = self.path.with_extension("wal.tmp");
        let mut sequence = 0u64;
        {
            let mut tmp = BufWriter::new(
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&tmp_path)?,
            );
            codec::write_header(&mut tmp)?;
            let timestamp = Utc::now();
            for kind in entries {
                sequence += 1;
                tmp.write_all(&codec::encode(&WalEntry {
                    sequence,
                    timestamp,
                    kind,
                })?)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        *writer = WalWriter {
            file: BufWriter::new(file),
            sequence,
        };
        Ok(())
    }

    /// Returns the last valid sequence number and the byte offset just past it.
    #[allow(clippy::while_let_on_iterator)]
    fn scan(path: &Path) -> IoResult<(u64, u64)> {
        let mut iter = WalIterator::new(path)?;
        let mut last = 0;
        let mut valid_end = iter.position()?;
        while let Some(entry) = iter.next() {
            match entry {
                Ok(entry) => {
                    last = entry.sequence;
                    valid_end = iter.position()?;
                }
                Err(e) => {
                    tracing::warn!(sequence = last + 1, error = %e, "wal corruption detected");
                    break;
                }
            }
        }
        Ok((last, valid_end))
    }
}

/// Iterator over WAL entries.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self { reader, file_size })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.stream_position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}
