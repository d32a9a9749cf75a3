//! Storage layer for eventtag.
//!
//! The traits are the persistence collaborator; the in-memory backend is the
//! reference implementation and the durable backend (feature `persistent`)
//! adds a write-ahead log on top of the same index.

mod index;
pub mod memory;
#[cfg(feature = "persistent")]
pub mod persistent;
mod traits;

pub use memory::{InMemoryAssociationStore, InMemoryEventStore, InMemoryStores, InMemoryTagStore};
pub use traits::{AssociationStore, EventStore, StorageError, TagStore};
