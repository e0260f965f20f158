//! Persistent storage backend.
//!
//! This module provides a durable entity store with:
//! - Write-Ahead Logging (WAL) of full entity snapshots
//! - File locking for single-process ownership of the store directory
//! - CRC32 checksums for corruption detection
//!
//! # Layout
//!
//! ```text
//! <dir>/
//! ├── entity-canon.lock   exclusive flock / LockFileEx
//! └── entities.wal        [magic][frame][frame]...
//! ```

mod codec;
mod file_lock;
mod store;
mod wal;

pub use file_lock::{FileLock, LOCK_FILE_NAME};
pub use store::{PersistentEntityStore, WAL_FILE_NAME};
pub use wal::{WalEntry, WalEntryKind, WalIterator, WriteAheadLog};

use std::path::Path;

use crate::storage::StorageError;

/// Configuration for persistent storage.
#[derive(Debug, Clone, Copy)]
pub struct PersistentConfig {
    /// Whether to fsync after every append (slower but survives power loss).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
        }
    }
}

/// Open or create a persistent entity store at the given path.
///
/// # Errors
/// - If the path cannot be created or accessed
/// - If another process holds the lock
/// - If log replay fails due to corruption
///
/// # Example
/// ```rust,ignore
/// use entity_canon::storage::open_store;
///
/// let store = open_store("./entities", None)?;
/// ```
pub fn open_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentEntityStore, StorageError> {
    PersistentEntityStore::open(path.as_ref(), config.unwrap_or_default())
}
