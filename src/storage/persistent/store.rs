//! Write-ahead-logged entity store.
//!
//! Reads are served from the same in-memory index as [`InMemoryEntityStore`];
//! every mutation is appended to the log while the index write lock is held and
//! applied only after the append succeeds.
//!
//! [`InMemoryEntityStore`]: crate::storage::InMemoryEntityStore

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::entity::{CanonicalEntity, EntityId, NewEntity};
use crate::storage::memory::{lock_err, EntityIndex, MergePlan};
use crate::storage::traits::{EntityStore, StorageError};

use super::file_lock::FileLock;
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

/// File name of the entity log inside the store directory.
pub const WAL_FILE_NAME: &str = "entities.wal";

/// Durable [`EntityStore`] backed by a directory holding a lock file and a write-ahead log.
pub struct PersistentEntityStore {
    dir: PathBuf,
    _lock: FileLock,
    wal: WriteAheadLog,
    index: RwLock<EntityIndex>,
}

impl std::fmt::Debug for PersistentEntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentEntityStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl PersistentEntityStore {
    /// Open or create a store in `dir`, replaying its log.
    ///
    /// # Errors
    /// - `BackendError` if the directory cannot be created or locked, or the log is corrupt
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| {
            StorageError::BackendError(format!("failed to create store directory: {e}"))
        })?;

        let lock = FileLock::acquire(dir)
            .map_err(|e| StorageError::BackendError(format!("failed to acquire lock: {e}")))?;

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE_NAME), config.sync_on_write)
            .map_err(|e| StorageError::BackendError(format!("failed to open entity log: {e}")))?;

        let index = Self::replay(&wal)?;
        tracing::info!(dir = %dir.display(), entities = index.len(), "opened persistent entity store");

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            index: RwLock::new(index),
        })
    }

    /// The store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn replay(wal: &WriteAheadLog) -> Result<EntityIndex, StorageError> {
        let mut index = EntityIndex::default();
        let iter = wal
            .iter()
            .map_err(|e| StorageError::BackendError(format!("failed to read entity log: {e}")))?;

        for entry in iter {
            let entry = entry
                .map_err(|e| StorageError::SerializationError(format!("corrupted log entry: {e}")))?;
            let applied = match entry.kind {
                WalEntryKind::Insert(entity) => index.apply_insert(entity),
                WalEntryKind::Merge(entity) => index.apply_merge(entity),
            };
            applied.map_err(|e| {
                StorageError::BackendError(format!(
                    "failed to replay log entry {}: {e}",
                    entry.sequence
                ))
            })?;
        }
        Ok(index)
    }

    fn append(&self, kind: WalEntryKind) -> Result<(), StorageError> {
        self.wal
            .append(kind)
            .map(|_| ())
            .map_err(|e| StorageError::BackendError(format!("failed to append to entity log: {e}")))
    }
}

impl EntityStore for PersistentEntityStore {
    fn find_by_variation(&self, variation: &str) -> Result<Option<CanonicalEntity>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("persistent.find_by_variation"))?;
        Ok(index.find_by_variation(variation))
    }

    fn find_by_phonetic_keys(&self, keys: &[String]) -> Result<Option<CanonicalEntity>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("persistent.find_by_phonetic_keys"))?;
        Ok(index.find_by_phonetic_keys(keys))
    }

    fn find_by_canonical_name(&self, name: &str) -> Result<Option<CanonicalEntity>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("persistent.find_by_canonical_name"))?;
        Ok(index.find_by_canonical_name(name))
    }

    fn insert(&self, candidate: NewEntity) -> Result<CanonicalEntity, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("persistent.insert"))?;
        let entity = index.prepare_insert(candidate)?;
        self.append(WalEntryKind::Insert(entity.clone()))?;
        index.apply_insert(entity.clone())?;
        Ok(entity)
    }

    fn merge_variation(
        &self,
        id: EntityId,
        variation: &str,
        phonetic_keys: &[String],
    ) -> Result<CanonicalEntity, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("persistent.merge_variation"))?;
        match index.plan_merge(id, variation, phonetic_keys)? {
            MergePlan::Unchanged(entity) => Ok(entity),
            MergePlan::Changed(entity) => {
                self.append(WalEntryKind::Merge(entity.clone()))?;
                index.apply_merge(entity.clone())?;
                Ok(entity)
            }
        }
    }

    fn get(&self, id: EntityId) -> Result<Option<CanonicalEntity>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("persistent.get"))?;
        Ok(index.get(id))
    }

    fn len(&self) -> Result<usize, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("persistent.len"))?;
        Ok(index.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path) -> PersistentEntityStore {
        PersistentEntityStore::open(dir, PersistentConfig { sync_on_write: false }).unwrap()
    }

    #[test]
    fn inserts_and_merges_survive_reopen() {
        let dir = tempdir().unwrap();
        let id = {
            let store = open(dir.path());
            let e = store
                .insert(NewEntity::new("apple").variation("apple").phonetic_key("apple"))
                .unwrap();
            store.merge_variation(e.id, "Apple", &["apple".to_string()]).unwrap();
            // Redundant merge writes nothing.
            store.merge_variation(e.id, "Apple", &["apple".to_string()]).unwrap();
            assert_eq!(store.wal.current_sequence().unwrap(), 2);
            e.id
        };

        let store = open(dir.path());
        assert_eq!(store.len().unwrap(), 1);
        let e = store.get(id).unwrap().unwrap();
        assert_eq!(e.variations, vec!["apple", "Apple"]);
        assert_eq!(e.version, 2);
        assert_eq!(store.find_by_variation("Apple").unwrap().unwrap().id, id);
        assert_eq!(
            store.find_by_phonetic_keys(&["apple".to_string()]).unwrap().unwrap().id,
            id
        );
    }

    #[test]
    fn uniqueness_holds_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path());
            store.insert(NewEntity::new("apple").variation("apple")).unwrap();
        }

        let store = open(dir.path());
        let err = store.insert(NewEntity::new("apple").variation("x")).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.wal.current_sequence().unwrap(), 1);
    }

    #[test]
    fn failed_append_never_reappears_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path());
            store.wal.fail_next_write();
            let err = store
                .insert(NewEntity::new("apple").variation("apple"))
                .unwrap_err();
            assert!(err.to_string().contains("failed to append"));
            assert_eq!(store.len().unwrap(), 0);

            // Retrying the same insert must not leave two records for one name.
            store.insert(NewEntity::new("apple").variation("apple")).unwrap();
            assert_eq!(store.wal.current_sequence().unwrap(), 1);
        }

        let store = open(dir.path());
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.find_by_canonical_name("apple").unwrap().is_some());
        assert_eq!(store.wal.current_sequence().unwrap(), 1);
    }

    #[test]
    fn failed_merge_leaves_entity_unchanged() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let e = store.insert(NewEntity::new("apple").variation("apple")).unwrap();

        store.wal.fail_next_write();
        assert!(store.merge_variation(e.id, "Apple", &[]).is_err());
        assert_eq!(store.get(e.id).unwrap().unwrap().variations, vec!["apple"]);

        store.merge_variation(e.id, "Apple", &[]).unwrap();
        drop(store);

        let store = open(dir.path());
        let e = store.get(e.id).unwrap().unwrap();
        assert_eq!(e.variations, vec!["apple", "Apple"]);
        assert_eq!(e.version, 2);
    }

    #[test]
    fn second_open_of_locked_directory_fails() {
        let dir = tempdir().unwrap();
        let _store = open(dir.path());
        let err = PersistentEntityStore::open(dir.path(), PersistentConfig::default()).unwrap_err();
        assert!(err.to_string().contains("lock"));
    }

    #[test]
    fn corrupt_log_fails_open() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path());
            store.insert(NewEntity::new("a").variation("a")).unwrap();
            store.insert(NewEntity::new("b").variation("b")).unwrap();
        }

        let path = dir.path().join(WAL_FILE_NAME);
        let mut bytes = fs::read(&path).unwrap();
        // Flip a payload byte inside the first frame (header is 5 bytes, frame head 5 more).
        bytes[12] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        assert!(PersistentEntityStore::open(dir.path(), PersistentConfig::default()).is_err());
    }
}
