//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of [`EntityStore`].
//! It is intended for embedded usage, tests, and as a reference implementation.
//! The [`EntityIndex`] it wraps is shared with the write-ahead-logged backend.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::entity::{CanonicalEntity, EntityId, NewEntity};
use crate::storage::traits::{EntityStore, StorageError};

pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Outcome of planning a variation merge against the current index.
#[derive(Debug)]
pub(crate) enum MergePlan {
    /// Everything was already present; carries the current snapshot.
    Unchanged(CanonicalEntity),
    /// The snapshot to store.
    Changed(CanonicalEntity),
}

/// Lookup structures over all stored entities.
#[derive(Debug, Default)]
pub(crate) struct EntityIndex {
    by_id: HashMap<EntityId, CanonicalEntity>,
    by_name: HashMap<String, EntityId>,
    by_variation: HashMap<String, HashSet<EntityId>>,
    by_key: HashMap<String, HashSet<EntityId>>,
}

impl EntityIndex {
    /// Picks the candidate with the smallest canonical name.
    fn pick<'a>(&self, ids: impl IntoIterator<Item = &'a EntityId>) -> Option<CanonicalEntity> {
        ids.into_iter()
            .filter_map(|id| self.by_id.get(id))
            .min_by(|a, b| a.canonical_name.cmp(&b.canonical_name))
            .cloned()
    }

    pub(crate) fn find_by_variation(&self, variation: &str) -> Option<CanonicalEntity> {
        self.by_variation
            .get(variation)
            .and_then(|ids| self.pick(ids))
    }

    pub(crate) fn find_by_phonetic_keys(&self, keys: &[String]) -> Option<CanonicalEntity> {
        let candidates: HashSet<&EntityId> = keys
            .iter()
            .filter_map(|k| self.by_key.get(k))
            .flatten()
            .collect();
        self.pick(candidates)
    }

    pub(crate) fn find_by_canonical_name(&self, name: &str) -> Option<CanonicalEntity> {
        self.by_name
            .get(name)
            .and_then(|id| self.by_id.get(id))
            .cloned()
    }

    pub(crate) fn get(&self, id: EntityId) -> Option<CanonicalEntity> {
        self.by_id.get(&id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Validates a candidate and assigns its identity without storing it.
    pub(crate) fn prepare_insert(&self, candidate: NewEntity) -> Result<CanonicalEntity, StorageError> {
        if candidate.canonical_name.is_empty() {
            return Err(StorageError::BackendError(
                "canonical name cannot be empty".to_string(),
            ));
        }
        if self.by_name.contains_key(&candidate.canonical_name) {
            return Err(StorageError::Conflict {
                canonical_name: candidate.canonical_name,
            });
        }
        Ok(candidate.materialize())
    }

    pub(crate) fn plan_merge(
        &self,
        id: EntityId,
        variation: &str,
        phonetic_keys: &[String],
    ) -> Result<MergePlan, StorageError> {
        let current = self
            .by_id
            .get(&id)
            .ok_or(StorageError::EntityNotFound(id))?;
        Ok(match current.with_variation(variation, phonetic_keys) {
            Some(next) => MergePlan::Changed(next),
            None => MergePlan::Unchanged(current.clone()),
        })
    }

    /// Stores a brand-new entity. Fails if its name or id is taken.
    pub(crate) fn apply_insert(&mut self, entity: CanonicalEntity) -> Result<(), StorageError> {
        if self.by_name.contains_key(&entity.canonical_name) {
            return Err(StorageError::Conflict {
                canonical_name: entity.canonical_name,
            });
        }
        if self.by_id.contains_key(&entity.id) {
            return Err(StorageError::BackendError(format!(
                "duplicate entity id: {}",
                entity.id
            )));
        }
        self.by_name.insert(entity.canonical_name.clone(), entity.id);
        self.index_sets(&entity);
        self.by_id.insert(entity.id, entity);
        Ok(())
    }

    /// Replaces an existing entity with a grown snapshot.
    pub(crate) fn apply_merge(&mut self, entity: CanonicalEntity) -> Result<(), StorageError> {
        let current = self
            .by_id
            .get(&entity.id)
            .ok_or(StorageError::EntityNotFound(entity.id))?;
        if current.canonical_name != entity.canonical_name {
            return Err(StorageError::BackendError(format!(
                "canonical name is immutable: id={} stored={} incoming={}",
                entity.id, current.canonical_name, entity.canonical_name
            )));
        }
        self.index_sets(&entity);
        self.by_id.insert(entity.id, entity);
        Ok(())
    }

    // Sets only grow, so re-indexing a snapshot never needs removals.
    fn index_sets(&mut self, entity: &CanonicalEntity) {
        for v in &entity.variations {
            self.by_variation.entry(v.clone()).or_default().insert(entity.id);
        }
        for k in &entity.phonetic_keys {
            self.by_key.entry(k.clone()).or_default().insert(entity.id);
        }
    }
}

/// Thread-safe in-memory entity store.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    state: RwLock<EntityIndex>,
}

impl InMemoryEntityStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for InMemoryEntityStore {
    fn find_by_variation(&self, variation: &str) -> Result<Option<CanonicalEntity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.find_by_variation"))?;
        Ok(state.find_by_variation(variation))
    }

    fn find_by_phonetic_keys(&self, keys: &[String]) -> Result<Option<CanonicalEntity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.find_by_phonetic_keys"))?;
        Ok(state.find_by_phonetic_keys(keys))
    }

    fn find_by_canonical_name(&self, name: &str) -> Result<Option<CanonicalEntity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.find_by_canonical_name"))?;
        Ok(state.find_by_canonical_name(name))
    }

    fn insert(&self, candidate: NewEntity) -> Result<CanonicalEntity, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.insert"))?;
        let entity = state.prepare_insert(candidate)?;
        state.apply_insert(entity.clone())?;
        Ok(entity)
    }

    fn merge_variation(
        &self,
        id: EntityId,
        variation: &str,
        phonetic_keys: &[String],
    ) -> Result<CanonicalEntity, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.merge_variation"))?;
        match state.plan_merge(id, variation, phonetic_keys)? {
            MergePlan::Unchanged(entity) => Ok(entity),
            MergePlan::Changed(entity) => {
                state.apply_merge(entity.clone())?;
                Ok(entity)
            }
        }
    }

    fn get(&self, id: EntityId) -> Result<Option<CanonicalEntity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.get"))?;
        Ok(state.get(id))
    }

    fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.len"))?;
        Ok(state.len())
    }
}
