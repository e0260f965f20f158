//! Abstract storage traits for canonical entities.
//!
//! The [`EntityStore`] trait is the whole contract the resolver relies on. Any
//! backend that honours it (in-memory, write-ahead logged, a document database
//! with a unique index) is interchangeable.

use thiserror::Error;

use crate::entity::{CanonicalEntity, EntityId, NewEntity};

/// Errors that can occur during storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// An entity with the same canonical name already exists.
    #[error("Canonical name already exists: {canonical_name}")]
    Conflict {
        /// The contested canonical name.
        canonical_name: String,
    },

    /// Entity not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

impl StorageError {
    /// Returns true if this is a uniqueness violation on insert.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Storage trait for canonical entities.
///
/// # Concurrency
/// - `insert` must be atomic with respect to the canonical-name uniqueness check
/// - `merge_variation` must be idempotent and safe to call concurrently
/// - When several entities match a lookup, the one with the lexicographically
///   smallest canonical name is returned
pub trait EntityStore: Send + Sync {
    /// Find the entity whose variations contain `variation` exactly.
    fn find_by_variation(&self, variation: &str) -> Result<Option<CanonicalEntity>, StorageError>;

    /// Find an entity sharing at least one phonetic key with `keys`.
    fn find_by_phonetic_keys(&self, keys: &[String]) -> Result<Option<CanonicalEntity>, StorageError>;

    /// Find the entity with exactly this canonical name.
    fn find_by_canonical_name(&self, name: &str) -> Result<Option<CanonicalEntity>, StorageError>;

    /// Create a new entity, assigning its identity.
    ///
    /// # Errors
    /// - `Conflict`: if `candidate.canonical_name` is already taken
    fn insert(&self, candidate: NewEntity) -> Result<CanonicalEntity, StorageError>;

    /// Add a variation and its phonetic keys to an entity, returning the post-merge state.
    ///
    /// Adding values that are already present leaves the entity unchanged.
    ///
    /// # Errors
    /// - `EntityNotFound`: if `id` does not exist
    fn merge_variation(
        &self,
        id: EntityId,
        variation: &str,
        phonetic_keys: &[String],
    ) -> Result<CanonicalEntity, StorageError>;

    /// Get an entity by ID.
    fn get(&self, id: EntityId) -> Result<Option<CanonicalEntity>, StorageError>;

    /// Number of stored entities.
    fn len(&self) -> Result<usize, StorageError>;

    /// Returns true if the store holds no entities.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}
