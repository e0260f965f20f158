//! Canonical entity types and identity management.
//!
//! A [`CanonicalEntity`] is the single authoritative record that a family of
//! spellings resolves to. Identity (`id`, `canonical_name`) never changes after
//! creation; `variations` and `phonetic_keys` only ever grow.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category assigned to records created from an unmatched raw query.
pub const CATEGORY_UNKNOWN: &str = "unknown";

/// Category assigned to normalization-seeded records without a usable category.
pub const CATEGORY_UNCATEGORIZED: &str = "Uncategorized";

/// Globally unique, stable entity identifier.
///
/// Assigned by the store on insert and never changed afterwards.
///
/// # Examples
///
/// ```
/// use entity_canon::EntityId;
///
/// let id = EntityId::new();
/// assert!(!id.is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Creates a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an entity ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Pushes `value` unless an equal string is already present.
///
/// Returns true if the vector changed.
fn push_unique(set: &mut Vec<String>, value: &str) -> bool {
    if set.iter().any(|existing| existing == value) {
        return false;
    }
    set.push(value.to_string());
    true
}

/// The authoritative record a set of text variations resolves to.
///
/// # Examples
///
/// ```
/// use entity_canon::NewEntity;
///
/// let entity = NewEntity::new("apple")
///     .variation("apple")
///     .phonetic_key("apple")
///     .materialize();
/// assert_eq!(entity.canonical_name, "apple");
/// assert_eq!(entity.version, 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEntity {
    /// Store-assigned identifier.
    pub id: EntityId,

    /// Globally unique canonical name.
    pub canonical_name: String,

    /// Known spellings, without duplicates.
    #[serde(default)]
    pub variations: Vec<String>,

    /// Lookup keys derived from `variations`, without duplicates.
    #[serde(default)]
    pub phonetic_keys: Vec<String>,

    /// Classification label.
    pub category: String,

    /// Reserved for semantic matching; not consumed by resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_vector: Option<Vec<f32>>,

    /// When the entity was created.
    pub created_at: DateTime<Utc>,

    /// When a variation was last added.
    pub updated_at: DateTime<Utc>,

    /// Starts at 1; incremented by every merge that changes the record.
    pub version: u64,
}

impl CanonicalEntity {
    /// Returns true if `variation` is a known spelling of this entity.
    #[must_use]
    pub fn has_variation(&self, variation: &str) -> bool {
        self.variations.iter().any(|v| v == variation)
    }

    /// Returns true if any of `keys` is one of this entity's phonetic keys.
    #[must_use]
    pub fn matches_any_key(&self, keys: &[String]) -> bool {
        keys.iter().any(|k| self.phonetic_keys.contains(k))
    }

    /// Produces the snapshot that results from adding a variation and its keys.
    ///
    /// Returns `None` when both the variation and every key are already present,
    /// so redundant merges are observable no-ops.
    #[must_use]
    pub fn with_variation(&self, variation: &str, keys: &[String]) -> Option<Self> {
        let mut next = self.clone();
        let mut changed = push_unique(&mut next.variations, variation);
        for key in keys {
            changed |= push_unique(&mut next.phonetic_keys, key);
        }
        if !changed {
            return None;
        }
        next.updated_at = Utc::now();
        next.version = next.version.saturating_add(1);
        Some(next)
    }

    /// Returns the number of known variations.
    #[must_use]
    pub fn variation_count(&self) -> usize {
        self.variations.len()
    }
}

impl PartialEq for CanonicalEntity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CanonicalEntity {}

impl std::hash::Hash for CanonicalEntity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// An insert candidate: a canonical entity before the store assigns its identity.
///
/// Variations and phonetic keys keep set semantics as they are added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntity {
    /// Canonical name the record will be created with.
    pub canonical_name: String,
    /// Seed variations.
    pub variations: Vec<String>,
    /// Seed phonetic keys.
    pub phonetic_keys: Vec<String>,
    /// Classification label.
    pub category: String,
    /// Reserved embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_vector: Option<Vec<f32>>,
}

impl NewEntity {
    /// Starts a candidate with the given canonical name and the `"unknown"` category.
    #[must_use]
    pub fn new(canonical_name: impl Into<String>) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            variations: Vec::new(),
            phonetic_keys: Vec::new(),
            category: CATEGORY_UNKNOWN.to_string(),
            embedding_vector: None,
        }
    }

    /// Adds a seed variation (ignored if already present).
    #[must_use]
    pub fn variation(mut self, variation: impl AsRef<str>) -> Self {
        push_unique(&mut self.variations, variation.as_ref());
        self
    }

    /// Adds several seed variations.
    #[must_use]
    pub fn variations<I, S>(mut self, variations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for v in variations {
            push_unique(&mut self.variations, v.as_ref());
        }
        self
    }

    /// Adds a phonetic key (ignored if already present).
    #[must_use]
    pub fn phonetic_key(mut self, key: impl AsRef<str>) -> Self {
        push_unique(&mut self.phonetic_keys, key.as_ref());
        self
    }

    /// Adds several phonetic keys.
    #[must_use]
    pub fn phonetic_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for k in keys {
            push_unique(&mut self.phonetic_keys, k.as_ref());
        }
        self
    }

    /// Sets the category.
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Assigns a fresh identity and timestamps, producing a version-1 entity.
    #[must_use]
    pub fn materialize(self) -> CanonicalEntity {
        let now = Utc::now();
        CanonicalEntity {
            id: EntityId::new(),
            canonical_name: self.canonical_name,
            variations: self.variations,
            phonetic_keys: self.phonetic_keys,
            category: self.category,
            embedding_vector: self.embedding_vector,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }
}
