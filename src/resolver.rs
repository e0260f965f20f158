//! Tiered entity resolution.
//!
//! A query is answered by the first tier that produces an entity:
//!
//! 1. exact variation lookup
//! 2. phonetic-key lookup
//! 3. the [`Normalizer`], either pointing at an existing canonical name or
//!    seeding a new entity
//! 4. a fallback entity named after the query itself
//!
//! Inserts are optimistic. When another caller wins the race for a canonical
//! name the store reports `Conflict`; the resolver re-reads the winner and
//! merges the query into it instead of failing.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::{
    CanonicalEntity, LowercaseEncoder, NewEntity, PhoneticEncoder, CATEGORY_UNCATEGORIZED,
    CATEGORY_UNKNOWN,
};
use crate::error::{ResolveError, ResolveResult, ValidationError};
use crate::normalize::{strip_whitespace, NormalizationOutcome, Normalizer};
use crate::storage::{EntityStore, StorageError};

/// Which tier produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// The query is a known variation.
    Variation,
    /// The query shares a phonetic key with a stored entity.
    Phonetic,
    /// The normalizer named an entity that already existed.
    NormalizedExisting,
    /// The normalizer's answer seeded a new entity.
    NormalizedCreated,
    /// No tier matched; a new entity named after the query was created.
    Fallback,
    /// No tier matched, but another caller created the entity named after
    /// the query first, and that record was used.
    FallbackExisting,
}

impl MatchTier {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Variation => "variation",
            Self::Phonetic => "phonetic",
            Self::NormalizedExisting => "normalized_existing",
            Self::NormalizedCreated => "normalized_created",
            Self::Fallback => "fallback",
            Self::FallbackExisting => "fallback_existing",
        }
    }
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entity together with the tier that found it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// The post-merge entity.
    pub entity: CanonicalEntity,
    /// The tier that produced it.
    pub tier: MatchTier,
}

/// Maps free-text queries to canonical entities.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn EntityStore>,
    normalizer: Arc<dyn Normalizer>,
    encoder: Arc<dyn PhoneticEncoder>,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

impl Resolver {
    /// Resolver over `store` using `normalizer` and the lowercase phonetic encoder.
    pub fn new(store: Arc<dyn EntityStore>, normalizer: Arc<dyn Normalizer>) -> Self {
        Self {
            store,
            normalizer,
            encoder: Arc::new(LowercaseEncoder),
        }
    }

    /// Replace the phonetic encoder.
    #[must_use]
    pub fn with_encoder(mut self, encoder: Arc<dyn PhoneticEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Resolve `query` to its canonical entity.
    ///
    /// # Errors
    /// - `Validation` for an empty query
    /// - `StoreUnavailable` for any store failure other than a recovered conflict
    /// - `Internal` if a conflicting record vanishes before it can be re-read
    pub fn resolve(&self, query: &str) -> ResolveResult<CanonicalEntity> {
        self.resolve_detailed(query).map(|r| r.entity)
    }

    /// Resolve `query`, also reporting which tier answered.
    ///
    /// # Errors
    /// Same as [`Resolver::resolve`].
    pub fn resolve_detailed(&self, query: &str) -> ResolveResult<Resolution> {
        if query.is_empty() {
            return Err(ValidationError::EmptyQuery.into());
        }

        let keys = self.encoder.keys(query);

        let (entity, tier) = if let Some(hit) = self.store.find_by_variation(query)? {
            (hit, MatchTier::Variation)
        } else if let Some(hit) = self.store.find_by_phonetic_keys(&keys)? {
            (hit, MatchTier::Phonetic)
        } else {
            match self.normalizer.normalize(query) {
                NormalizationOutcome::Matched {
                    canonical_name,
                    variations,
                    category,
                } => self.resolve_normalized(
                    query,
                    &keys,
                    &canonical_name,
                    &variations,
                    category.as_deref(),
                )?,
                NormalizationOutcome::NoMatch => {
                    let candidate = NewEntity::new(query)
                        .variation(query)
                        .phonetic_keys(&keys)
                        .category(CATEGORY_UNKNOWN);
                    self.insert_or_reread(candidate)?
                }
            }
        };

        let entity = self.ensure_variation(entity, query, &keys)?;
        tracing::debug!(
            query,
            tier = %tier,
            entity_id = %entity.id,
            canonical_name = %entity.canonical_name,
            "resolved query"
        );
        Ok(Resolution { entity, tier })
    }

    fn resolve_normalized(
        &self,
        query: &str,
        query_keys: &[String],
        canonical_name: &str,
        variations: &[String],
        category: Option<&str>,
    ) -> ResolveResult<(CanonicalEntity, MatchTier)> {
        if let Some(existing) = self.store.find_by_canonical_name(canonical_name)? {
            return Ok((existing, MatchTier::NormalizedExisting));
        }

        let seeded: Vec<String> = variations
            .iter()
            .map(|v| strip_whitespace(v))
            .filter(|v| !v.is_empty())
            .collect();

        let mut candidate = NewEntity::new(canonical_name)
            .variations(&seeded)
            .variation(query)
            .phonetic_keys(query_keys)
            .category(seed_category(category));
        for v in &seeded {
            candidate = candidate.phonetic_keys(self.encoder.keys(v));
        }

        match self.store.insert(candidate) {
            Ok(created) => {
                tracing::info!(
                    query,
                    entity_id = %created.id,
                    canonical_name = %created.canonical_name,
                    variations = created.variations.len(),
                    "created entity from normalization"
                );
                Ok((created, MatchTier::NormalizedCreated))
            }
            Err(StorageError::Conflict { .. }) => {
                Ok((self.reread_after_conflict(canonical_name)?, MatchTier::NormalizedExisting))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn insert_or_reread(&self, candidate: NewEntity) -> ResolveResult<(CanonicalEntity, MatchTier)> {
        let name = candidate.canonical_name.clone();
        match self.store.insert(candidate) {
            Ok(created) => {
                tracing::info!(entity_id = %created.id, canonical_name = %created.canonical_name, "created fallback entity");
                Ok((created, MatchTier::Fallback))
            }
            Err(StorageError::Conflict { .. }) => {
                Ok((self.reread_after_conflict(&name)?, MatchTier::FallbackExisting))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reread_after_conflict(&self, canonical_name: &str) -> ResolveResult<CanonicalEntity> {
        tracing::debug!(canonical_name, "insert lost race, re-reading winner");
        self.store
            .find_by_canonical_name(canonical_name)?
            .ok_or_else(|| {
                ResolveError::internal(format!(
                    "entity {canonical_name:?} reported as conflicting but not found"
                ))
            })
    }

    fn ensure_variation(
        &self,
        entity: CanonicalEntity,
        query: &str,
        keys: &[String],
    ) -> ResolveResult<CanonicalEntity> {
        if entity.has_variation(query) {
            return Ok(entity);
        }
        Ok(self.store.merge_variation(entity.id, query, keys)?)
    }
}

/// Category for an AI-seeded entity.
fn seed_category(category: Option<&str>) -> &str {
    match category.map(str::trim) {
        Some(c) if !c.is_empty() && c != CATEGORY_UNKNOWN => c,
        _ => CATEGORY_UNCATEGORIZED,
    }
}
