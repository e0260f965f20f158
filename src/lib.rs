//! # entity-canon - Tiered Entity Resolution
//!
//! entity-canon maps free-text queries (names, spellings, transliterations) to a
//! single canonical entity record, creating that record the first time a query
//! is seen and folding every later spelling into it.
//!
//! ## Core Concepts
//!
//! - **CanonicalEntity**: The authoritative record a set of variations resolves to
//! - **Variation**: A known alternate form of an entity's name
//! - **Phonetic key**: A normalized form used for spelling-independent lookup
//! - **Normalizer**: An AI-backed oracle that names the entity behind a query
//! - **Tier**: The resolution stage that produced an answer
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use entity_canon::{InMemoryEntityStore, NormalizationClient, NormalizerConfig, Resolver};
//!
//! let store = Arc::new(InMemoryEntityStore::new());
//! let client = NormalizationClient::new(NormalizerConfig::from_env()?);
//! let resolver = Resolver::new(store, Arc::new(client));
//!
//! let entity = resolver.resolve("Apple")?;
//! println!("{} ({})", entity.canonical_name, entity.id);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod entity;
pub mod error;

// Collaborators
pub mod normalize;
pub mod storage;

// Resolution
pub mod resolver;
pub mod runtime;

// Re-export primary types at crate root for convenience
pub use config::{ConfigError, NormalizerConfig};
pub use entity::{
    CanonicalEntity, EntityId, LowercaseEncoder, NewEntity, PhoneticEncoder,
    CATEGORY_UNCATEGORIZED, CATEGORY_UNKNOWN,
};
pub use error::{ExecutionError, ResolveError, ResolveResult, ValidationError};
pub use normalize::{
    BackoffPolicy, NormalizationClient, NormalizationOutcome, NormalizeError, Normalizer,
};
pub use resolver::{MatchTier, Resolution, Resolver};
pub use runtime::{ResolutionHandle, ResolverRuntime, RuntimeConfig};
pub use storage::{EntityStore, InMemoryEntityStore, StorageError};

#[cfg(feature = "persistent")]
pub use storage::{open_store, PersistentConfig, PersistentEntityStore};
