//! Storage for canonical entities.
//!
//! [`EntityStore`] is the contract; [`InMemoryEntityStore`] and (with the
//! `persistent` feature) [`PersistentEntityStore`] implement it.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryEntityStore;
pub use traits::{EntityStore, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_store, PersistentConfig, PersistentEntityStore};
