//! Entity layer modules.
//!
//! This module groups the canonical record types and the phonetic key strategy
//! used to index them.

pub mod entity;
pub mod phonetic;

pub use entity::{
    CanonicalEntity, EntityId, NewEntity, CATEGORY_UNCATEGORIZED, CATEGORY_UNKNOWN,
};
pub use phonetic::{LowercaseEncoder, PhoneticEncoder};
