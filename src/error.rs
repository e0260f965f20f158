//! Error types for entity resolution.
//!
//! All errors are strongly typed using thiserror. Only validation, store and
//! execution failures leave the resolver; normalization failures are collapsed
//! into a no-match result inside the client and never surface here.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors that occur before any lookup is attempted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The query is empty.
    #[error("Query cannot be empty")]
    EmptyQuery,
}

/// Execution errors raised by the resolver runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The worker queue is at capacity.
    #[error("Resolver queue is full (capacity: {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The worker pool has shut down or dropped the reply.
    #[error("Resolver worker pool disconnected")]
    Disconnected,

    /// The caller stopped waiting for a result.
    #[error("Resolution timed out after {duration_ms}ms")]
    Timeout {
        /// How long the caller waited.
        duration_ms: u64,
    },
}

/// Top-level error type for resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The query was rejected before reaching the store.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The underlying store failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StorageError),

    /// The runtime could not execute the request.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// An invariant the resolver relies on did not hold.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the fault.
        message: String,
    },
}

impl ResolveError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if the store failed.
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::StoreUnavailable(e) => matches!(e, StorageError::ConnectionError(_)),
            Self::Execution(e) => matches!(
                e,
                ExecutionError::QueueFull { .. } | ExecutionError::Timeout { .. }
            ),
        }
    }
}

/// Result type alias for resolution operations.
pub type ResolveResult<T> = Result<T, ResolveError>;
