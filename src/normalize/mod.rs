//! AI-assisted normalization of free-text queries.
//!
//! A [`Normalizer`] turns a query into a [`NormalizationOutcome`]. The
//! production implementation, [`NormalizationClient`], calls a
//! chat-completions service, retries on rate limiting, validates the reply
//! strictly and degrades every failure to [`NormalizationOutcome::NoMatch`].

mod backoff;
mod client;
mod response;
mod transport;

pub use backoff::{BackoffPolicy, Sleeper, ThreadSleeper};
pub use client::NormalizationClient;
pub use transport::{HttpResponse, Transport, TransportError, UreqTransport};

pub(crate) use response::strip_whitespace;

use thiserror::Error;

/// Log kind for failures where the service could not give an answer.
pub const KIND_UPSTREAM_UNAVAILABLE: &str = "upstream_unavailable";

/// Log kind for answers that could not be understood.
pub const KIND_MALFORMED_RESPONSE: &str = "malformed_upstream_response";

/// Result of asking the normalization service about a query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NormalizationOutcome {
    /// No usable answer. Also the fallback for every failure.
    #[default]
    NoMatch,
    /// The service mapped the query to an entity.
    Matched {
        /// Non-blank canonical name.
        canonical_name: String,
        /// Alternate forms, whitespace already removed.
        variations: Vec<String>,
        /// Category as reported, if any.
        category: Option<String>,
    },
}

impl NormalizationOutcome {
    /// True for [`NormalizationOutcome::Matched`].
    #[must_use]
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

/// Anything that can normalize a query.
///
/// Implementations never fail: errors are reported as
/// [`NormalizationOutcome::NoMatch`].
pub trait Normalizer: Send + Sync {
    /// Normalize `query`.
    fn normalize(&self, query: &str) -> NormalizationOutcome;
}

/// Why a normalization attempt produced no answer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// No API key configured.
    #[error("normalization service credentials are missing")]
    MissingCredentials,

    /// Network-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Non-2xx status other than 429.
    #[error("normalization service returned HTTP {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Every attempt was rate limited.
    #[error("normalization service still rate limited after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// The response carried no content.
    #[error("normalization service returned an empty response")]
    EmptyResponse,

    /// The response or its message content is not JSON.
    #[error("normalization response is not valid JSON: {0}")]
    InvalidJson(String),

    /// The message content is JSON but not the expected verdict object.
    #[error("normalization response violates the verdict schema: {0}")]
    SchemaViolation(String),
}

impl NormalizeError {
    /// Structured log kind for this failure.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        if self.is_upstream_unavailable() {
            KIND_UPSTREAM_UNAVAILABLE
        } else {
            KIND_MALFORMED_RESPONSE
        }
    }

    /// True when the service could not be reached or refused to answer.
    #[must_use]
    pub fn is_upstream_unavailable(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials
                | Self::Transport(_)
                | Self::HttpStatus { .. }
                | Self::RetriesExhausted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait is object-safe
    fn _assert_normalizer_object_safe(_: &dyn Normalizer) {}

    #[test]
    fn failure_kinds() {
        assert_eq!(NormalizeError::MissingCredentials.kind(), KIND_UPSTREAM_UNAVAILABLE);
        assert_eq!(
            NormalizeError::Transport(TransportError("refused".into())).kind(),
            KIND_UPSTREAM_UNAVAILABLE
        );
        assert_eq!(
            NormalizeError::HttpStatus { status: 500, body: String::new() }.kind(),
            KIND_UPSTREAM_UNAVAILABLE
        );
        assert_eq!(
            NormalizeError::RetriesExhausted { attempts: 3 }.kind(),
            KIND_UPSTREAM_UNAVAILABLE
        );
        assert_eq!(NormalizeError::EmptyResponse.kind(), KIND_MALFORMED_RESPONSE);
        assert_eq!(NormalizeError::InvalidJson("x".into()).kind(), KIND_MALFORMED_RESPONSE);
        assert_eq!(NormalizeError::SchemaViolation("x".into()).kind(), KIND_MALFORMED_RESPONSE);
    }

    #[test]
    fn default_outcome_is_no_match() {
        assert_eq!(NormalizationOutcome::default(), NormalizationOutcome::NoMatch);
        assert!(!NormalizationOutcome::NoMatch.is_match());
    }
}
