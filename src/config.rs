//! Configuration for the normalization client.
//!
//! The client receives a [`NormalizerConfig`] value at construction and never
//! reads the process environment itself. [`NormalizerConfig::from_env`] exists
//! for binaries that want to build that value from environment variables.

use std::time::Duration;

use thiserror::Error;

/// Default chat-completions endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.mistral.ai/v1/chat/completions";

/// Default model name.
pub const DEFAULT_MODEL: &str = "mistral-small";

/// Default domain instruction placed in the system prompt.
pub const DEFAULT_DOMAIN_INSTRUCTION: &str = "You are an entity normalization AI specializing in Hebrew text.
- Ensure variations do not contain extra spaces.
- Remove any unnecessary spaces between Hebrew letters.
- Convert similar words to the same variation.
- Do not include English translations.";

/// Errors raised while building configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable or field holds an unusable value.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for [`NormalizationClient`](crate::normalize::NormalizationClient).
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Chat-completions URL.
    pub endpoint: String,
    /// Bearer credential. `None` or blank disables the remote call.
    pub api_key: Option<String>,
    /// Model identifier sent with each request.
    pub model: String,
    /// Completion length cap.
    pub max_tokens: u32,
    /// Per-attempt transport timeout.
    pub timeout: Duration,
    /// Total attempts when the service answers 429.
    pub max_attempts: u32,
    /// Backoff unit; the wait after the i-th 429 is `i * backoff_unit`.
    pub backoff_unit: Duration,
    /// Domain-specific part of the system prompt.
    pub domain_instruction: String,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 150,
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_unit: Duration::from_millis(3000),
            domain_instruction: DEFAULT_DOMAIN_INSTRUCTION.to_string(),
        }
    }
}

impl NormalizerConfig {
    /// Default configuration with the given credential.
    #[must_use]
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Returns the credential if one is present and non-blank.
    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Checks the settings that would make the client unusable.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint cannot be empty".to_string()));
        }
        Ok(self)
    }

    /// Build a configuration from environment variables.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `ENTITY_CANON_API_KEY` (fallback `MISTRAL_API_KEY`) | `api_key` |
    /// | `ENTITY_CANON_ENDPOINT` | `endpoint` |
    /// | `ENTITY_CANON_MODEL` | `model` |
    /// | `ENTITY_CANON_MAX_ATTEMPTS` | `max_attempts` |
    /// | `ENTITY_CANON_BACKOFF_MS` | `backoff_unit` |
    /// | `ENTITY_CANON_TIMEOUT_SECS` | `timeout` |
    ///
    /// Unset variables keep their defaults. A missing key is not an error; the
    /// client then skips the remote call.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{name} is not a valid number: {raw:?}")))
        }

        let mut config = Self {
            api_key: lookup("ENTITY_CANON_API_KEY").or_else(|| lookup("MISTRAL_API_KEY")),
            ..Self::default()
        };
        if let Some(endpoint) = lookup("ENTITY_CANON_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(model) = lookup("ENTITY_CANON_MODEL") {
            config.model = model;
        }
        if let Some(raw) = lookup("ENTITY_CANON_MAX_ATTEMPTS") {
            config.max_attempts = parse("ENTITY_CANON_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("ENTITY_CANON_BACKOFF_MS") {
            config.backoff_unit = Duration::from_millis(parse("ENTITY_CANON_BACKOFF_MS", &raw)?);
        }
        if let Some(raw) = lookup("ENTITY_CANON_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(parse("ENTITY_CANON_TIMEOUT_SECS", &raw)?);
        }
        config.validate()
    }
}
