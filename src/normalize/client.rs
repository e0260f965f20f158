//! Chat-completions client with 429 backoff.

use crate::config::NormalizerConfig;

use super::backoff::{BackoffPolicy, Sleeper, ThreadSleeper};
use super::response::parse_completion;
use super::transport::{HttpResponse, Transport, UreqTransport};
use super::{NormalizationOutcome, NormalizeError, Normalizer};

const RESPONSE_FORMAT: &str = r#"Always respond in valid JSON format:
{"match": true/false, "canonicalName": "Entity Name", "variations": ["variation1", "variation2", "variation3"], "category": "Category Name (if applicable)"}
Only return JSON. No explanations."#;

const MAX_ERROR_BODY: usize = 512;

/// [`Normalizer`] backed by a chat-completions service.
#[derive(Debug)]
pub struct NormalizationClient<T: Transport = UreqTransport, S: Sleeper = ThreadSleeper> {
    config: NormalizerConfig,
    backoff: BackoffPolicy,
    transport: T,
    sleeper: S,
}

impl NormalizationClient {
    /// Client over HTTP that sleeps on the calling thread between retries.
    #[must_use]
    pub fn new(config: NormalizerConfig) -> Self {
        let transport = UreqTransport::new(config.timeout);
        Self::with_parts(config, transport, ThreadSleeper)
    }
}

impl<T: Transport, S: Sleeper> NormalizationClient<T, S> {
    /// Client with explicit transport and sleeper.
    ///
    /// At least one attempt is always made, even if `config.max_attempts` is 0.
    pub fn with_parts(config: NormalizerConfig, transport: T, sleeper: S) -> Self {
        let backoff = BackoffPolicy {
            max_attempts: config.max_attempts.max(1),
            unit: config.backoff_unit,
        };
        Self {
            config,
            backoff,
            transport,
            sleeper,
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Active backoff policy.
    #[must_use]
    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Normalize `query`, reporting why no answer was produced.
    ///
    /// # Errors
    /// Every [`NormalizeError`] variant; see [`NormalizeError::kind`].
    pub fn try_normalize(&self, query: &str) -> Result<NormalizationOutcome, NormalizeError> {
        let key = self
            .config
            .credential()
            .ok_or(NormalizeError::MissingCredentials)?;

        let body = self.request_body(query);
        let response = self.send_with_backoff(key, &body)?;
        parse_completion(&response.body)
    }

    fn request_body(&self, query: &str) -> serde_json::Value {
        let system = format!("{}\n{RESPONSE_FORMAT}", self.config.domain_instruction);
        let user = format!(
            "Normalize the entity: \"{query}\" and provide at least 3 variations with no extra spaces."
        );
        serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": self.config.max_tokens,
        })
    }

    fn send_with_backoff(
        &self,
        key: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, NormalizeError> {
        for attempt in 1..=self.backoff.max_attempts {
            let response = self.transport.post_json(&self.config.endpoint, key, body)?;

            if response.status == 429 {
                let delay = self.backoff.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = self.backoff.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "normalization service rate limited"
                );
                self.sleeper.sleep(delay);
                continue;
            }

            if !response.is_success() {
                let mut body = response.body;
                if body.len() > MAX_ERROR_BODY {
                    let mut end = MAX_ERROR_BODY;
                    while !body.is_char_boundary(end) {
                        end -= 1;
                    }
                    body.truncate(end);
                }
                return Err(NormalizeError::HttpStatus {
                    status: response.status,
                    body,
                });
            }

            return Ok(response);
        }

        Err(NormalizeError::RetriesExhausted {
            attempts: self.backoff.max_attempts,
        })
    }
}

impl<T: Transport, S: Sleeper> Normalizer for NormalizationClient<T, S> {
    fn normalize(&self, query: &str) -> NormalizationOutcome {
        match self.try_normalize(query) {
            Ok(outcome) => {
                tracing::debug!(query, matched = outcome.is_match(), "normalization complete");
                outcome
            }
            Err(e) => {
                tracing::warn!(query, kind = e.kind(), error = %e, "normalization failed, using no-match");
                NormalizationOutcome::NoMatch
            }
        }
    }
}
