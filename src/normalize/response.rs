//! Chat-completion wire types and verdict validation.

use serde::Deserialize;

use super::{NormalizationOutcome, NormalizeError};

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// The JSON object the model is instructed to return.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVerdict {
    #[serde(rename = "match")]
    matched: bool,
    canonical_name: Option<String>,
    variations: Vec<String>,
    category: Option<String>,
}

/// Remove every Unicode whitespace character from `s`.
pub(crate) fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Validate a chat-completions body into an outcome.
pub(crate) fn parse_completion(body: &str) -> Result<NormalizationOutcome, NormalizeError> {
    if body.trim().is_empty() {
        return Err(NormalizeError::EmptyResponse);
    }

    let completion: ChatCompletion = serde_json::from_str(body)
        .map_err(|e| NormalizeError::InvalidJson(format!("completion envelope: {e}")))?;

    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or(NormalizeError::EmptyResponse)?;

    parse_verdict(&content)
}

fn parse_verdict(content: &str) -> Result<NormalizationOutcome, NormalizeError> {
    let value: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| NormalizeError::InvalidJson(format!("message content: {e}")))?;
    if !value.is_object() {
        return Err(NormalizeError::SchemaViolation(
            "message content is not a JSON object".to_string(),
        ));
    }

    let verdict: RawVerdict = serde_json::from_value(value)
        .map_err(|e| NormalizeError::SchemaViolation(e.to_string()))?;

    if !verdict.matched {
        return Ok(NormalizationOutcome::NoMatch);
    }

    let canonical_name = verdict
        .canonical_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            NormalizeError::SchemaViolation("match without canonicalName".to_string())
        })?;

    let variations = verdict
        .variations
        .iter()
        .map(|v| strip_whitespace(v))
        .collect();

    Ok(NormalizationOutcome::Matched {
        canonical_name,
        variations,
        category: verdict.category,
    })
}
