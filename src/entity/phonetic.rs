//! Phonetic key generation.
//!
//! Keys give spelling-insensitive lookup: two variations that share a key are
//! treated as the same entity. The default strategy only folds case; stronger
//! algorithms plug in through [`PhoneticEncoder`] without touching callers.

/// Strategy that derives lookup keys from a query or variation.
///
/// Implementations must be pure, deterministic and total: every input yields a
/// non-empty sequence of keys and the same input always yields the same keys.
pub trait PhoneticEncoder: Send + Sync {
    /// Returns the keys for `text`, in a stable order, without duplicates.
    fn keys(&self, text: &str) -> Vec<String>;
}

/// Case-folding key strategy: a single key equal to the lowercased text.
///
/// # Examples
///
/// ```
/// use entity_canon::{LowercaseEncoder, PhoneticEncoder};
///
/// assert_eq!(LowercaseEncoder.keys("Apple"), vec!["apple".to_string()]);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct LowercaseEncoder;

impl PhoneticEncoder for LowercaseEncoder {
    fn keys(&self, text: &str) -> Vec<String> {
        vec![text.to_lowercase()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercase_encoder_folds_case() {
        assert_eq!(LowercaseEncoder.keys("Apple"), vec!["apple"]);
        assert_eq!(LowercaseEncoder.keys("APPLE"), LowercaseEncoder.keys("apple"));
    }

    #[test]
    fn lowercase_encoder_is_total() {
        assert_eq!(LowercaseEncoder.keys(""), vec![String::new()]);
        assert_eq!(LowercaseEncoder.keys("תפוח"), vec!["תפוח"]);
    }

    #[test]
    fn lowercase_encoder_handles_unicode_case() {
        assert_eq!(LowercaseEncoder.keys("ÉCOLE"), vec!["école"]);
    }

    #[test]
    fn encoder_is_object_safe() {
        let encoder: std::sync::Arc<dyn PhoneticEncoder> = std::sync::Arc::new(LowercaseEncoder);
        assert_eq!(encoder.keys("Pear"), vec!["pear"]);
    }
}
