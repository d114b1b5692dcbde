//! Token counting
//!
//! Token counts drive every splitting and budgeting decision, so the
//! counter must never fail: when no exact tokenizer is available (or the
//! one that is errors out) a character-ratio heuristic answers instead.

use crate::error::Result;
use std::sync::Arc;
use tracing::warn;

/// Average characters per token used by the heuristic fallback
const CHARS_PER_TOKEN: f64 = 4.2;

/// Exact tokenizer backend, typically provider-hosted
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str, model: &str) -> Result<usize>;
}

/// Token counter with an optional exact backend and a heuristic fallback
#[derive(Clone, Default)]
pub struct TokenCounter {
    backend: Option<Arc<dyn Tokenizer>>,
}

impl TokenCounter {
    /// Heuristic-only counter
    pub fn heuristic() -> Self {
        Self { backend: None }
    }

    /// Counter that consults `backend` first
    pub fn with_backend(backend: Arc<dyn Tokenizer>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Count tokens in `text` under `model`. Never fails.
    pub fn count(&self, text: &str, model: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        if let Some(backend) = &self.backend {
            match backend.count(text, model) {
                Ok(count) => return count,
                Err(e) => {
                    warn!("Tokenizer failed for model {}: {}, using heuristic", model, e);
                }
            }
        }

        heuristic_count(text)
    }
}

/// `ceil(chars / 4.2)`
pub fn heuristic_count(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;

    struct FixedTokenizer(usize);

    impl Tokenizer for FixedTokenizer {
        fn count(&self, _text: &str, _model: &str) -> Result<usize> {
            Ok(self.0)
        }
    }

    struct BrokenTokenizer;

    impl Tokenizer for BrokenTokenizer {
        fn count(&self, _text: &str, _model: &str) -> Result<usize> {
            Err(RagError::Provider("tokenizer offline".to_string()))
        }
    }

    #[test]
    fn test_heuristic_count() {
        assert_eq!(heuristic_count(""), 0);
        // 42 chars / 4.2 = 10
        assert_eq!(heuristic_count(&"a".repeat(42)), 10);
        // 43 chars / 4.2 = 10.24 -> 11
        assert_eq!(heuristic_count(&"a".repeat(43)), 11);
        // Counted in chars, not bytes
        assert_eq!(heuristic_count(&"é".repeat(42)), 10);
    }

    #[test]
    fn test_backend_preferred() {
        let counter = TokenCounter::with_backend(Arc::new(FixedTokenizer(7)));
        assert_eq!(counter.count("whatever text", "model-x"), 7);
    }

    #[test]
    fn test_backend_failure_falls_back() {
        let counter = TokenCounter::with_backend(Arc::new(BrokenTokenizer));
        assert_eq!(counter.count(&"a".repeat(42), "model-x"), 10);
    }

    #[test]
    fn test_empty_is_zero() {
        let counter = TokenCounter::heuristic();
        assert_eq!(counter.count("", "any"), 0);
    }

    #[test]
    fn test_referential_transparency() {
        let counter = TokenCounter::heuristic();
        let a = counter.count("the same text", "m");
        let b = counter.count("the same text", "m");
        assert_eq!(a, b);
    }
}
