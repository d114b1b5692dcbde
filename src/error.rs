//! Error handling for the RAG core

use thiserror::Error;

/// Result type alias for the RAG core
pub type Result<T> = std::result::Result<T, RagError>;

/// Main error type for the RAG core
#[derive(Error, Debug)]
pub enum RagError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("all providers exhausted: {0}")]
    ProviderUnavailable(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Transport-level provider failure (connection refused, 5xx, bad payload)
    #[error("provider error: {0}")]
    Provider(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Check if the error is retryable at the dispatcher layer.
    ///
    /// Rate limiting is explicitly not retried here; the dispatcher
    /// propagates it to the caller unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::Timeout(_) | RagError::Provider(_))
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            RagError::InvalidInput(_) => "invalid_input",
            RagError::NotFound(_) => "not_found",
            RagError::InvalidConfiguration(_) => "invalid_configuration",
            RagError::ProviderUnavailable(_) => "provider_unavailable",
            RagError::ModelNotFound(_) => "model_not_found",
            RagError::Timeout(_) => "timeout",
            RagError::RateLimited(_) => "rate_limited",
            RagError::Conflict(_) => "conflict",
            RagError::Provider(_) => "provider",
            RagError::Persistence(_) => "persistence",
            RagError::Serialization(_) => "serialization",
            RagError::Io(_) => "io",
        }
    }
}
