//! Multi-provider LLM layer
//!
//! Common parameter types, the narrow provider port, the routing
//! dispatcher, and the library-bound embedding/completion contexts.

pub mod context;
pub mod dispatcher;
pub mod provider;
pub mod providers;

use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};

pub use context::{EmbeddedText, EmbeddingContext, LlmContext, QaPair};
pub use dispatcher::{DispatchStats, Dispatcher, RoutingStrategy};
pub use provider::{ModelProvider, ProviderEndpointConfig};
pub use providers::provider_from_config;

/// Advisory hint some providers use to adjust embeddings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingOp {
    Query,
    Document,
    Classification,
    Clustering,
}

impl EmbeddingOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingOp::Query => "query",
            EmbeddingOp::Document => "document",
            EmbeddingOp::Classification => "classification",
            EmbeddingOp::Clustering => "clustering",
        }
    }
}

/// Recognised completion options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature, valid range [0, 2]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
}

impl ChatParams {
    /// Validate parameter ranges
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(RagError::InvalidInput(format!(
                    "temperature {} outside [0, 2]",
                    t
                )));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(RagError::InvalidInput(format!(
                    "top_p {} outside [0, 1]",
                    p
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_params_validation() {
        let params = ChatParams {
            temperature: Some(0.7),
            ..Default::default()
        };
        assert!(params.validate().is_ok());

        let params = ChatParams {
            temperature: Some(2.5),
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = ChatParams {
            top_p: Some(1.5),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_chat_params_skip_unset_on_the_wire() {
        let params = ChatParams {
            temperature: Some(0.2),
            ..Default::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("temperature"));
        assert!(!json.contains("max_tokens"));
        assert!(!json.contains("model_override"));
    }

    #[test]
    fn test_embedding_op_labels() {
        assert_eq!(EmbeddingOp::Query.as_str(), "query");
        assert_eq!(EmbeddingOp::Document.as_str(), "document");
        assert_eq!(EmbeddingOp::Classification.as_str(), "classification");
        assert_eq!(EmbeddingOp::Clustering.as_str(), "clustering");
    }
}
