//! Provider port and endpoint configuration
//!
//! The narrow interface every embedding/completion backend implements.
//! The dispatcher is the only consumer; contexts never talk to a provider
//! directly.

use crate::error::Result;
use crate::llm::{ChatParams, EmbeddingOp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Registration for one provider endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpointConfig {
    /// Provider name/identifier
    pub name: String,

    /// Base URL for API calls (OpenAI-compatible `/v1` roots)
    pub url: String,

    /// API key (usually from environment variable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Advertised model list; when non-empty it is authoritative and no
    /// network call is made to enumerate models
    #[serde(default)]
    pub models: Vec<String>,

    /// Model name for embeddings
    pub embedding_model: String,

    /// Embedding dimension produced by `embedding_model`
    pub embedding_dimension: usize,

    /// Context length of the embedding model, in tokens
    #[serde(default = "default_context_length")]
    pub context_length: usize,
}

fn default_context_length() -> usize {
    8192
}

impl ProviderEndpointConfig {
    /// Endpoint for a remote cloud provider authenticated by API key
    pub fn cloud(name: impl Into<String>, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            api_key: Some(api_key.into()),
            models: Vec::new(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: 1536,
            context_length: default_context_length(),
        }
    }

    /// Endpoint for a local Ollama server speaking the OpenAI surface
    pub fn ollama(host: impl AsRef<str>) -> Self {
        Self {
            name: "ollama".to_string(),
            url: format!("http://{}:11434/v1", host.as_ref()),
            api_key: None,
            models: Vec::new(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dimension: 768,
            context_length: default_context_length(),
        }
    }

    /// Endpoint for a local LM Studio server speaking the OpenAI surface
    pub fn lm_studio(host: impl AsRef<str>) -> Self {
        Self {
            name: "lm-studio".to_string(),
            url: format!("http://{}:1234/v1", host.as_ref()),
            api_key: None,
            models: Vec::new(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dimension: 768,
            context_length: default_context_length(),
        }
    }
}

/// Trait that all providers must implement
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Models this provider advertises
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Test if the provider is accessible (health check)
    async fn is_online(&self) -> bool {
        self.list_models().await.is_ok()
    }

    /// Generate an embedding for one text
    async fn embed(&self, op: EmbeddingOp, text: &str, model: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for a batch of texts.
    ///
    /// The default implementation embeds sequentially; providers with a
    /// native batch endpoint override it.
    async fn embed_batch(
        &self,
        op: EmbeddingOp,
        texts: &[String],
        model: &str,
    ) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(op, text, model).await?);
        }
        Ok(out)
    }

    /// Generate a completion for a system/user prompt pair
    async fn complete(
        &self,
        system: &str,
        user: &str,
        model: &str,
        params: &ChatParams,
    ) -> Result<String>;
}
