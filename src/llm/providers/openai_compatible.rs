//! OpenAI-compatible provider implementation
//!
//! One implementation covers all three reference endpoint kinds: the remote
//! cloud provider and the two local servers, which all speak the same `/v1`
//! surface.

use crate::error::{RagError, Result};
use crate::llm::provider::{ModelProvider, ProviderEndpointConfig};
use crate::llm::providers::base::{HttpProviderClient, OpenAIEndpoint};
use crate::llm::{ChatParams, EmbeddingOp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    // Accepted by the local servers, ignored by the cloud endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeat_penalty: Option<f32>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

/// Chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: WireMessage,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

/// Embedding request; `input` carries one string per text so a whole batch
/// goes out in a single call
#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponseData {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelData>,
}

#[derive(Debug, Deserialize)]
struct ModelData {
    id: String,
}

/// Provider over any OpenAI-speaking endpoint
pub struct OpenAICompatibleProvider<E: OpenAIEndpoint> {
    endpoint: E,
    client: HttpProviderClient,
    config: ProviderEndpointConfig,
}

impl<E: OpenAIEndpoint> OpenAICompatibleProvider<E> {
    pub fn new(endpoint: E, config: ProviderEndpointConfig, timeout_secs: u64) -> Result<Self> {
        let client = HttpProviderClient::new(timeout_secs)?;
        Ok(Self {
            endpoint,
            client,
            config,
        })
    }

    fn embed_request(&self, op: EmbeddingOp, texts: &[String], model: &str) -> EmbeddingRequest {
        EmbeddingRequest {
            model: model.to_string(),
            input: texts.to_vec(),
            task_type: match op {
                // Only non-default hints go on the wire
                EmbeddingOp::Document => None,
                other => Some(other.as_str().to_string()),
            },
        }
    }

    async fn request_embeddings(&self, request: &EmbeddingRequest) -> Result<Vec<Vec<f32>>> {
        let url = self.endpoint.build_url("embeddings");
        let headers = self.endpoint.auth_headers();

        let response: EmbeddingResponseData =
            self.client.post_json(&url, request, &headers).await?;

        if response.data.len() != request.input.len() {
            return Err(RagError::Provider(format!(
                "expected {} embeddings, got {}",
                request.input.len(),
                response.data.len()
            )));
        }

        // The API may return entries out of order; index is authoritative
        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl<E: OpenAIEndpoint> ModelProvider for OpenAICompatibleProvider<E> {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        // A configured list is authoritative
        if !self.config.models.is_empty() {
            return Ok(self.config.models.clone());
        }

        debug!("Listing models from {}", self.name());

        let url = self.endpoint.build_url("models");
        let headers = self.endpoint.auth_headers();
        let response: ModelsResponse = self.client.get(&url, &headers).await?;

        let models: Vec<String> = response.data.into_iter().map(|m| m.id).collect();
        info!("Found {} models from {}", models.len(), self.name());
        Ok(models)
    }

    async fn embed(&self, op: EmbeddingOp, text: &str, model: &str) -> Result<Vec<f32>> {
        debug!(
            "Generating embedding with {} for text length {}",
            self.name(),
            text.len()
        );

        let request = self.embed_request(op, &[text.to_string()], model);
        let mut vectors = self.request_embeddings(&request).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Provider("no embeddings in response".to_string()))
    }

    async fn embed_batch(
        &self,
        op: EmbeddingOp,
        texts: &[String],
        model: &str,
    ) -> Result<Vec<Vec<f32>>> {
        debug!(
            "Generating {} embeddings with {} in one call",
            texts.len(),
            self.name()
        );

        let request = self.embed_request(op, texts, model);
        self.request_embeddings(&request).await
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        model: &str,
        params: &ChatParams,
    ) -> Result<String> {
        debug!("Generating completion with {} using {}", self.name(), model);

        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(WireMessage {
            role: "user".to_string(),
            content: user.to_string(),
        });

        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            repeat_penalty: params.repeat_penalty,
            stream: false,
        };

        let url = self.endpoint.build_url("chat/completions");
        let headers = self.endpoint.auth_headers();

        let response: ChatCompletionResponse =
            self.client.post_json(&url, &request, &headers).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Provider("no choices in response".to_string()))?;

        info!(
            "Generated completion with {}",
            response.model.as_deref().unwrap_or(model)
        );
        Ok(choice.message.content)
    }
}
