//! Library-bound model contexts
//!
//! [`EmbeddingContext`] binds a library to its embedding model and owns the
//! oversized-text policy and dimension normalization. [`LlmContext`] binds a
//! library to its completion model for summaries, classification and Q&A.
//! Both delegate every provider call to the dispatcher.

use crate::error::{RagError, Result};
use crate::llm::dispatcher::Dispatcher;
use crate::llm::{ChatParams, EmbeddingOp};
use crate::model::Library;
use crate::tokens::TokenCounter;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tolerated overflow before an oversized text is summarized instead of
/// truncated
const TRUNCATION_OVERFLOW_RATIO: f64 = 0.05;

/// Fallback context length when no provider advertises the model
const DEFAULT_CONTEXT_LENGTH: usize = 8192;

/// One generated question/answer pair
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// A library bound to its completion model
#[derive(Clone)]
pub struct LlmContext {
    dispatcher: Arc<Dispatcher>,
    model: String,
}

impl LlmContext {
    pub fn bind(library: &Library, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            model: library.completion_model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run a completion against the bound model
    pub async fn complete(&self, system: &str, user: &str, params: &ChatParams) -> Result<String> {
        self.dispatcher
            .complete(system, user, Some(&self.model), params)
            .await
    }

    /// Summarize `text` into at most `max_tokens` tokens
    pub async fn summarize(&self, text: &str, max_tokens: usize) -> Result<String> {
        let system = format!(
            "Summarize the user's text faithfully in at most {} tokens. \
             Keep terminology intact and do not add commentary.",
            max_tokens
        );
        let params = ChatParams {
            max_tokens: Some(max_tokens as u32),
            temperature: Some(0.3),
            ..Default::default()
        };
        self.complete(&system, text, &params).await
    }

    /// Classify `text` into one of `labels`; returns the raw label string
    pub async fn classify(&self, text: &str, labels: &[&str]) -> Result<String> {
        if labels.is_empty() {
            return Err(RagError::InvalidInput("empty label set".to_string()));
        }
        let system = format!(
            "Classify the user's text into exactly one of these labels: {}. \
             Answer with the label alone.",
            labels.join(", ")
        );
        let params = ChatParams {
            max_tokens: Some(16),
            temperature: Some(0.0),
            ..Default::default()
        };
        let answer = self.complete(&system, text, &params).await?;
        Ok(answer.trim().to_string())
    }

    /// Generate `n` question/answer pairs grounded in `text`
    pub async fn generate_qa(&self, text: &str, n: usize) -> Result<Vec<QaPair>> {
        if n == 0 {
            return Err(RagError::InvalidInput(
                "at least one question is required".to_string(),
            ));
        }
        let system = format!(
            "Write {} question/answer pairs grounded strictly in the user's text. \
             Respond with a JSON array of objects with \"question\" and \"answer\" keys \
             and nothing else.",
            n
        );
        let params = ChatParams {
            temperature: Some(0.4),
            ..Default::default()
        };
        let answer = self.complete(&system, text, &params).await?;

        let json = strip_code_fence(&answer);
        let pairs: Vec<QaPair> = serde_json::from_str(json).map_err(|e| {
            RagError::Provider(format!("unparseable Q&A response: {}", e))
        })?;

        if pairs.is_empty() {
            return Err(RagError::Provider("model returned no Q&A pairs".to_string()));
        }
        Ok(pairs)
    }
}

/// Result of embedding one prepared text
#[derive(Debug, Clone)]
pub struct EmbeddedText {
    /// L2-normalized vector of the library's dimension
    pub vector: Vec<f32>,
    /// Marks recorded when the text had to be summarized or truncated
    pub annotations: HashMap<String, String>,
}

/// A library bound to its embedding model
#[derive(Clone)]
pub struct EmbeddingContext {
    dispatcher: Arc<Dispatcher>,
    llm: LlmContext,
    model: String,
    dimension: usize,
    context_length: usize,
    summary_max_tokens: usize,
    counter: TokenCounter,
}

impl EmbeddingContext {
    pub fn bind(
        library: &Library,
        dispatcher: Arc<Dispatcher>,
        counter: TokenCounter,
        summary_max_tokens: usize,
    ) -> Result<Self> {
        library.validate()?;
        let context_length = dispatcher
            .context_length_for_model(&library.embedding_model)
            .unwrap_or(DEFAULT_CONTEXT_LENGTH);
        let llm = LlmContext::bind(library, Arc::clone(&dispatcher));

        Ok(Self {
            dispatcher,
            llm,
            model: library.embedding_model.clone(),
            dimension: library.embedding_dimension,
            context_length,
            summary_max_tokens,
            counter,
        })
    }

    /// The library-wide embedding dimension D
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Context length L of the bound embedding model, in tokens
    pub fn context_length(&self) -> usize {
        self.context_length
    }

    /// Apply the oversized-text policy.
    ///
    /// Texts over the context length are summarized when the overflow
    /// exceeds 5% of the text, otherwise truncated; either way the returned
    /// annotations record what happened.
    pub async fn prepare(&self, text: &str) -> Result<(String, HashMap<String, String>)> {
        let tokens = self.counter.count(text, &self.model);
        if tokens <= self.context_length {
            return Ok((text.to_string(), HashMap::new()));
        }

        let overflow = (tokens - self.context_length) as f64 / tokens as f64;
        let mut annotations = HashMap::new();

        if overflow > TRUNCATION_OVERFLOW_RATIO {
            debug!(
                "Text of {} tokens exceeds context length {} by {:.1}%, summarizing",
                tokens,
                self.context_length,
                overflow * 100.0
            );
            let summary = self.llm.summarize(text, self.summary_max_tokens).await?;
            annotations.insert("resumo_gerado".to_string(), "true".to_string());
            annotations.insert("tokens_originais".to_string(), tokens.to_string());
            Ok((summary, annotations))
        } else {
            let limit = self.context_length.saturating_mul(4);
            let truncated: String = text.chars().take(limit).collect();
            warn!(
                "Text of {} tokens marginally exceeds context length {}, truncating",
                tokens, self.context_length
            );
            annotations.insert("texto_truncado".to_string(), "true".to_string());
            Ok((truncated, annotations))
        }
    }

    /// Embed one text
    pub async fn embed_one(&self, text: &str, op: EmbeddingOp) -> Result<EmbeddedText> {
        let (prepared, annotations) = self.prepare(text).await?;
        let vector = self
            .dispatcher
            .embed(op, &prepared, Some(&self.model))
            .await?;
        Ok(EmbeddedText {
            vector: self.fit_dimension(vector)?,
            annotations,
        })
    }

    /// Embed a batch of at most 10 texts, preserving input order
    pub async fn embed_batch(
        &self,
        texts: &[String],
        op: EmbeddingOp,
    ) -> Result<Vec<EmbeddedText>> {
        let mut prepared = Vec::with_capacity(texts.len());
        let mut annotations = Vec::with_capacity(texts.len());
        for text in texts {
            let (p, a) = self.prepare(text).await?;
            prepared.push(p);
            annotations.push(a);
        }

        let vectors = self
            .dispatcher
            .embed_batch(op, &prepared, Some(&self.model))
            .await?;

        vectors
            .into_iter()
            .zip(annotations)
            .map(|(vector, annotations)| {
                Ok(EmbeddedText {
                    vector: self.fit_dimension(vector)?,
                    annotations,
                })
            })
            .collect()
    }

    /// Pad or truncate a provider vector to the library dimension, then
    /// L2-normalize. A mismatch beyond 2x in either direction is fatal.
    fn fit_dimension(&self, mut vector: Vec<f32>) -> Result<Vec<f32>> {
        let provided = vector.len();
        if provided != self.dimension {
            if provided > self.dimension * 2 || self.dimension > provided * 2 {
                return Err(RagError::InvalidConfiguration(format!(
                    "provider dimension {} incompatible with library dimension {}",
                    provided, self.dimension
                )));
            }
            warn!(
                "Provider dimension {} != library dimension {}, adjusting",
                provided, self.dimension
            );
            vector.resize(self.dimension, 0.0);
        }

        Ok(l2_normalize(vector))
    }
}

/// L2-normalize a vector; the zero vector is returned unchanged
pub fn l2_normalize(vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector;
    }
    vector.into_iter().map(|x| x / norm).collect()
}

/// Drop a surrounding markdown code fence, if any
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
