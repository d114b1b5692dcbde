//! LLM Dispatcher
//!
//! Uniform routing layer over N provider endpoints. Every outbound model
//! call in the crate goes through here: the dispatcher owns retry policy,
//! failover, routing strategy, health checks, and request statistics.

use crate::error::{RagError, Result};
use crate::llm::provider::{ModelProvider, ProviderEndpointConfig};
use crate::llm::{ChatParams, EmbeddingOp};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Hard cap on one embedding batch
pub const MAX_EMBED_BATCH: usize = 10;

/// How long a health probe result stays valid
const HEALTH_CACHE_TTL: Duration = Duration::from_secs(30);

/// Base delay of the exponential backoff between retry attempts
const BACKOFF_BASE_MS: u64 = 250;

/// Backoff ceiling
const BACKOFF_CAP_MS: u64 = 4_000;

/// Routing strategy, selected per process by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Always provider 0
    PrimaryOnly,
    /// Try providers in order until one succeeds
    Failover,
    /// Monotonic counter mod N
    RoundRobin,
    /// Embedding ops to provider 0, completion ops to provider 1
    Specialized,
    /// Execute on 0 and 1, return 0's result, warn on low agreement
    DualVerification,
    /// Long or analytical prompts to provider 1, the rest to provider 0
    SmartRouting,
    /// Choose the provider advertising the requested model
    ModelBased,
}

impl Default for RoutingStrategy {
    fn default() -> Self {
        Self::Failover
    }
}

/// Snapshot of the dispatcher counters
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStats {
    pub primary_requests: u64,
    pub secondary_requests: u64,
    pub failover_events: u64,
    pub total_requests: u64,
    /// Percentage of provider selections that went to provider 0
    pub primary_share: f64,
    pub secondary_share: f64,
}

#[derive(Default)]
struct Counters {
    primary: AtomicU64,
    secondary: AtomicU64,
    failovers: AtomicU64,
    total: AtomicU64,
}

struct HealthEntry {
    healthy: bool,
    checked_at: Instant,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Embedding,
    Completion,
}

/// Multi-provider dispatcher
pub struct Dispatcher {
    providers: Vec<Arc<dyn ModelProvider>>,
    endpoints: Vec<ProviderEndpointConfig>,
    strategy: RoutingStrategy,
    max_retries: u32,
    attempt_timeout: Duration,
    round_robin: AtomicU64,
    counters: Counters,
    health_cache: Mutex<HashMap<usize, HealthEntry>>,
}

impl Dispatcher {
    pub fn new(
        providers: Vec<Arc<dyn ModelProvider>>,
        endpoints: Vec<ProviderEndpointConfig>,
        strategy: RoutingStrategy,
        max_retries: u32,
        timeout_seconds: u64,
    ) -> Result<Self> {
        if providers.is_empty() {
            return Err(RagError::InvalidConfiguration(
                "at least one provider is required".to_string(),
            ));
        }
        if providers.len() != endpoints.len() {
            return Err(RagError::InvalidConfiguration(format!(
                "{} providers but {} endpoint configs",
                providers.len(),
                endpoints.len()
            )));
        }
        let needs_two = matches!(
            strategy,
            RoutingStrategy::Specialized
                | RoutingStrategy::DualVerification
                | RoutingStrategy::SmartRouting
        );
        if needs_two && providers.len() < 2 {
            return Err(RagError::InvalidConfiguration(format!(
                "strategy {:?} requires at least two providers",
                strategy
            )));
        }

        Ok(Self {
            providers,
            endpoints,
            strategy,
            max_retries: max_retries.max(1),
            attempt_timeout: Duration::from_secs(timeout_seconds),
            round_robin: AtomicU64::new(0),
            counters: Counters::default(),
            health_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    /// Endpoint registration of provider `index`
    pub fn endpoint(&self, index: usize) -> Option<&ProviderEndpointConfig> {
        self.endpoints.get(index)
    }

    /// Context length of the embedding model, if any provider advertises it
    pub fn context_length_for_model(&self, model: &str) -> Option<usize> {
        self.endpoints
            .iter()
            .find(|e| e.embedding_model == model)
            .map(|e| e.context_length)
    }

    /// Union of every provider's advertised models, in provider order
    pub async fn list_all_models(&self) -> Result<Vec<String>> {
        let mut all = Vec::new();
        for provider in &self.providers {
            match provider.list_models().await {
                Ok(models) => all.extend(models),
                Err(e) => warn!("Could not list models from {}: {}", provider.name(), e),
            }
        }
        Ok(all)
    }

    /// Find the provider advertising `model`: exact match first, then
    /// substring, then case-insensitive.
    pub async fn find_provider_by_model(&self, model: &str) -> Result<usize> {
        let mut advertised: Vec<Vec<String>> = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            advertised.push(provider.list_models().await.unwrap_or_default());
        }

        for (i, models) in advertised.iter().enumerate() {
            if models.iter().any(|m| m == model) {
                return Ok(i);
            }
        }
        for (i, models) in advertised.iter().enumerate() {
            if models.iter().any(|m| m.contains(model)) {
                return Ok(i);
            }
        }
        let lower = model.to_lowercase();
        for (i, models) in advertised.iter().enumerate() {
            if models
                .iter()
                .any(|m| m.to_lowercase() == lower || m.to_lowercase().contains(&lower))
            {
                return Ok(i);
            }
        }

        Err(RagError::ModelNotFound(model.to_string()))
    }

    /// Health probe with a 30 second cache
    pub async fn healthy(&self, index: usize) -> bool {
        let Some(provider) = self.providers.get(index) else {
            return false;
        };

        {
            let cache = self.health_cache.lock().await;
            if let Some(entry) = cache.get(&index) {
                if entry.checked_at.elapsed() < HEALTH_CACHE_TTL {
                    return entry.healthy;
                }
            }
        }

        let healthy = provider.is_online().await;
        let mut cache = self.health_cache.lock().await;
        cache.insert(
            index,
            HealthEntry {
                healthy,
                checked_at: Instant::now(),
            },
        );
        healthy
    }

    /// Consistent snapshot of the request counters
    pub fn stats(&self) -> DispatchStats {
        let primary = self.counters.primary.load(Ordering::Relaxed);
        let secondary = self.counters.secondary.load(Ordering::Relaxed);
        let selections = primary + secondary;
        let (primary_share, secondary_share) = if selections == 0 {
            (0.0, 0.0)
        } else {
            (
                primary as f64 * 100.0 / selections as f64,
                secondary as f64 * 100.0 / selections as f64,
            )
        };

        DispatchStats {
            primary_requests: primary,
            secondary_requests: secondary,
            failover_events: self.counters.failovers.load(Ordering::Relaxed),
            total_requests: self.counters.total.load(Ordering::Relaxed),
            primary_share,
            secondary_share,
        }
    }

    pub fn reset_stats(&self) {
        self.counters.primary.store(0, Ordering::Relaxed);
        self.counters.secondary.store(0, Ordering::Relaxed);
        self.counters.failovers.store(0, Ordering::Relaxed);
        self.counters.total.store(0, Ordering::Relaxed);
    }

    /// Generate an embedding for one text
    pub async fn embed(
        &self,
        op: EmbeddingOp,
        text: &str,
        model: Option<&str>,
    ) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::InvalidInput("empty text".to_string()));
        }

        let owned = text.to_string();
        let mut vectors = self
            .execute(
                CallKind::Embedding,
                text,
                model,
                move |provider, model: String| {
                    let text = owned.clone();
                    Box::pin(async move {
                        provider
                            .embed(op, &text, &model)
                            .await
                            .map(|v| vec![v])
                    })
                },
                compare_vector_batches,
            )
            .await?;

        vectors
            .pop()
            .ok_or_else(|| RagError::Provider("provider returned no embedding".to_string()))
    }

    /// Generate embeddings for up to [`MAX_EMBED_BATCH`] texts
    pub async fn embed_batch(
        &self,
        op: EmbeddingOp,
        texts: &[String],
        model: Option<&str>,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(RagError::InvalidInput("empty batch".to_string()));
        }
        if texts.len() > MAX_EMBED_BATCH {
            return Err(RagError::InvalidInput(format!(
                "batch of {} exceeds maximum {}",
                texts.len(),
                MAX_EMBED_BATCH
            )));
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(RagError::InvalidInput("empty text in batch".to_string()));
        }

        let owned = texts.to_vec();
        // Longest text represents the batch for routing heuristics
        let sample = texts
            .iter()
            .max_by_key(|t| t.len())
            .map(String::as_str)
            .unwrap_or_default();
        self.execute(
            CallKind::Embedding,
            sample,
            model,
            move |provider, model: String| {
                let texts = owned.clone();
                Box::pin(async move { provider.embed_batch(op, &texts, &model).await })
            },
            compare_vector_batches,
        )
        .await
    }

    /// Generate a completion
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        model: Option<&str>,
        params: &ChatParams,
    ) -> Result<String> {
        if user.trim().is_empty() {
            return Err(RagError::InvalidInput("empty prompt".to_string()));
        }
        params.validate()?;

        // An override inside the params wins over the call-site hint
        let hint = params.model_override.as_deref().or(model);

        let system_owned = system.to_string();
        let user_owned = user.to_string();
        let params_owned = params.clone();
        self.execute(
            CallKind::Completion,
            user,
            hint,
            move |provider, model: String| {
                let system = system_owned.clone();
                let user = user_owned.clone();
                let params = params_owned.clone();
                Box::pin(async move { provider.complete(&system, &user, &model, &params).await })
            },
            compare_texts,
        )
        .await
    }

    /// Resolve the model a given provider should serve this call with
    fn resolve_model(&self, index: usize, kind: CallKind, hint: Option<&str>) -> Result<String> {
        if let Some(model) = hint {
            return Ok(model.to_string());
        }
        let endpoint = &self.endpoints[index];
        match kind {
            CallKind::Embedding => Ok(endpoint.embedding_model.clone()),
            CallKind::Completion => endpoint
                .models
                .first()
                .cloned()
                .ok_or_else(|| {
                    RagError::InvalidConfiguration(format!(
                        "no completion model configured for provider {}",
                        endpoint.name
                    ))
                }),
        }
    }

    /// Provider order for this call, per the configured strategy
    async fn candidate_order(
        &self,
        kind: CallKind,
        prompt: &str,
        hint: Option<&str>,
    ) -> Vec<usize> {
        let n = self.providers.len();
        match self.strategy {
            RoutingStrategy::PrimaryOnly => vec![0],
            RoutingStrategy::Failover => (0..n).collect(),
            RoutingStrategy::RoundRobin => {
                let next = self.round_robin.fetch_add(1, Ordering::Relaxed);
                vec![(next % n as u64) as usize]
            }
            RoutingStrategy::Specialized => match kind {
                CallKind::Embedding => vec![0],
                CallKind::Completion => vec![1.min(n - 1)],
            },
            // The analytical-prompt check covers completions and embeddings
            // alike; both surfaces take the same text input
            RoutingStrategy::SmartRouting => {
                if is_analytical_prompt(prompt) {
                    vec![1.min(n - 1)]
                } else {
                    vec![0]
                }
            }
            RoutingStrategy::ModelBased => match hint {
                Some(model) => match self.find_provider_by_model(model).await {
                    Ok(index) => vec![index],
                    Err(_) => {
                        debug!("No provider advertises {}, falling back to primary", model);
                        vec![0]
                    }
                },
                None => vec![0],
            },
            // Handled in execute(); candidate order is the verification pair
            RoutingStrategy::DualVerification => vec![0, 1.min(n - 1)],
        }
    }

    async fn execute<T, F>(
        &self,
        kind: CallKind,
        prompt: &str,
        hint: Option<&str>,
        op: F,
        similarity: fn(&T, &T) -> f64,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn ModelProvider>, String) -> BoxFuture<'static, Result<T>>,
    {
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        if self.strategy == RoutingStrategy::DualVerification {
            return self.execute_dual(kind, hint, op, similarity).await;
        }

        let order = self.candidate_order(kind, prompt, hint).await;
        let mut last_error = None;

        for (position, &index) in order.iter().enumerate() {
            if position > 0 {
                self.counters.failovers.fetch_add(1, Ordering::Relaxed);
            }
            self.record_selection(index);

            let model = match self.resolve_model(index, kind, hint) {
                Ok(model) => model,
                Err(e) => return Err(e),
            };

            match self.try_with_retries(index, &model, &op).await {
                Ok(value) => return Ok(value),
                // Rate limiting is propagated unchanged, never absorbed by failover
                Err(e @ RagError::RateLimited(_)) => return Err(e),
                Err(e) => {
                    warn!(
                        "Provider {} exhausted for this call: {}",
                        self.providers[index].name(),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(RagError::ProviderUnavailable(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no provider attempted".to_string()),
        ))
    }

    /// DualVerification: run the call on providers 0 and 1, return 0's
    /// result, and warn when the two disagree.
    async fn execute_dual<T, F>(
        &self,
        kind: CallKind,
        hint: Option<&str>,
        op: F,
        similarity: fn(&T, &T) -> f64,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn ModelProvider>, String) -> BoxFuture<'static, Result<T>>,
    {
        self.record_selection(0);
        let model = self.resolve_model(0, kind, hint)?;
        let primary = self.try_with_retries(0, &model, &op).await?;

        let secondary_index = 1.min(self.providers.len() - 1);
        self.record_selection(secondary_index);
        let model = self.resolve_model(secondary_index, kind, hint)?;
        match self.try_with_retries(secondary_index, &model, &op).await {
            Ok(secondary) => {
                let score = similarity(&primary, &secondary);
                if score < 0.8 {
                    warn!(
                        "Dual verification disagreement: similarity {:.3} between {} and {}",
                        score,
                        self.providers[0].name(),
                        self.providers[secondary_index].name()
                    );
                }
            }
            Err(e) => warn!("Dual verification secondary call failed: {}", e),
        }

        Ok(primary)
    }

    fn record_selection(&self, index: usize) {
        if index == 0 {
            self.counters.primary.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.secondary.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn try_with_retries<T, F>(&self, index: usize, model: &str, op: &F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn ModelProvider>, String) -> BoxFuture<'static, Result<T>>,
    {
        let provider = self.providers[index].clone();
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            let call = op(provider.clone(), model.to_string());
            match tokio::time::timeout(self.attempt_timeout, call).await {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        debug!(
                            "Succeeded after {} retries with {}",
                            attempt,
                            provider.name()
                        );
                    }
                    return Ok(value);
                }
                Ok(Err(e @ RagError::RateLimited(_))) => return Err(e),
                Ok(Err(e)) => {
                    warn!(
                        "Attempt {} failed for {}: {}",
                        attempt + 1,
                        provider.name(),
                        e
                    );
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
                Err(_) => {
                    warn!(
                        "Attempt {} timed out for {} after {:?}",
                        attempt + 1,
                        provider.name(),
                        self.attempt_timeout
                    );
                    last_error = Some(RagError::Timeout(format!(
                        "provider {} attempt {}",
                        provider.name(),
                        attempt + 1
                    )));
                }
            }

            if attempt + 1 < self.max_retries {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| RagError::Provider("no error recorded".to_string())))
    }
}

/// Exponential backoff: 250ms · 2^attempt, capped at 4s
fn backoff_delay(attempt: u32) -> Duration {
    let millis = BACKOFF_BASE_MS
        .checked_shl(attempt)
        .unwrap_or(BACKOFF_CAP_MS)
        .min(BACKOFF_CAP_MS);
    Duration::from_millis(millis)
}

/// Prompts routed to the analytical provider under SmartRouting
fn is_analytical_prompt(prompt: &str) -> bool {
    if prompt.len() > 1000 {
        return true;
    }
    let lower = prompt.to_lowercase();
    ["explain", "analyse", "compare"]
        .iter()
        .any(|kw| lower.contains(kw))
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Jaccard index over whitespace tokens, used to compare completions
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let sa: HashSet<&str> = a.split_whitespace().collect();
    let sb: HashSet<&str> = b.split_whitespace().collect();
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    intersection as f64 / union as f64
}

fn compare_vector_batches(a: &Vec<Vec<f32>>, b: &Vec<Vec<f32>>) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| cosine_similarity(x, y))
        .sum();
    sum / a.len() as f64
}

fn compare_texts(a: &String, b: &String) -> f64 {
    token_jaccard(a, b)
}
