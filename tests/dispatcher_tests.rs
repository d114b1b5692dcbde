//! Dispatcher routing scenarios exercised through the public API

use async_trait::async_trait;
use hierarag::llm::{ChatParams, EmbeddingOp};
use hierarag::{
    Dispatcher, ModelProvider, ProviderEndpointConfig, RagError, Result, RoutingStrategy,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct ScriptedProvider {
    name: String,
    models: Vec<String>,
    fail: bool,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn ok(name: &str, models: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            models: models.iter().map(|m| m.to_string()).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            models: vec![],
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(self.models.clone())
    }

    async fn embed(&self, _op: EmbeddingOp, _text: &str, _model: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            return Err(RagError::Provider("scripted failure".to_string()));
        }
        Ok(vec![1.0, 0.0, 0.0, 0.0])
    }

    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _model: &str,
        _params: &ChatParams,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            return Err(RagError::Provider("scripted failure".to_string()));
        }
        Ok(format!("from {}", self.name))
    }
}

fn endpoint(name: &str, models: &[&str]) -> ProviderEndpointConfig {
    ProviderEndpointConfig {
        name: name.to_string(),
        url: format!("http://{}.test/v1", name),
        api_key: None,
        models: models.iter().map(|m| m.to_string()).collect(),
        embedding_model: "embedder".to_string(),
        embedding_dimension: 4,
        context_length: 8192,
    }
}

#[tokio::test]
async fn failover_counts_one_of_each() {
    let p0: Arc<dyn ModelProvider> = ScriptedProvider::failing("p0");
    let p1: Arc<dyn ModelProvider> = ScriptedProvider::ok("p1", &["m"]);
    let dispatcher = Dispatcher::new(
        vec![p0, p1],
        vec![endpoint("p0", &[]), endpoint("p1", &["m"])],
        RoutingStrategy::Failover,
        2,
        5,
    )
    .unwrap();

    dispatcher
        .embed(EmbeddingOp::Document, "text", None)
        .await
        .unwrap();

    // Provider 0 exhausted, provider 1 answered: exactly one primary, one
    // secondary, one failover per call
    let stats = dispatcher.stats();
    assert_eq!(stats.primary_requests, 1);
    assert_eq!(stats.secondary_requests, 1);
    assert_eq!(stats.failover_events, 1);
    assert_eq!(stats.total_requests, 1);
}

#[tokio::test]
async fn round_robin_spreads_within_one() {
    let providers: Vec<Arc<dyn ModelProvider>> = vec![
        ScriptedProvider::ok("p0", &["m"]),
        ScriptedProvider::ok("p1", &["m"]),
        ScriptedProvider::ok("p2", &["m"]),
    ];
    let endpoints = vec![
        endpoint("p0", &["m"]),
        endpoint("p1", &["m"]),
        endpoint("p2", &["m"]),
    ];
    let dispatcher =
        Dispatcher::new(providers, endpoints, RoutingStrategy::RoundRobin, 1, 5).unwrap();

    let calls = 20usize;
    for _ in 0..calls {
        dispatcher
            .embed(EmbeddingOp::Document, "text", None)
            .await
            .unwrap();
    }

    let stats = dispatcher.stats();
    assert_eq!(stats.total_requests, calls as u64);
    let expected = calls as i64 / 3;
    assert!((stats.primary_requests as i64 - expected).abs() <= 1);
}

#[tokio::test]
async fn model_based_routes_by_advertised_models() {
    let p0: Arc<dyn ModelProvider> = ScriptedProvider::ok("p0", &["llama2"]);
    let p1: Arc<dyn ModelProvider> = ScriptedProvider::ok("p1", &["gpt-4"]);
    let dispatcher = Dispatcher::new(
        vec![p0, p1],
        vec![endpoint("p0", &["llama2"]), endpoint("p1", &["gpt-4"])],
        RoutingStrategy::ModelBased,
        1,
        5,
    )
    .unwrap();

    // Advertised model routes to its provider
    let answer = dispatcher
        .complete("", "q", Some("gpt-4"), &ChatParams::default())
        .await
        .unwrap();
    assert_eq!(answer, "from p1");

    // Unknown model falls back to provider 0
    let answer = dispatcher
        .complete("", "q", Some("unknown-xyz"), &ChatParams::default())
        .await
        .unwrap();
    assert_eq!(answer, "from p0");
}

#[tokio::test]
async fn empty_input_rejected_without_provider_contact() {
    let provider = ScriptedProvider::ok("p0", &["m"]);
    let touched = Arc::clone(&provider);
    let dispatcher = Dispatcher::new(
        vec![provider],
        vec![endpoint("p0", &["m"])],
        RoutingStrategy::PrimaryOnly,
        3,
        5,
    )
    .unwrap();

    let result = dispatcher.embed(EmbeddingOp::Query, "", None).await;
    assert!(matches!(result, Err(RagError::InvalidInput(_))));
    assert_eq!(touched.calls.load(Ordering::Relaxed), 0);

    let result = dispatcher
        .complete("sys", "   ", None, &ChatParams::default())
        .await;
    assert!(matches!(result, Err(RagError::InvalidInput(_))));
    assert_eq!(touched.calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn all_providers_exhausted_is_unavailable() {
    let p0: Arc<dyn ModelProvider> = ScriptedProvider::failing("p0");
    let p1: Arc<dyn ModelProvider> = ScriptedProvider::failing("p1");
    let dispatcher = Dispatcher::new(
        vec![p0, p1],
        vec![endpoint("p0", &[]), endpoint("p1", &[])],
        RoutingStrategy::Failover,
        2,
        5,
    )
    .unwrap();

    let result = dispatcher.embed(EmbeddingOp::Document, "text", None).await;
    assert!(matches!(result, Err(RagError::ProviderUnavailable(_))));
}

#[tokio::test]
async fn stats_reset_zeroes_counters() {
    let provider: Arc<dyn ModelProvider> = ScriptedProvider::ok("p0", &["m"]);
    let dispatcher = Dispatcher::new(
        vec![provider],
        vec![endpoint("p0", &["m"])],
        RoutingStrategy::PrimaryOnly,
        1,
        5,
    )
    .unwrap();

    for _ in 0..3 {
        dispatcher
            .embed(EmbeddingOp::Document, "text", None)
            .await
            .unwrap();
    }
    assert_eq!(dispatcher.stats().total_requests, 3);

    dispatcher.reset_stats();
    let stats = dispatcher.stats();
    assert_eq!(stats.total_requests, 0);
    assert_eq!(stats.primary_requests, 0);
    assert_eq!(stats.failover_events, 0);
}
