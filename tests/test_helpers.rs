//! Test helpers and utilities for the hierarag test suite

use async_trait::async_trait;
use hierarag::config::DatabaseConfig;
use hierarag::llm::{ChatParams, EmbeddingOp};
use hierarag::{
    Dispatcher, Library, ModelProvider, ProviderEndpointConfig, Result, RoutingStrategy, Store,
    TokenCounter,
};
use std::sync::Arc;
use uuid::Uuid;

/// Embedding dimension used by the deterministic test provider
pub const TEST_DIMENSION: usize = 26;

/// Deterministic provider: embeddings are letter-frequency vectors, so
/// texts sharing words land close together under cosine distance.
pub struct LetterBagProvider;

fn letter_bag(text: &str) -> Vec<f32> {
    let mut bag = vec![0.0f32; TEST_DIMENSION];
    for c in text.to_lowercase().chars() {
        if c.is_ascii_lowercase() {
            bag[(c as u8 - b'a') as usize] += 1.0;
        }
    }
    bag
}

#[async_trait]
impl ModelProvider for LetterBagProvider {
    fn name(&self) -> &str {
        "letter-bag"
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["embedder".to_string(), "completer".to_string()])
    }

    async fn embed(&self, _op: EmbeddingOp, text: &str, _model: &str) -> Result<Vec<f32>> {
        Ok(letter_bag(text))
    }

    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _model: &str,
        _params: &ChatParams,
    ) -> Result<String> {
        Ok("generic".to_string())
    }
}

/// Dispatcher wired to the deterministic provider
pub fn test_dispatcher() -> Arc<Dispatcher> {
    let endpoint = ProviderEndpointConfig {
        name: "letter-bag".to_string(),
        url: "http://letter-bag.test/v1".to_string(),
        api_key: None,
        models: vec!["embedder".to_string(), "completer".to_string()],
        embedding_model: "embedder".to_string(),
        embedding_dimension: TEST_DIMENSION,
        context_length: 8192,
    };
    Arc::new(
        Dispatcher::new(
            vec![Arc::new(LetterBagProvider)],
            vec![endpoint],
            RoutingStrategy::PrimaryOnly,
            1,
            5,
        )
        .expect("dispatcher construction"),
    )
}

pub fn test_counter() -> TokenCounter {
    TokenCounter::heuristic()
}

/// Connect to `DATABASE_URL` and bootstrap the schema; `None` skips the
/// test when no database is available, which is okay for CI.
pub async fn connect_test_store() -> Option<Store> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let config = DatabaseConfig {
        url,
        max_connections: 2,
        vector_dimension: None,
    };
    let store = Store::connect(&config).await.ok()?;
    store.init_schema(None).await.ok()?;
    Some(store)
}

/// A fresh library bound to the deterministic provider models
pub async fn test_library(store: &Store, w_sem: f32, w_lex: f32) -> Library {
    let library = Library::new(
        format!("it-lib-{}", Uuid::new_v4()),
        "testing",
        w_sem,
        w_lex,
        "embedder",
        TEST_DIMENSION,
        "completer",
    );
    store
        .libraries()
        .save(&library)
        .await
        .expect("library fixture")
}
