//! Configuration management for the RAG core

use crate::ingest::router::ContentClass;
use crate::llm::dispatcher::MAX_EMBED_BATCH;
use crate::llm::provider::ProviderEndpointConfig;
use crate::llm::RoutingStrategy;
use serde::{Deserialize, Serialize};

/// Main configuration for the RAG core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Provider registrations, index order is routing order
    pub providers: Vec<ProviderEndpointConfig>,

    /// Dispatcher routing and retry policy
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Ingestion pipeline settings
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Splitter budgets
    #[serde(default)]
    pub splitter: SplitterConfig,

    /// Persistent store settings
    pub database: DatabaseConfig,
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// One of the seven routing strategies
    #[serde(default)]
    pub strategy: RoutingStrategy,

    /// Attempts per provider before giving up on it
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-attempt timeout for outbound calls
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::default(),
            max_retries: default_max_retries(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Chunks per embedding batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Bounded ingestion queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Workers started immediately
    #[serde(default = "default_core_workers")]
    pub core_workers: usize,

    /// Upper bound on workers under load
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_batch_size() -> usize {
    5
}

fn default_queue_capacity() -> usize {
    100
}

fn default_core_workers() -> usize {
    2
}

fn default_max_workers() -> usize {
    5
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            queue_capacity: default_queue_capacity(),
            core_workers: default_core_workers(),
            max_workers: default_max_workers(),
        }
    }
}

/// Splitter budgets, all in tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitterConfig {
    #[serde(default = "default_chunk_ideal_tokens")]
    pub chunk_ideal_tokens: usize,

    #[serde(default = "default_chunk_min_tokens")]
    pub chunk_min_tokens: usize,

    /// Chapters above this size get a summary chunk at order 0
    #[serde(default = "default_summary_threshold_tokens")]
    pub summary_threshold_tokens: usize,

    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: usize,

    /// Target chapter sizes per content class
    #[serde(default)]
    pub chapter_targets: ChapterTargets,
}

fn default_chunk_ideal_tokens() -> usize {
    512
}

fn default_chunk_min_tokens() -> usize {
    256
}

fn default_summary_threshold_tokens() -> usize {
    2500
}

fn default_summary_max_tokens() -> usize {
    2048
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_ideal_tokens: default_chunk_ideal_tokens(),
            chunk_min_tokens: default_chunk_min_tokens(),
            summary_threshold_tokens: default_summary_threshold_tokens(),
            summary_max_tokens: default_summary_max_tokens(),
            chapter_targets: ChapterTargets::default(),
        }
    }
}

/// Target chapter sizes per content class, in tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterTargets {
    #[serde(default = "default_legal_target")]
    pub legal: usize,

    #[serde(default = "default_manual_target")]
    pub manual: usize,

    #[serde(default = "default_article_target")]
    pub article: usize,

    #[serde(default = "default_book_target")]
    pub book: usize,

    #[serde(default = "default_chapter_target", rename = "default")]
    pub fallback: usize,
}

fn default_legal_target() -> usize {
    1_500
}

fn default_manual_target() -> usize {
    1_800
}

fn default_article_target() -> usize {
    2_000
}

fn default_book_target() -> usize {
    2_500
}

fn default_chapter_target() -> usize {
    8_000
}

impl Default for ChapterTargets {
    fn default() -> Self {
        Self {
            legal: default_legal_target(),
            manual: default_manual_target(),
            article: default_article_target(),
            book: default_book_target(),
            fallback: default_chapter_target(),
        }
    }
}

impl ChapterTargets {
    /// Target chapter size for a content class
    pub fn for_class(&self, class: ContentClass) -> usize {
        match class {
            ContentClass::Legal => self.legal,
            ContentClass::Manual => self.manual,
            ContentClass::Article => self.article,
            ContentClass::Book => self.book,
            ContentClass::Wiki | ContentClass::Contract | ContentClass::Generic => self.fallback,
        }
    }
}

/// Persistent store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// When set, the chunk vector column is typed to this width and gets an
    /// ANN index; when unset the column is untyped and scans are exact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_dimension: Option<usize>,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/hierarag".to_string(),
            max_connections: default_max_connections(),
            vector_dimension: None,
        }
    }
}

impl RagConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string(self)?,
            Some("yaml") | Some("yml") => serde_yml::to_string(self)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.providers.is_empty() {
            return Err(anyhow::anyhow!("At least one provider must be configured"));
        }

        for provider in &self.providers {
            if !provider.url.starts_with("http") {
                return Err(anyhow::anyhow!("Invalid provider URL: {}", provider.url));
            }
            if provider.embedding_model.is_empty() {
                return Err(anyhow::anyhow!(
                    "Embedding model missing for provider {}",
                    provider.name
                ));
            }
            if provider.embedding_dimension == 0 {
                return Err(anyhow::anyhow!(
                    "Embedding dimension must be greater than 0 for provider {}",
                    provider.name
                ));
            }
        }

        let needs_two = matches!(
            self.dispatch.strategy,
            RoutingStrategy::Specialized
                | RoutingStrategy::DualVerification
                | RoutingStrategy::SmartRouting
        );
        if needs_two && self.providers.len() < 2 {
            return Err(anyhow::anyhow!(
                "Strategy {:?} requires at least two providers",
                self.dispatch.strategy
            ));
        }

        if self.dispatch.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Timeout must be greater than 0"));
        }

        if self.processing.batch_size == 0 || self.processing.batch_size > MAX_EMBED_BATCH {
            return Err(anyhow::anyhow!(
                "Batch size must be in 1..={}",
                MAX_EMBED_BATCH
            ));
        }

        if self.processing.core_workers == 0
            || self.processing.max_workers < self.processing.core_workers
        {
            return Err(anyhow::anyhow!("Invalid worker pool bounds"));
        }

        if self.splitter.chunk_min_tokens == 0
            || self.splitter.chunk_min_tokens > self.splitter.chunk_ideal_tokens
        {
            return Err(anyhow::anyhow!(
                "chunk_min_tokens must be in 1..=chunk_ideal_tokens"
            ));
        }

        if self.database.url.is_empty() {
            return Err(anyhow::anyhow!("Database URL cannot be empty"));
        }

        Ok(())
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            providers: vec![ProviderEndpointConfig::ollama("localhost")],
            dispatch: DispatchConfig::default(),
            processing: ProcessingConfig::default(),
            splitter: SplitterConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}
