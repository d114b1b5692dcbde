//! Explicit construction of the engine
//!
//! One startup function takes the configuration record and wires providers,
//! dispatcher, store, pipeline and search into a [`Core`] handle. No
//! reflection, no container: what you read here is the whole object graph.

use crate::config::RagConfig;
use crate::error::{RagError, Result};
use crate::ingest::{
    CancelFlag, EnrichmentOptions, EnrichmentOutcome, IngestJob, IngestQueue, IngestStats,
    ProcessingService, RouteHint, TextSplitter,
};
use crate::llm::{provider_from_config, Dispatcher, ModelProvider};
use crate::model::{Document, GenFlag, Library};
use crate::search::{HybridSearch, SearchResult};
use crate::store::{ChunkRepository, DocumentStore, LibraryRegistry, Store};
use crate::tokens::TokenCounter;
use std::sync::Arc;
use tracing::info;

/// The assembled engine
pub struct Core {
    config: RagConfig,
    dispatcher: Arc<Dispatcher>,
    store: Store,
    service: Arc<ProcessingService>,
    queue: IngestQueue,
    search: HybridSearch,
}

impl Core {
    /// Build the engine from configuration: construct providers, connect
    /// the store, bootstrap the schema, start the worker pool.
    pub async fn new(config: RagConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RagError::InvalidConfiguration(e.to_string()))?;

        let providers: Vec<Arc<dyn ModelProvider>> = config
            .providers
            .iter()
            .map(|endpoint| provider_from_config(endpoint, config.dispatch.timeout_seconds))
            .collect::<Result<_>>()?;

        let dispatcher = Arc::new(Dispatcher::new(
            providers,
            config.providers.clone(),
            config.dispatch.strategy,
            config.dispatch.max_retries,
            config.dispatch.timeout_seconds,
        )?);

        let store = Store::connect(&config.database).await?;
        store.init_schema(config.database.vector_dimension).await?;

        let counter = TokenCounter::heuristic();
        let splitter = TextSplitter::new(config.splitter.clone(), counter.clone());
        let service = Arc::new(ProcessingService::new(
            store.clone(),
            Arc::clone(&dispatcher),
            splitter,
            counter.clone(),
            config.processing.clone(),
        ));
        let queue = IngestQueue::new(Arc::clone(&service), &config.processing);
        let search = HybridSearch::new(
            store.clone(),
            Arc::clone(&dispatcher),
            counter,
            config.splitter.summary_max_tokens,
        );

        info!(
            "Core ready: {} providers, strategy {:?}",
            config.providers.len(),
            config.dispatch.strategy
        );

        Ok(Self {
            config,
            dispatcher,
            store,
            service,
            queue,
            search,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn libraries(&self) -> LibraryRegistry {
        self.store.libraries()
    }

    pub fn documents(&self) -> DocumentStore {
        self.store.documents()
    }

    pub fn chunks(&self) -> ChunkRepository {
        self.store.chunks()
    }

    pub fn search(&self) -> &HybridSearch {
        &self.search
    }

    pub fn processing(&self) -> &Arc<ProcessingService> {
        &self.service
    }

    /// Submit a document to the ingestion queue and wait for its result
    pub async fn ingest(
        &self,
        document: Document,
        library: Library,
        gen_flag: GenFlag,
        hint: Option<RouteHint>,
    ) -> Result<IngestStats> {
        let cancel = CancelFlag::new();
        let reply = self
            .queue
            .submit(IngestJob {
                document,
                library,
                gen_flag,
                hint,
                cancel,
            })
            .await;
        reply
            .recv_async()
            .await
            .map_err(|_| RagError::ProviderUnavailable("ingestion worker gone".to_string()))
    }

    /// Post-ingest enrichment of one document
    pub async fn enrich(
        &self,
        document_id: i64,
        options: &EnrichmentOptions,
    ) -> Result<EnrichmentOutcome> {
        self.service.enrich(document_id, options).await
    }

    /// Hybrid search across libraries referenced by name
    pub async fn search_hybrid(
        &self,
        query: &str,
        library_names: &[&str],
        k: usize,
        weights: Option<(f32, f32)>,
    ) -> Result<Vec<SearchResult>> {
        let libraries = self.resolve_libraries(library_names).await?;
        self.search.search_hybrid(query, &libraries, k, weights).await
    }

    async fn resolve_libraries(&self, names: &[&str]) -> Result<Vec<Library>> {
        let registry = self.store.libraries();
        let mut libraries = Vec::with_capacity(names.len());
        for name in names {
            let library = registry
                .find_by_name(name)
                .await?
                .ok_or_else(|| RagError::NotFound(format!("library {:?}", name)))?;
            libraries.push(library);
        }
        Ok(libraries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_configuration_rejected_before_io() {
        let mut config = RagConfig::default();
        config.providers.clear();

        let result = Core::new(config).await;
        assert!(matches!(result, Err(RagError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_batch_size_out_of_bounds_rejected() {
        let mut config = RagConfig::default();
        config.processing.batch_size = 64;

        let result = Core::new(config).await;
        assert!(matches!(result, Err(RagError::InvalidConfiguration(_))));
    }
}
