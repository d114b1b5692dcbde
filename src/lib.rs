//! Hierarchical RAG backend
//!
//! Ingests documents into a Library -> Document -> Chapter -> Chunk
//! hierarchy, generates dense embeddings through a multi-provider LLM
//! dispatch layer, persists them in Postgres/pgvector, and serves hybrid
//! (semantic + lexical) retrieval.
//!
//! # Example
//!
//! ```rust,no_run
//! use hierarag::{Core, RagConfig};
//! use hierarag::model::{Document, GenFlag, Library};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let core = Core::new(RagConfig::default()).await?;
//!
//!     let library = core
//!         .libraries()
//!         .save(&Library::new(
//!             "norms", "legal", 0.6, 0.4, "nomic-embed-text", 768, "llama3.2",
//!         ))
//!         .await?;
//!
//!     let document = Document::new(library.id, "Civil Code", "# Title I\n...");
//!     let stats = core
//!         .ingest(document, library, GenFlag::OnlyText, None)
//!         .await?;
//!     println!("{} chunks embedded", stats.processed);
//!
//!     let hits = core.search_hybrid("property rights", &["norms"], 5, None).await?;
//!     for hit in hits {
//!         println!("{:.4} {}", hit.score, hit.chunk.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod model;
pub mod search;
pub mod store;
pub mod text;
pub mod tokens;

// Re-export main types
pub use config::{
    ChapterTargets, DatabaseConfig, DispatchConfig, ProcessingConfig, RagConfig, SplitterConfig,
};
pub use crate::core::Core;
pub use error::{RagError, Result};
pub use ingest::{
    CancelFlag, ContentClass, DocumentRouter, EnrichmentOptions, EnrichmentOutcome, IngestJob,
    IngestQueue, IngestStats, ProcessingService, RouteHint, TextSplitter,
};
pub use llm::{
    ChatParams, DispatchStats, Dispatcher, EmbeddingContext, EmbeddingOp, LlmContext,
    ModelProvider, ProviderEndpointConfig, RoutingStrategy,
};
pub use model::{Chapter, Chunk, ChunkKind, Document, DocumentStatus, GenFlag, Library};
pub use search::{HybridSearch, SearchResult};
pub use store::{ChunkRepository, DocumentStore, LibraryRegistry, Store};
pub use tokens::TokenCounter;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
