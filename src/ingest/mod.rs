//! Ingestion pipeline
//!
//! Routing, splitting, orchestration and enrichment. One task per document
//! end to end; chapter and chunk persistence are each a single transaction,
//! and the embedding backfill tolerates partial failure.

pub mod enrich;
pub mod router;
pub mod service;
pub mod splitter;

pub use enrich::{EnrichmentOptions, EnrichmentOutcome};
pub use router::{ContentClass, DocumentRouter, RouteHint};
pub use service::{CancelFlag, IngestJob, IngestQueue, IngestStats, ProcessingService};
pub use splitter::{SplitChapter, SplitChunk, TextSplitter};
