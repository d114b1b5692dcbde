//! Ingestion orchestration
//!
//! `process` drives one document through the whole pipeline: classify,
//! split, persist chapters, persist chunks with null vectors, then backfill
//! embeddings in batches. The null-vector transaction commits before any
//! embedding starts, so a crash or cancellation leaves a searchable
//! `Partial` document, never a half-written one.

use crate::config::ProcessingConfig;
use crate::error::{RagError, Result};
use crate::ingest::router::{DocumentRouter, RouteHint};
use crate::ingest::splitter::TextSplitter;
use crate::llm::{Dispatcher, EmbeddingContext, EmbeddingOp, LlmContext};
use crate::model::{
    embeddable_text, Chapter, Chunk, ChunkKind, Document, DocumentStatus, GenFlag, Library,
};
use crate::store::Store;
use crate::tokens::TokenCounter;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Cooperative cancellation shared between a submitter and its task
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result record of one ingestion run
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub chapters: usize,
    pub chunks: usize,
    /// Chunks whose vector was filled
    pub processed: usize,
    /// Chunks left without a vector
    pub failed: usize,
    pub duration_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
}

/// One unit of work for the ingestion queue
pub struct IngestJob {
    pub document: Document,
    pub library: Library,
    pub gen_flag: GenFlag,
    pub hint: Option<RouteHint>,
    pub cancel: CancelFlag,
}

/// Ingestion orchestrator
pub struct ProcessingService {
    store: Store,
    dispatcher: Arc<Dispatcher>,
    router: DocumentRouter,
    splitter: TextSplitter,
    counter: TokenCounter,
    config: ProcessingConfig,
}

impl ProcessingService {
    pub fn new(
        store: Store,
        dispatcher: Arc<Dispatcher>,
        splitter: TextSplitter,
        counter: TokenCounter,
        config: ProcessingConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            router: DocumentRouter::new(),
            splitter,
            counter,
            config,
        }
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub(crate) fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    pub(crate) fn summary_max_tokens(&self) -> usize {
        self.splitter.config().summary_max_tokens
    }

    /// Ingest one document end to end. Never panics; fatal errors land in
    /// the returned stats and the document status.
    pub async fn process(
        &self,
        document: Document,
        library: &Library,
        gen_flag: GenFlag,
        hint: Option<&RouteHint>,
        cancel: &CancelFlag,
    ) -> IngestStats {
        let started = Instant::now();
        let title = document.title.clone();

        match self
            .process_inner(document, library, gen_flag, hint, cancel)
            .await
        {
            Ok(mut stats) => {
                stats.duration_ms = started.elapsed().as_millis() as u64;
                stats.success = true;
                info!(
                    "Ingested {:?}: {} chapters, {} chunks, {} embedded, {} failed in {}ms",
                    title, stats.chapters, stats.chunks, stats.processed, stats.failed,
                    stats.duration_ms
                );
                stats
            }
            Err((document_id, e)) => {
                error!("Ingestion of {:?} failed: {}", title, e);
                if let Some(id) = document_id {
                    if let Err(status_error) = self
                        .store
                        .documents()
                        .update_status(id, DocumentStatus::Failed)
                        .await
                    {
                        warn!("Could not mark document {} failed: {}", id, status_error);
                    }
                }
                IngestStats {
                    duration_ms: started.elapsed().as_millis() as u64,
                    success: false,
                    error_message: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    async fn process_inner(
        &self,
        mut document: Document,
        library: &Library,
        gen_flag: GenFlag,
        hint: Option<&RouteHint>,
        cancel: &CancelFlag,
    ) -> std::result::Result<IngestStats, (Option<i64>, RagError)> {
        let llm = LlmContext::bind(library, Arc::clone(&self.dispatcher));
        let embedder = EmbeddingContext::bind(
            library,
            Arc::clone(&self.dispatcher),
            self.counter.clone(),
            self.summary_max_tokens(),
        )
        .map_err(|e| (None, e))?;

        document.library_id = library.id;
        document.token_count = self
            .counter
            .count(&document.text, &library.embedding_model) as i64;

        let document = if document.id == 0 {
            self.store
                .documents()
                .insert(&document)
                .await
                .map_err(|e| (None, e))?
        } else {
            document
        };
        let document_id = document.id;
        let fail = |e: RagError| (Some(document_id), e);

        // Split
        self.store
            .documents()
            .update_status(document_id, DocumentStatus::Splitting)
            .await
            .map_err(fail)?;

        let class = self
            .router
            .classify(document.header_sample(), hint, Some(&llm))
            .await;
        let split = self
            .splitter
            .split_chapters(&document.text, class, &library.embedding_model);

        let chapter_rows: Vec<Chapter> = split
            .iter()
            .map(|chapter| Chapter {
                id: 0,
                document_id,
                title: chapter.title.clone(),
                text: chapter.text.clone(),
                order_in_document: chapter.order_in_document,
                token_start: chapter.token_start,
                token_end: chapter.token_end,
                token_count: chapter.token_count,
                metadata: Default::default(),
            })
            .collect();

        let chapters = self
            .store
            .documents()
            .insert_chapters(&chapter_rows)
            .await
            .map_err(fail)?;

        self.store
            .documents()
            .update_status(document_id, DocumentStatus::Chunking)
            .await
            .map_err(fail)?;

        // Build the chunk list, chapter ids already bound
        let mut chunks: Vec<Chunk> = Vec::new();
        for chapter in &chapters {
            chunks.extend(
                self.chapter_chunks(chapter, &document, library, &llm, &embedder)
                    .await,
            );
        }

        let ids = self
            .store
            .chunks()
            .insert_batch(&chunks)
            .await
            .map_err(fail)?;

        // Null vectors are now committed; embedding failures from here on
        // can only leave the document Partial
        self.store
            .documents()
            .update_status(document_id, DocumentStatus::Embedding)
            .await
            .map_err(fail)?;

        let mut stats = IngestStats {
            chapters: chapters.len(),
            chunks: chunks.len(),
            ..Default::default()
        };

        let mut cancelled = false;
        for (batch_ids, batch) in ids
            .chunks(self.config.batch_size)
            .zip(chunks.chunks(self.config.batch_size))
        {
            if cancel.is_cancelled() {
                warn!("Ingestion of document {} cancelled mid-embedding", document_id);
                cancelled = true;
                stats.failed += ids.len() - stats.processed - stats.failed;
                break;
            }

            match self
                .embed_batch_into_store(batch_ids, batch, gen_flag, &embedder)
                .await
            {
                Ok((processed, failed)) => {
                    stats.processed += processed;
                    stats.failed += failed;
                }
                Err(e) => {
                    warn!(
                        "Embedding batch of {} chunks failed: {}",
                        batch_ids.len(),
                        e
                    );
                    stats.failed += batch_ids.len();
                }
            }
        }

        let status = if stats.failed == 0 && !cancelled {
            DocumentStatus::Ready
        } else {
            DocumentStatus::Partial
        };
        self.store
            .documents()
            .update_status(document_id, status)
            .await
            .map_err(fail)?;

        Ok(stats)
    }

    /// Chunks for one chapter: a single `Chapter` chunk when it fits the
    /// chunk budget, otherwise excerpts plus an optional leading summary.
    async fn chapter_chunks(
        &self,
        chapter: &Chapter,
        document: &Document,
        library: &Library,
        llm: &LlmContext,
        embedder: &EmbeddingContext,
    ) -> Vec<Chunk> {
        let splitter_config = self.splitter.config();
        let mut out = Vec::new();

        if chapter.token_count > splitter_config.summary_threshold_tokens as i64 {
            match llm
                .summarize(&chapter.text, splitter_config.summary_max_tokens)
                .await
            {
                Ok(summary) => out.push(
                    base_chunk(chapter, document, library, ChunkKind::Summary, summary)
                        .with_chapter(chapter.id, Some(0)),
                ),
                Err(e) => warn!(
                    "Summary for chapter {:?} failed, continuing without: {}",
                    chapter.title, e
                ),
            }
        }

        let pieces = self.splitter.split_chunks(
            &chapter.text,
            embedder.context_length(),
            &library.embedding_model,
        );
        for piece in pieces {
            out.push(
                base_chunk(chapter, document, library, piece.kind, piece.text)
                    .with_chapter(chapter.id, piece.order_in_chapter),
            );
        }

        debug!(
            "Chapter {:?} produced {} chunks",
            chapter.title,
            out.len()
        );
        out
    }

    /// Embed one batch and write vectors chunk by chunk. Returns
    /// (processed, failed); a per-chunk write failure only loses that chunk.
    async fn embed_batch_into_store(
        &self,
        ids: &[i64],
        batch: &[Chunk],
        gen_flag: GenFlag,
        embedder: &EmbeddingContext,
    ) -> Result<(usize, usize)> {
        let texts: Vec<String> = batch
            .iter()
            .map(|chunk| embeddable_text(chunk, gen_flag))
            .collect();

        let embedded = embedder.embed_batch(&texts, EmbeddingOp::Document).await?;

        let mut processed = 0;
        let mut failed = 0;
        for (id, outcome) in ids.iter().zip(embedded) {
            match self.store.chunks().update_vector(*id, &outcome.vector).await {
                Ok(()) => {
                    processed += 1;
                    if !outcome.annotations.is_empty() {
                        if let Err(e) = self
                            .store
                            .chunks()
                            .merge_metadata(*id, &outcome.annotations)
                            .await
                        {
                            warn!("Could not record annotations for chunk {}: {}", id, e);
                        }
                    }
                }
                Err(e) => {
                    warn!("Vector update for chunk {} failed: {}", id, e);
                    failed += 1;
                }
            }
        }

        Ok((processed, failed))
    }
}

/// Bounded ingestion queue with a caller-runs overflow policy
pub struct IngestQueue {
    service: Arc<ProcessingService>,
    tx: flume::Sender<(IngestJob, flume::Sender<IngestStats>)>,
    rx: flume::Receiver<(IngestJob, flume::Sender<IngestStats>)>,
    spawned: Arc<AtomicUsize>,
    core_workers: usize,
    max_workers: usize,
}

impl IngestQueue {
    pub fn new(service: Arc<ProcessingService>, config: &ProcessingConfig) -> Self {
        let (tx, rx) = flume::bounded(config.queue_capacity);
        let queue = Self {
            service,
            tx,
            rx,
            spawned: Arc::new(AtomicUsize::new(0)),
            core_workers: config.core_workers,
            max_workers: config.max_workers,
        };
        for _ in 0..queue.core_workers {
            queue.spawn_worker();
        }
        queue
    }

    fn spawn_worker(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
        let service = Arc::clone(&self.service);
        let rx = self.rx.clone();
        tokio::spawn(async move {
            while let Ok((job, reply)) = rx.recv_async().await {
                let stats = run_job(&service, job).await;
                let _ = reply.send(stats);
            }
        });
    }

    /// Submit a job. When the queue is full a spare worker is started up to
    /// the pool maximum; past that, the submitting task runs the job itself.
    pub async fn submit(&self, job: IngestJob) -> flume::Receiver<IngestStats> {
        let (reply_tx, reply_rx) = flume::bounded(1);

        match self.tx.try_send((job, reply_tx)) {
            Ok(()) => reply_rx,
            Err(flume::TrySendError::Full((job, reply_tx))) => {
                if self.spawned.load(Ordering::Relaxed) < self.max_workers {
                    self.spawn_worker();
                    if let Err(flume::TrySendError::Full((job, reply_tx)))
                    | Err(flume::TrySendError::Disconnected((job, reply_tx))) =
                        self.tx.try_send((job, reply_tx))
                    {
                        let stats = run_job(&self.service, job).await;
                        let _ = reply_tx.send(stats);
                    }
                } else {
                    debug!("Ingestion queue full, running job on the submitter");
                    let stats = run_job(&self.service, job).await;
                    let _ = reply_tx.send(stats);
                }
                reply_rx
            }
            Err(flume::TrySendError::Disconnected((job, reply_tx))) => {
                let stats = run_job(&self.service, job).await;
                let _ = reply_tx.send(stats);
                reply_rx
            }
        }
    }
}

/// Common metadata for every chunk of a chapter; these keys feed the
/// weighted fields of the store's `text_search` column.
fn base_chunk(
    chapter: &Chapter,
    document: &Document,
    library: &Library,
    kind: ChunkKind,
    text: String,
) -> Chunk {
    Chunk::new(library.id, chapter.document_id, kind, text)
        .with_metadata("name", document.title.clone())
        .with_metadata("chapter", chapter.title.clone())
        .with_metadata("area", library.area.clone())
}

async fn run_job(service: &ProcessingService, job: IngestJob) -> IngestStats {
    service
        .process(
            job.document,
            &job.library,
            job.gen_flag,
            job.hint.as_ref(),
            &job.cancel,
        )
        .await
}
