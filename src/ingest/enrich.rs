//! Post-ingest enrichment
//!
//! Walks a document's chapters and emits additional chunks: generated
//! question/answer pairs and/or chapter summaries. Each Q&A pair is stored
//! as two sibling chunks that reference each other through a shared pair id
//! in their metadata.

use crate::error::{RagError, Result};
use crate::ingest::service::ProcessingService;
use crate::llm::{EmbeddingContext, EmbeddingOp, LlmContext};
use crate::model::{Chapter, Chunk, ChunkKind, Document, Library};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// What to generate, and how much
#[derive(Debug, Clone)]
pub struct EnrichmentOptions {
    pub generate_qa: bool,
    /// Q&A pairs per chapter, 1..=20
    pub qa_pairs: usize,
    pub generate_summary: bool,
    /// Summary budget in tokens, 100..=2000
    pub summary_max_tokens: usize,
    /// Skip failing chapters instead of aborting
    pub continue_on_error: bool,
}

impl Default for EnrichmentOptions {
    fn default() -> Self {
        Self {
            generate_qa: false,
            qa_pairs: 5,
            generate_summary: false,
            summary_max_tokens: 1_000,
            continue_on_error: true,
        }
    }
}

impl EnrichmentOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.generate_qa && !self.generate_summary {
            return Err(RagError::InvalidInput(
                "at least one enrichment type must be enabled".to_string(),
            ));
        }
        if self.generate_qa && !(1..=20).contains(&self.qa_pairs) {
            return Err(RagError::InvalidInput(format!(
                "qa_pairs must be in 1..=20, got {}",
                self.qa_pairs
            )));
        }
        if self.generate_summary && !(100..=2_000).contains(&self.summary_max_tokens) {
            return Err(RagError::InvalidInput(format!(
                "summary_max_tokens must be in 100..=2000, got {}",
                self.summary_max_tokens
            )));
        }
        Ok(())
    }
}

/// What enrichment produced
#[derive(Debug, Clone, Default)]
pub struct EnrichmentOutcome {
    pub chapters: usize,
    pub chunks_added: usize,
    /// Chapters skipped after an error (continue-on-error mode)
    pub skipped: usize,
}

impl ProcessingService {
    /// Enrich an already-ingested document per `options`
    pub async fn enrich(
        &self,
        document_id: i64,
        options: &EnrichmentOptions,
    ) -> Result<EnrichmentOutcome> {
        options.validate()?;

        let document = self.store().documents().find_by_id(document_id).await?;
        if document.deleted {
            return Err(RagError::NotFound(format!("document {}", document_id)));
        }
        let library = self
            .store()
            .libraries()
            .find_by_id(document.library_id)
            .await?;
        let llm = LlmContext::bind(&library, Arc::clone(self.dispatcher()));
        let embedder = EmbeddingContext::bind(
            &library,
            Arc::clone(self.dispatcher()),
            self.counter().clone(),
            self.summary_max_tokens(),
        )?;

        let chapters = self.store().documents().find_chapters(document_id).await?;
        let mut outcome = EnrichmentOutcome {
            chapters: chapters.len(),
            ..Default::default()
        };

        for chapter in &chapters {
            match self
                .enrich_chapter(chapter, &document, &library, options, &llm, &embedder)
                .await
            {
                Ok(added) => outcome.chunks_added += added,
                Err(e) if options.continue_on_error => {
                    warn!("Enrichment of chapter {:?} failed: {}", chapter.title, e);
                    outcome.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Enriched document {}: {} chunks added, {} chapters skipped",
            document_id, outcome.chunks_added, outcome.skipped
        );
        Ok(outcome)
    }

    async fn enrich_chapter(
        &self,
        chapter: &Chapter,
        document: &Document,
        library: &Library,
        options: &EnrichmentOptions,
        llm: &LlmContext,
        embedder: &EmbeddingContext,
    ) -> Result<usize> {
        let mut chunks: Vec<Chunk> = Vec::new();
        let base_order = self
            .store()
            .chunks()
            .max_order_in_chapter(chapter.id)
            .await?;

        if options.generate_qa {
            let pairs = llm.generate_qa(&chapter.text, options.qa_pairs).await?;
            let mut order = base_order;
            for pair in pairs {
                let pair_id = Uuid::new_v4().to_string();
                order += 1;
                chunks.push(
                    qa_chunk(chapter, document, library, pair.question, &pair_id, "question")
                        .with_chapter(chapter.id, Some(order)),
                );
                order += 1;
                chunks.push(
                    qa_chunk(chapter, document, library, pair.answer, &pair_id, "answer")
                        .with_chapter(chapter.id, Some(order)),
                );
            }
        }

        if options.generate_summary {
            let summary = llm
                .summarize(&chapter.text, options.summary_max_tokens)
                .await?;
            chunks.push(
                Chunk::new(library.id, chapter.document_id, ChunkKind::Summary, summary)
                    .with_metadata("name", document.title.clone())
                    .with_metadata("chapter", chapter.title.clone())
                    .with_metadata("area", library.area.clone())
                    .with_chapter(chapter.id, Some(0)),
            );
        }

        if chunks.is_empty() {
            return Ok(0);
        }

        let ids = self.store().chunks().insert_batch(&chunks).await?;

        // Vector backfill, chunk by chunk tolerance as in ingestion
        for (ids, batch) in ids.chunks(5).zip(chunks.chunks(5)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            match embedder.embed_batch(&texts, EmbeddingOp::Document).await {
                Ok(embedded) => {
                    for (id, outcome) in ids.iter().zip(embedded) {
                        if let Err(e) = self
                            .store()
                            .chunks()
                            .update_vector(*id, &outcome.vector)
                            .await
                        {
                            warn!("Vector update for enrichment chunk {} failed: {}", id, e);
                        }
                    }
                }
                Err(e) => warn!("Enrichment embedding batch failed: {}", e),
            }
        }

        Ok(chunks.len())
    }
}

fn qa_chunk(
    chapter: &Chapter,
    document: &Document,
    library: &Library,
    text: String,
    pair_id: &str,
    role: &str,
) -> Chunk {
    Chunk::new(
        library.id,
        chapter.document_id,
        ChunkKind::QuestionAnswer,
        text,
    )
    .with_metadata("name", document.title.clone())
    .with_metadata("chapter", chapter.title.clone())
    .with_metadata("area", library.area.clone())
    .with_metadata("qa_pair", pair_id.to_string())
    .with_metadata("qa_role", role.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_validation() {
        // Nothing enabled
        let options = EnrichmentOptions::default();
        assert!(matches!(
            options.validate(),
            Err(RagError::InvalidInput(_))
        ));

        let options = EnrichmentOptions {
            generate_qa: true,
            ..Default::default()
        };
        assert!(options.validate().is_ok());

        let options = EnrichmentOptions {
            generate_qa: true,
            qa_pairs: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = EnrichmentOptions {
            generate_qa: true,
            qa_pairs: 21,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = EnrichmentOptions {
            generate_summary: true,
            summary_max_tokens: 99,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = EnrichmentOptions {
            generate_summary: true,
            summary_max_tokens: 2_000,
            ..Default::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_qa_chunks_reference_each_other() {
        let library = Library::new("l", "a", 0.5, 0.5, "e", 4, "c");
        let document = Document::new(1, "work", "text");
        let chapter = Chapter {
            id: 7,
            document_id: 1,
            title: "one".to_string(),
            text: "body".to_string(),
            order_in_document: 0,
            token_start: 0,
            token_end: 10,
            token_count: 10,
            metadata: Default::default(),
        };

        let question = qa_chunk(&chapter, &document, &library, "Q?".into(), "pair-1", "question")
            .with_chapter(chapter.id, Some(1));
        let answer = qa_chunk(&chapter, &document, &library, "A.".into(), "pair-1", "answer")
            .with_chapter(chapter.id, Some(2));

        assert!(question.validate().is_ok());
        assert!(answer.validate().is_ok());
        assert_eq!(
            question.metadata.get("qa_pair"),
            answer.metadata.get("qa_pair")
        );
        assert_eq!(question.metadata.get("qa_role").unwrap(), "question");
        assert_eq!(answer.metadata.get("qa_role").unwrap(), "answer");
    }
}
