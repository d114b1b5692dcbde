//! Hybrid search
//!
//! Fuses semantic (cosine) and lexical (`ts_rank_cd`) candidate rankings
//! with reciprocal-rank scores weighted per library. Chunks without vectors
//! are invisible to the semantic pass but still reachable lexically, so a
//! `Partial` document keeps serving.

pub mod query;

use crate::error::{RagError, Result};
use crate::llm::{Dispatcher, EmbeddingContext, EmbeddingOp};
use crate::model::{validate_weight_pair, Chunk, Library};
use crate::store::chunk::chunk_from_row;
use crate::store::Store;
use crate::tokens::TokenCounter;
use pgvector::Vector;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Largest accepted top-k
const MAX_K: usize = 100;

/// One ranked chunk
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f64,
    pub semantic_score: f64,
    pub lexical_score: f64,
}

/// Hybrid search over one or more libraries
#[derive(Clone)]
pub struct HybridSearch {
    store: Store,
    dispatcher: Arc<Dispatcher>,
    counter: TokenCounter,
    summary_max_tokens: usize,
}

impl HybridSearch {
    pub fn new(
        store: Store,
        dispatcher: Arc<Dispatcher>,
        counter: TokenCounter,
        summary_max_tokens: usize,
    ) -> Self {
        Self {
            store,
            dispatcher,
            counter,
            summary_max_tokens,
        }
    }

    /// Weighted semantic + lexical search.
    ///
    /// `weights` overrides the per-library defaults for this call; the
    /// override must still be a valid convex pair.
    pub async fn search_hybrid(
        &self,
        query_text: &str,
        libraries: &[Library],
        k: usize,
        weights: Option<(f32, f32)>,
    ) -> Result<Vec<SearchResult>> {
        validate_k(k)?;
        if libraries.is_empty() {
            return Err(RagError::InvalidInput("no libraries given".to_string()));
        }
        let rendered = query::parse(query_text)?.render();
        if let Some((semantic, lexical)) = weights {
            validate_weight_pair(semantic, lexical)?;
        }

        let mut results: Vec<SearchResult> = Vec::new();
        for library in libraries {
            let (w_sem, w_lex) =
                weights.unwrap_or((library.semantic_weight, library.lexical_weight));
            validate_weight_pair(w_sem, w_lex)?;

            let query_vector = self.query_vector(query_text, library).await?;
            let semantic_ranks = self.semantic_ranks(&query_vector, library.id, 2 * k).await?;
            let lexical_ranks = self.lexical_ranks(&rendered, library.id, 2 * k).await?;

            let mut candidate_ids: Vec<i64> = semantic_ranks.keys().copied().collect();
            for id in lexical_ranks.keys() {
                if !semantic_ranks.contains_key(id) {
                    candidate_ids.push(*id);
                }
            }
            if candidate_ids.is_empty() {
                continue;
            }

            let chunks = self.load_chunks(&candidate_ids).await?;
            for chunk in chunks {
                let (score, semantic_score, lexical_score) = fuse_scores(
                    semantic_ranks.get(&chunk.id).copied(),
                    lexical_ranks.get(&chunk.id).copied(),
                    k,
                    w_sem,
                    w_lex,
                );
                results.push(SearchResult {
                    chunk,
                    score,
                    semantic_score,
                    lexical_score,
                });
            }
        }

        sort_by_score(&mut results);
        results.truncate(k);
        debug!("Hybrid search returned {} results", results.len());
        Ok(results)
    }

    /// Pure vector search, ranked by cosine similarity
    pub async fn search_semantic(
        &self,
        query_text: &str,
        libraries: &[Library],
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        validate_k(k)?;
        if query_text.trim().is_empty() {
            return Err(RagError::InvalidInput("empty query".to_string()));
        }

        let mut results = Vec::new();
        for library in libraries {
            let query_vector = self.query_vector(query_text, library).await?;
            let rows = sqlx::query(
                "SELECT c.*, (c.embedding <=> $1) AS distance \
                 FROM chunks c JOIN documents d ON d.id = c.document_id \
                 WHERE c.library_id = $2 AND c.embedding IS NOT NULL AND NOT d.deleted \
                 ORDER BY c.embedding <=> $1 \
                 LIMIT $3",
            )
            .bind(Vector::from(query_vector))
            .bind(library.id)
            .bind(k as i64)
            .fetch_all(self.store.pool())
            .await?;

            for row in &rows {
                let distance: f64 = row.get("distance");
                let similarity = 1.0 - distance;
                results.push(SearchResult {
                    chunk: chunk_from_row(row)?,
                    score: similarity,
                    semantic_score: similarity,
                    lexical_score: 0.0,
                });
            }
        }

        sort_by_score(&mut results);
        results.truncate(k);
        Ok(results)
    }

    /// Pure full-text search, ranked by `ts_rank_cd`
    pub async fn search_textual(
        &self,
        query_text: &str,
        libraries: &[Library],
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        validate_k(k)?;
        let rendered = query::parse(query_text)?.render();

        let mut results = Vec::new();
        for library in libraries {
            let rows = sqlx::query(
                "SELECT c.*, ts_rank_cd(c.text_search, q) AS rank \
                 FROM chunks c \
                 JOIN documents d ON d.id = c.document_id \
                 CROSS JOIN websearch_to_tsquery('simple_unaccent', $1) AS q \
                 WHERE c.library_id = $2 AND c.text_search @@ q AND NOT d.deleted \
                 ORDER BY ts_rank_cd(c.text_search, q) DESC \
                 LIMIT $3",
            )
            .bind(&rendered)
            .bind(library.id)
            .bind(k as i64)
            .fetch_all(self.store.pool())
            .await?;

            for row in &rows {
                let rank: f32 = row.get("rank");
                results.push(SearchResult {
                    chunk: chunk_from_row(row)?,
                    score: rank as f64,
                    semantic_score: 0.0,
                    lexical_score: rank as f64,
                });
            }
        }

        sort_by_score(&mut results);
        results.truncate(k);
        Ok(results)
    }

    /// Embed the query under the library's embedding binding
    async fn query_vector(&self, query_text: &str, library: &Library) -> Result<Vec<f32>> {
        let context = EmbeddingContext::bind(
            library,
            Arc::clone(&self.dispatcher),
            self.counter.clone(),
            self.summary_max_tokens,
        )?;
        Ok(context
            .embed_one(query_text, EmbeddingOp::Query)
            .await?
            .vector)
    }

    /// Chunk id -> 1-based rank by cosine distance, limited to `limit`
    async fn semantic_ranks(
        &self,
        query_vector: &[f32],
        library_id: i64,
        limit: usize,
    ) -> Result<HashMap<i64, i64>> {
        let rows = sqlx::query(
            "SELECT c.id, ROW_NUMBER() OVER (ORDER BY c.embedding <=> $1) AS rank \
             FROM chunks c JOIN documents d ON d.id = c.document_id \
             WHERE c.library_id = $2 AND c.embedding IS NOT NULL AND NOT d.deleted \
             ORDER BY c.embedding <=> $1 \
             LIMIT $3",
        )
        .bind(Vector::from(query_vector.to_vec()))
        .bind(library_id)
        .bind(limit as i64)
        .fetch_all(self.store.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("id"), row.get("rank")))
            .collect())
    }

    /// Chunk id -> 1-based rank by `ts_rank_cd`, limited to `limit`
    async fn lexical_ranks(
        &self,
        rendered_query: &str,
        library_id: i64,
        limit: usize,
    ) -> Result<HashMap<i64, i64>> {
        let rows = sqlx::query(
            "SELECT c.id, ROW_NUMBER() OVER (ORDER BY ts_rank_cd(c.text_search, q) DESC) AS rank \
             FROM chunks c \
             JOIN documents d ON d.id = c.document_id \
             CROSS JOIN websearch_to_tsquery('simple_unaccent', $1) AS q \
             WHERE c.library_id = $2 AND c.text_search @@ q AND NOT d.deleted \
             ORDER BY ts_rank_cd(c.text_search, q) DESC \
             LIMIT $3",
        )
        .bind(rendered_query)
        .bind(library_id)
        .bind(limit as i64)
        .fetch_all(self.store.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("id"), row.get("rank")))
            .collect())
    }

    async fn load_chunks(&self, ids: &[i64]) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(chunk_from_row).collect()
    }
}

fn validate_k(k: usize) -> Result<()> {
    if k == 0 || k > MAX_K {
        return Err(RagError::InvalidInput(format!(
            "k must be in 1..={}, got {}",
            MAX_K, k
        )));
    }
    Ok(())
}

/// Reciprocal-rank fusion of one chunk's two rankings.
///
/// A chunk missing from a modality contributes 0 on that side.
fn fuse_scores(
    semantic_rank: Option<i64>,
    lexical_rank: Option<i64>,
    k: usize,
    w_sem: f32,
    w_lex: f32,
) -> (f64, f64, f64) {
    let semantic = semantic_rank
        .map(|rank| 1.0 / (k as f64 + rank as f64))
        .unwrap_or(0.0);
    let lexical = lexical_rank
        .map(|rank| 1.0 / (k as f64 + rank as f64))
        .unwrap_or(0.0);
    let score = w_sem as f64 * semantic + w_lex as f64 * lexical;
    (score, semantic, lexical)
}

fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_k_bounds() {
        assert!(validate_k(1).is_ok());
        assert!(validate_k(100).is_ok());
        assert!(validate_k(0).is_err());
        assert!(validate_k(101).is_err());
    }

    #[test]
    fn test_fusion_is_convex() {
        // With both weights in [0, 1] the hybrid score stays between the
        // two modality scores
        for (sem, lex) in [(Some(1), Some(3)), (Some(5), None), (None, Some(2))] {
            let (score, s, l) = fuse_scores(sem, lex, 10, 0.6, 0.4);
            let lo = s.min(l);
            let hi = s.max(l);
            assert!(score >= lo - 1e-12 && score <= hi + 1e-12);
        }
    }

    #[test]
    fn test_fusion_reciprocal_rank() {
        let (score, s, l) = fuse_scores(Some(1), Some(2), 10, 0.5, 0.5);
        assert!((s - 1.0 / 11.0).abs() < 1e-12);
        assert!((l - 1.0 / 12.0).abs() < 1e-12);
        assert!((score - 0.5 * (1.0 / 11.0 + 1.0 / 12.0)).abs() < 1e-12);

        // Missing modality contributes zero
        let (score, s, l) = fuse_scores(None, Some(1), 10, 0.6, 0.4);
        assert_eq!(s, 0.0);
        assert!((score - 0.4 * l).abs() < 1e-12);
    }

    #[test]
    fn test_better_rank_scores_higher() {
        let (first, ..) = fuse_scores(Some(1), Some(1), 10, 0.6, 0.4);
        let (second, ..) = fuse_scores(Some(2), Some(2), 10, 0.6, 0.4);
        assert!(first > second);
    }
}
