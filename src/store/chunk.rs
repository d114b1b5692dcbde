//! Chunk repository
//!
//! Inserts carry a null vector; the backfill fills each vector exactly once
//! through [`ChunkRepository::update_vector`], which binds the embedding as
//! a native vector parameter. The `text_search` column is generated by the
//! store and never written here.

use crate::error::{RagError, Result};
use crate::model::{Chunk, ChunkKind};
use pgvector::Vector;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone)]
pub struct ChunkRepository {
    pool: PgPool,
}

impl ChunkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert chunks in one transaction, returning ids in input order.
    ///
    /// Kind invariants are checked before the transaction starts, so a
    /// malformed chunk can never be partially persisted.
    pub async fn insert_batch(&self, chunks: &[Chunk]) -> Result<Vec<i64>> {
        for chunk in chunks {
            chunk.validate()?;
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let metadata = serde_json::to_value(&chunk.metadata)?;
            let embedding = chunk.embedding.clone().map(Vector::from);
            let row = sqlx::query(
                r#"
                INSERT INTO chunks
                    (library_id, document_id, chapter_id, kind, text,
                     order_in_chapter, embedding, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id
                "#,
            )
            .bind(chunk.library_id)
            .bind(chunk.document_id)
            .bind(chunk.chapter_id)
            .bind(chunk.kind.as_str())
            .bind(&chunk.text)
            .bind(chunk.order_in_chapter)
            .bind(embedding)
            .bind(&metadata)
            .fetch_one(&mut *tx)
            .await?;

            ids.push(row.get("id"));
        }

        tx.commit().await?;
        debug!("Inserted {} chunks", ids.len());
        Ok(ids)
    }

    /// Fill one chunk's vector. Single statement, idempotent, native bind.
    pub async fn update_vector(&self, id: i64, vector: &[f32]) -> Result<()> {
        let embedding = Vector::from(vector.to_vec());
        let result = sqlx::query("UPDATE chunks SET embedding = $1 WHERE id = $2")
            .bind(embedding)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RagError::NotFound(format!("chunk {}", id)));
        }
        Ok(())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Chunk> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(chunk_from_row)
            .transpose()?
            .ok_or_else(|| RagError::NotFound(format!("chunk {}", id)))
    }

    pub async fn find_by_document(&self, document_id: i64) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE document_id = $1 \
             ORDER BY chapter_id NULLS FIRST, order_in_chapter NULLS FIRST, id",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    pub async fn find_by_library(&self, library_ids: &[i64]) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT c.* FROM chunks c \
             JOIN documents d ON d.id = c.document_id \
             WHERE c.library_id = ANY($1) AND NOT d.deleted \
             ORDER BY c.id",
        )
        .bind(library_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    /// Merge keys into a chunk's metadata. Existing keys are overwritten;
    /// the generated `text_search` column follows automatically.
    pub async fn merge_metadata(
        &self,
        id: i64,
        entries: &HashMap<String, String>,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let patch = serde_json::to_value(entries)?;
        let result =
            sqlx::query("UPDATE chunks SET metadata = metadata || $1::jsonb WHERE id = $2")
                .bind(&patch)
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(RagError::NotFound(format!("chunk {}", id)));
        }
        Ok(())
    }

    /// Highest order used inside a chapter; 0 when the chapter only has
    /// unordered chunks
    pub async fn max_order_in_chapter(&self, chapter_id: i64) -> Result<i32> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(order_in_chapter), 0) AS max_order \
             FROM chunks WHERE chapter_id = $1",
        )
        .bind(chapter_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("max_order"))
    }

    /// Vector backfill progress for a document: (filled, missing)
    pub async fn vector_progress(&self, document_id: i64) -> Result<(i64, i64)> {
        let row = sqlx::query(
            "SELECT COUNT(*) FILTER (WHERE embedding IS NOT NULL) AS filled, \
                    COUNT(*) FILTER (WHERE embedding IS NULL) AS missing \
             FROM chunks WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.get("filled"), row.get("missing")))
    }
}

pub(crate) fn chunk_from_row(row: &sqlx::postgres::PgRow) -> Result<Chunk> {
    let metadata: serde_json::Value = row.get("metadata");
    let metadata: HashMap<String, String> = serde_json::from_value(metadata).unwrap_or_default();
    let kind: String = row.get("kind");
    let embedding: Option<Vector> = row.get("embedding");

    Ok(Chunk {
        id: row.get("id"),
        library_id: row.get("library_id"),
        document_id: row.get("document_id"),
        chapter_id: row.get("chapter_id"),
        kind: ChunkKind::from_str(&kind).unwrap_or(ChunkKind::Other),
        text: row.get("text"),
        order_in_chapter: row.get("order_in_chapter"),
        embedding: embedding.map(|v| v.as_slice().to_vec()),
        metadata,
        created_at: row.get("created_at"),
    })
}
