//! Document and chapter persistence
//!
//! Documents are soft-deleted; hiding a document hides its chapters and
//! chunks from search. The single-`current` rule per (library, title) is
//! enforced by a partial unique index and surfaces as a conflict.

use crate::error::{RagError, Result};
use crate::model::{Chapter, Document, DocumentStatus};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

const CURRENT_CONSTRAINT: &str = "documents_current_key";

#[derive(Clone)]
pub struct DocumentStore {
    pool: PgPool,
}

impl DocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a document. Marking it `current` while another current
    /// document exists for the same (library, title) is a conflict; the
    /// caller must clear the others first.
    pub async fn insert(&self, document: &Document) -> Result<Document> {
        let metadata = serde_json::to_value(&document.metadata)?;
        let row = sqlx::query(
            r#"
            INSERT INTO documents
                (uuid, library_id, title, text, current, publication_date,
                 token_count, status, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(document.uuid)
        .bind(document.library_id)
        .bind(&document.title)
        .bind(&document.text)
        .bind(document.current)
        .bind(document.publication_date)
        .bind(document.token_count)
        .bind(document.status.as_str())
        .bind(&metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_current_conflict(e, &document.title))?;

        debug!("Inserted document {:?}", document.title);
        document_from_row(&row)
    }

    /// Flip the `current` flag of one document
    pub async fn set_current(&self, id: i64, current: bool) -> Result<()> {
        let result = sqlx::query("UPDATE documents SET current = $1, updated_at = now() WHERE id = $2")
            .bind(current)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_current_conflict(e, "document"))?;

        if result.rows_affected() == 0 {
            return Err(RagError::NotFound(format!("document {}", id)));
        }
        Ok(())
    }

    /// Clear the `current` flag on every document of this (library, title)
    pub async fn clear_current(&self, library_id: i64, title: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE documents SET current = FALSE, updated_at = now() \
             WHERE library_id = $1 AND title = $2 AND current",
        )
        .bind(library_id)
        .bind(title)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn update_status(&self, id: i64, status: DocumentStatus) -> Result<()> {
        let result =
            sqlx::query("UPDATE documents SET status = $1, updated_at = now() WHERE id = $2")
                .bind(status.as_str())
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(RagError::NotFound(format!("document {}", id)));
        }
        debug!("Document {} -> {}", id, status.as_str());
        Ok(())
    }

    pub async fn update_token_count(&self, id: i64, token_count: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET token_count = $1, updated_at = now() WHERE id = $2")
            .bind(token_count)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Soft delete: the document and everything under it disappear from
    /// search without touching the rows.
    pub async fn soft_delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE documents SET deleted = TRUE, current = FALSE, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("No document found with id {}", id);
            return Err(RagError::NotFound(format!("document {}", id)));
        }
        Ok(())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Document> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(document_from_row)
            .transpose()?
            .ok_or_else(|| RagError::NotFound(format!("document {}", id)))
    }

    pub async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    pub async fn find_by_library_and_title(
        &self,
        library_id: i64,
        title: &str,
    ) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT * FROM documents \
             WHERE library_id = $1 AND title = $2 AND NOT deleted \
             ORDER BY created_at DESC",
        )
        .bind(library_id)
        .bind(title)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    /// Persist a document's chapters in one transaction, returning them
    /// with ids assigned, in input order.
    pub async fn insert_chapters(&self, chapters: &[Chapter]) -> Result<Vec<Chapter>> {
        let mut tx = self.pool.begin().await?;
        let mut saved = Vec::with_capacity(chapters.len());

        for chapter in chapters {
            let metadata = serde_json::to_value(&chapter.metadata)?;
            let row = sqlx::query(
                r#"
                INSERT INTO chapters
                    (document_id, title, text, order_in_document,
                     token_start, token_end, token_count, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id
                "#,
            )
            .bind(chapter.document_id)
            .bind(&chapter.title)
            .bind(&chapter.text)
            .bind(chapter.order_in_document)
            .bind(chapter.token_start)
            .bind(chapter.token_end)
            .bind(chapter.token_count)
            .bind(&metadata)
            .fetch_one(&mut *tx)
            .await?;

            let mut chapter = chapter.clone();
            chapter.id = row.get("id");
            saved.push(chapter);
        }

        tx.commit().await?;
        debug!("Inserted {} chapters", saved.len());
        Ok(saved)
    }

    pub async fn find_chapters(&self, document_id: i64) -> Result<Vec<Chapter>> {
        let rows = sqlx::query(
            "SELECT * FROM chapters WHERE document_id = $1 ORDER BY order_in_document",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chapter_from_row).collect()
    }
}

fn map_current_conflict(e: sqlx::Error, title: &str) -> RagError {
    if let sqlx::Error::Database(db) = &e {
        if db.constraint() == Some(CURRENT_CONSTRAINT) {
            return RagError::Conflict(format!(
                "another current document exists for {:?}; clear it first",
                title
            ));
        }
    }
    e.into()
}

pub(crate) fn document_from_row(row: &sqlx::postgres::PgRow) -> Result<Document> {
    let metadata: serde_json::Value = row.get("metadata");
    let metadata: HashMap<String, String> = serde_json::from_value(metadata).unwrap_or_default();
    let status: String = row.get("status");

    Ok(Document {
        id: row.get("id"),
        uuid: row.get("uuid"),
        library_id: row.get("library_id"),
        title: row.get("title"),
        text: row.get("text"),
        current: row.get("current"),
        publication_date: row.get("publication_date"),
        token_count: row.get("token_count"),
        status: DocumentStatus::from_str(&status).unwrap_or(DocumentStatus::New),
        metadata,
        deleted: row.get("deleted"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn chapter_from_row(row: &sqlx::postgres::PgRow) -> Result<Chapter> {
    let metadata: serde_json::Value = row.get("metadata");
    let metadata: HashMap<String, String> = serde_json::from_value(metadata).unwrap_or_default();

    Ok(Chapter {
        id: row.get("id"),
        document_id: row.get("document_id"),
        title: row.get("title"),
        text: row.get("text"),
        order_in_document: row.get("order_in_document"),
        token_start: row.get("token_start"),
        token_end: row.get("token_end"),
        token_count: row.get("token_count"),
        metadata,
    })
}
