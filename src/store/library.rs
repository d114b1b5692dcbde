//! Library registry
//!
//! Named collections carrying search weights and model bindings. The
//! stored weights are the per-library defaults; search calls may override
//! them per query.

use crate::error::{RagError, Result};
use crate::model::Library;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct LibraryRegistry {
    pool: PgPool,
}

impl LibraryRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or update a library. The weight invariant is checked before
    /// anything touches the store.
    pub async fn save(&self, library: &Library) -> Result<Library> {
        library.validate()?;

        let metadata = serde_json::to_value(&library.metadata)?;
        let row = sqlx::query(
            r#"
            INSERT INTO libraries
                (uuid, name, area, semantic_weight, lexical_weight,
                 embedding_model, embedding_dimension, completion_model, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (uuid) DO UPDATE SET
                name = EXCLUDED.name,
                area = EXCLUDED.area,
                semantic_weight = EXCLUDED.semantic_weight,
                lexical_weight = EXCLUDED.lexical_weight,
                embedding_model = EXCLUDED.embedding_model,
                embedding_dimension = EXCLUDED.embedding_dimension,
                completion_model = EXCLUDED.completion_model,
                metadata = EXCLUDED.metadata,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(library.uuid)
        .bind(&library.name)
        .bind(&library.area)
        .bind(library.semantic_weight)
        .bind(library.lexical_weight)
        .bind(&library.embedding_model)
        .bind(library.embedding_dimension as i32)
        .bind(&library.completion_model)
        .bind(&metadata)
        .fetch_one(&self.pool)
        .await?;

        debug!("Saved library {}", library.name);
        library_from_row(&row)
    }

    pub async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Library>> {
        let row = sqlx::query("SELECT * FROM libraries WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(library_from_row).transpose()
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Library>> {
        let row = sqlx::query("SELECT * FROM libraries WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(library_from_row).transpose()
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Library> {
        let row = sqlx::query("SELECT * FROM libraries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(library_from_row)
            .transpose()?
            .ok_or_else(|| RagError::NotFound(format!("library {}", id)))
    }

    pub async fn list(&self) -> Result<Vec<Library>> {
        let rows = sqlx::query("SELECT * FROM libraries ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(library_from_row).collect()
    }
}

pub(crate) fn library_from_row(row: &sqlx::postgres::PgRow) -> Result<Library> {
    let metadata: serde_json::Value = row.get("metadata");
    let metadata: HashMap<String, String> = serde_json::from_value(metadata).unwrap_or_default();

    Ok(Library {
        id: row.get("id"),
        uuid: row.get("uuid"),
        name: row.get("name"),
        area: row.get("area"),
        semantic_weight: row.get("semantic_weight"),
        lexical_weight: row.get("lexical_weight"),
        embedding_model: row.get("embedding_model"),
        embedding_dimension: row.get::<i32, _>("embedding_dimension") as usize,
        completion_model: row.get("completion_model"),
        metadata,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::connect_test_store;

    fn sample_library(name: &str) -> Library {
        Library::new(name, "testing", 0.6, 0.4, "nomic-embed-text", 8, "llama3.2")
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_weights() {
        let Some(store) = connect_test_store().await else {
            return;
        };

        let mut library = sample_library("weights-invalid");
        library.semantic_weight = 0.9;
        let result = store.libraries().save(&library).await;
        assert!(matches!(result, Err(RagError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_save_and_find_round_trip() {
        let Some(store) = connect_test_store().await else {
            return;
        };

        let name = format!("lib-{}", Uuid::new_v4());
        let library = sample_library(&name);
        let saved = store.libraries().save(&library).await.unwrap();
        assert!(saved.id > 0);
        assert_eq!(saved.uuid, library.uuid);

        let by_uuid = store
            .libraries()
            .find_by_uuid(library.uuid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_uuid.name, name);
        assert_eq!(by_uuid.embedding_dimension, 8);

        let by_name = store.libraries().find_by_name(&name).await.unwrap().unwrap();
        assert_eq!(by_name.id, saved.id);

        // Idempotent upsert keeps the surrogate id
        let again = store.libraries().save(&by_name).await.unwrap();
        assert_eq!(again.id, saved.id);
    }

    #[tokio::test]
    async fn test_find_missing_library() {
        let Some(store) = connect_test_store().await else {
            return;
        };

        let missing = store.libraries().find_by_uuid(Uuid::new_v4()).await.unwrap();
        assert!(missing.is_none());

        let result = store.libraries().find_by_id(i64::MAX).await;
        assert!(matches!(result, Err(RagError::NotFound(_))));
    }
}
