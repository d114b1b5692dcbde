//! Persistent store
//!
//! Postgres with the pgvector extension for dense vectors and a
//! `simple_unaccent` text-search configuration for the lexical column.
//! Vectors are always bound as native vector parameters, never as strings.

pub mod chunk;
pub mod document;
pub mod library;

pub use chunk::ChunkRepository;
pub use document::DocumentStore;
pub use library::LibraryRegistry;

use crate::config::DatabaseConfig;
use crate::error::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Connection handle shared by all repositories
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to the configured database
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn libraries(&self) -> LibraryRegistry {
        LibraryRegistry::new(self.pool.clone())
    }

    pub fn documents(&self) -> DocumentStore {
        DocumentStore::new(self.pool.clone())
    }

    pub fn chunks(&self) -> ChunkRepository {
        ChunkRepository::new(self.pool.clone())
    }

    /// Create extensions, the `simple_unaccent` search configuration, and
    /// the four tables.
    ///
    /// `text_search` is a stored generated column so it can never drift
    /// from `text`/`metadata`. With `vector_dimension` set the embedding
    /// column is typed and gets an IVFFlat cosine index; without it the
    /// column accepts any width and semantic queries scan exactly.
    pub async fn init_schema(&self, vector_dimension: Option<usize>) -> Result<()> {
        info!("Initializing store schema");

        let vector_type = match vector_dimension {
            Some(dimension) => format!("vector({})", dimension),
            None => "vector".to_string(),
        };

        let mut statements: Vec<String> = vec![
            "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
            "CREATE EXTENSION IF NOT EXISTS unaccent".to_string(),
            // No IF NOT EXISTS for text search configurations
            r#"
            DO $$
            BEGIN
                IF NOT EXISTS (SELECT 1 FROM pg_ts_config WHERE cfgname = 'simple_unaccent') THEN
                    CREATE TEXT SEARCH CONFIGURATION simple_unaccent (COPY = simple);
                    ALTER TEXT SEARCH CONFIGURATION simple_unaccent
                        ALTER MAPPING FOR hword, hword_part, word
                        WITH unaccent, simple;
                END IF;
            END
            $$
            "#
            .to_string(),
            r#"
            CREATE TABLE IF NOT EXISTS libraries (
                id BIGSERIAL PRIMARY KEY,
                uuid UUID NOT NULL UNIQUE,
                name TEXT NOT NULL UNIQUE,
                area TEXT NOT NULL DEFAULT '',
                semantic_weight REAL NOT NULL,
                lexical_weight REAL NOT NULL,
                embedding_model TEXT NOT NULL,
                embedding_dimension INTEGER NOT NULL,
                completion_model TEXT NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#
            .to_string(),
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id BIGSERIAL PRIMARY KEY,
                uuid UUID NOT NULL UNIQUE,
                library_id BIGINT NOT NULL REFERENCES libraries(id),
                title TEXT NOT NULL,
                text TEXT NOT NULL,
                current BOOLEAN NOT NULL DEFAULT FALSE,
                publication_date DATE,
                token_count BIGINT NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'new',
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                deleted BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#
            .to_string(),
            // At most one current document per (library, title)
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS documents_current_key
                ON documents(library_id, title)
                WHERE current AND NOT deleted
            "#
            .to_string(),
            r#"
            CREATE TABLE IF NOT EXISTS chapters (
                id BIGSERIAL PRIMARY KEY,
                document_id BIGINT NOT NULL REFERENCES documents(id),
                title TEXT NOT NULL,
                text TEXT NOT NULL,
                order_in_document INTEGER NOT NULL,
                token_start BIGINT NOT NULL,
                token_end BIGINT NOT NULL,
                token_count BIGINT NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                UNIQUE (document_id, order_in_document)
            )
            "#
            .to_string(),
            // Free-form metadata values outside the six weighted keys; kept
            // in a function so the generated column below can use it
            r#"
            CREATE OR REPLACE FUNCTION chunk_extra_metadata(metadata jsonb) RETURNS text
            LANGUAGE sql IMMUTABLE AS $fn$
                SELECT coalesce(string_agg(value, ' '), '')
                FROM jsonb_each_text(metadata)
                WHERE key NOT IN ('name', 'chapter', 'description', 'area', 'keywords', 'author')
            $fn$
            "#
            .to_string(),
            format!(
                r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id BIGSERIAL PRIMARY KEY,
                library_id BIGINT NOT NULL REFERENCES libraries(id),
                document_id BIGINT NOT NULL REFERENCES documents(id),
                chapter_id BIGINT REFERENCES chapters(id),
                kind TEXT NOT NULL,
                text TEXT NOT NULL,
                order_in_chapter INTEGER,
                embedding {vector_type},
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                text_search tsvector GENERATED ALWAYS AS (
                       setweight(to_tsvector('simple_unaccent',
                           coalesce(metadata->>'name', '') || ' ' || coalesce(metadata->>'chapter', '')), 'A')
                    || setweight(to_tsvector('simple_unaccent',
                           coalesce(metadata->>'description', '')), 'B')
                    || setweight(to_tsvector('simple_unaccent',
                           coalesce(metadata->>'area', '') || ' ' || coalesce(metadata->>'keywords', '') || ' ' || text), 'C')
                    || setweight(to_tsvector('simple_unaccent',
                           coalesce(metadata->>'author', '') || ' ' || chunk_extra_metadata(metadata)), 'D')
                ) STORED,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#
            ),
            "CREATE INDEX IF NOT EXISTS chunks_library_idx ON chunks(library_id)".to_string(),
            "CREATE INDEX IF NOT EXISTS chunks_document_idx ON chunks(document_id)".to_string(),
            "CREATE INDEX IF NOT EXISTS chunks_chapter_idx ON chunks(chapter_id)".to_string(),
            "CREATE INDEX IF NOT EXISTS chunks_text_search_idx ON chunks USING gin(text_search)"
                .to_string(),
        ];

        if vector_dimension.is_some() {
            statements.push(
                "CREATE INDEX IF NOT EXISTS chunks_embedding_idx ON chunks \
                 USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)"
                    .to_string(),
            );
        }

        for statement in statements {
            sqlx::query(&statement).execute(&self.pool).await?;
        }

        info!("Store schema ready");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Store;
    use crate::config::DatabaseConfig;

    /// Connect to `DATABASE_URL` and bootstrap the schema; `None` skips the
    /// test when no database is available (okay for CI).
    pub async fn connect_test_store() -> Option<Store> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let config = DatabaseConfig {
            url,
            max_connections: 2,
            vector_dimension: None,
        };
        let store = Store::connect(&config).await.ok()?;
        store.init_schema(None).await.ok()?;
        Some(store)
    }
}
