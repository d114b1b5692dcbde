//! Domain records for the library/document/chapter/chunk hierarchy
//!
//! Plain records holding foreign-key ids; no object graph is kept in
//! memory. Repositories fetch related rows explicitly.

use crate::error::{RagError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Tolerance on the ranking-weight invariant `w_sem + w_lex = 1`
pub const WEIGHT_TOLERANCE: f32 = 1e-3;

/// Metadata keys excluded from embedded metadata blocks. `url` stays.
const SUPPRESSED_METADATA_KEYS: &[&str] = &[
    "crc",
    "checksum",
    "size",
    "id",
    "created_at",
    "updated_at",
    "hash",
    "mtime",
    "etag",
    "path",
];

/// A named collection of documents with ranking weights and model bindings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    /// Integer surrogate; 0 until persisted
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    /// Knowledge-area tag
    pub area: String,
    pub semantic_weight: f32,
    pub lexical_weight: f32,
    pub embedding_model: String,
    /// Library-wide embedding dimension D
    pub embedding_dimension: usize,
    pub completion_model: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Library {
    pub fn new(
        name: impl Into<String>,
        area: impl Into<String>,
        semantic_weight: f32,
        lexical_weight: f32,
        embedding_model: impl Into<String>,
        embedding_dimension: usize,
        completion_model: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            name: name.into(),
            area: area.into(),
            semantic_weight,
            lexical_weight,
            embedding_model: embedding_model.into(),
            embedding_dimension,
            completion_model: completion_model.into(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the `w_sem + w_lex = 1` invariant
    pub fn validate_weights(&self) -> Result<()> {
        validate_weight_pair(self.semantic_weight, self.lexical_weight)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RagError::InvalidInput("library name is empty".to_string()));
        }
        if self.embedding_dimension == 0 {
            return Err(RagError::InvalidConfiguration(
                "embedding dimension must be positive".to_string(),
            ));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(RagError::InvalidConfiguration(
                "embedding model is empty".to_string(),
            ));
        }
        self.validate_weights()
    }
}

/// Check a semantic/lexical weight pair against the convexity invariant
pub fn validate_weight_pair(semantic: f32, lexical: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&semantic) || !(0.0..=1.0).contains(&lexical) {
        return Err(RagError::InvalidConfiguration(format!(
            "weights must lie in [0, 1]: w_sem={}, w_lex={}",
            semantic, lexical
        )));
    }
    if (semantic + lexical - 1.0).abs() >= WEIGHT_TOLERANCE {
        return Err(RagError::InvalidConfiguration(format!(
            "w_sem + w_lex must equal 1.0, got {}",
            semantic + lexical
        )));
    }
    Ok(())
}

/// Document ingestion state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    New,
    Splitting,
    Chunking,
    Embedding,
    /// All chunk vectors filled
    Ready,
    /// Some vectors missing; still a valid serving state
    Partial,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::New => "new",
            DocumentStatus::Splitting => "splitting",
            DocumentStatus::Chunking => "chunking",
            DocumentStatus::Embedding => "embedding",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Partial => "partial",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "splitting" => Some(Self::Splitting),
            "chunking" => Some(Self::Chunking),
            "embedding" => Some(Self::Embedding),
            "ready" => Some(Self::Ready),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A complete work inside a library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub uuid: Uuid,
    pub library_id: i64,
    pub title: String,
    /// Original text, Markdown after conversion
    pub text: String,
    /// At most one current document per (library, title)
    pub current: bool,
    pub publication_date: Option<NaiveDate>,
    pub token_count: i64,
    pub status: DocumentStatus,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(library_id: i64, title: impl Into<String>, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            library_id,
            title: title.into(),
            text: text.into(),
            current: true,
            publication_date: None,
            token_count: 0,
            status: DocumentStatus::New,
            metadata: HashMap::new(),
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// First 500 characters, handed to the router for classification
    pub fn header_sample(&self) -> &str {
        let end = self
            .text
            .char_indices()
            .nth(500)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len());
        &self.text[..end]
    }
}

/// An ordered segment of a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub document_id: i64,
    pub title: String,
    pub text: String,
    /// Unique per document
    pub order_in_document: i32,
    /// Token range `[token_start, token_end)` within the document
    pub token_start: i64,
    pub token_end: i64,
    pub token_count: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// What a chunk carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Document,
    Chapter,
    Excerpt,
    QuestionAnswer,
    Summary,
    Metadata,
    Other,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Document => "document",
            ChunkKind::Chapter => "chapter",
            ChunkKind::Excerpt => "excerpt",
            ChunkKind::QuestionAnswer => "question_answer",
            ChunkKind::Summary => "summary",
            ChunkKind::Metadata => "metadata",
            ChunkKind::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "document" => Some(Self::Document),
            "chapter" => Some(Self::Chapter),
            "excerpt" => Some(Self::Excerpt),
            "question_answer" => Some(Self::QuestionAnswer),
            "summary" => Some(Self::Summary),
            "metadata" => Some(Self::Metadata),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// The embedding-bearing leaf of the hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    /// Denormalized back-pointer for query sharding
    pub library_id: i64,
    pub document_id: i64,
    pub chapter_id: Option<i64>,
    pub kind: ChunkKind,
    /// The exact string that gets embedded
    pub text: String,
    /// ≥ 0; 0 is reserved for summary chunks
    pub order_in_chapter: Option<i32>,
    /// None until the backfill fills it; never mutated afterwards
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub fn new(library_id: i64, document_id: i64, kind: ChunkKind, text: impl Into<String>) -> Self {
        Self {
            id: 0,
            library_id,
            document_id,
            chapter_id: None,
            kind,
            text: text.into(),
            order_in_chapter: None,
            embedding: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_chapter(mut self, chapter_id: i64, order_in_chapter: Option<i32>) -> Self {
        self.chapter_id = Some(chapter_id);
        self.order_in_chapter = order_in_chapter;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Enforce the kind/chapter/order invariants
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            ChunkKind::Document => {
                if self.chapter_id.is_some() || self.order_in_chapter.is_some() {
                    return Err(RagError::InvalidInput(
                        "document chunk must not carry chapter or order".to_string(),
                    ));
                }
            }
            ChunkKind::Chapter => {
                if self.chapter_id.is_none() {
                    return Err(RagError::InvalidInput(
                        "chapter chunk requires a chapter".to_string(),
                    ));
                }
                if self.order_in_chapter.is_some() {
                    return Err(RagError::InvalidInput(
                        "chapter chunk must not carry an order".to_string(),
                    ));
                }
            }
            _ => {
                if self.chapter_id.is_none() || self.order_in_chapter.is_none() {
                    return Err(RagError::InvalidInput(format!(
                        "{} chunk requires chapter and order",
                        self.kind.as_str()
                    )));
                }
                if self.order_in_chapter.unwrap_or(0) < 0 {
                    return Err(RagError::InvalidInput(
                        "order_in_chapter must be non-negative".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// What gets embedded for each chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenFlag {
    /// The raw chunk text
    OnlyText,
    /// The text prefixed by a curated metadata block
    FullTextMetadata,
    /// The metadata block alone
    OnlyMetadata,
}

impl Default for GenFlag {
    fn default() -> Self {
        Self::OnlyText
    }
}

/// Render the curated metadata block for embedding.
///
/// Bookkeeping keys (checksums, sizes, timestamps) are filtered out; `url`
/// is informative and kept. Keys are emitted sorted for a stable rendering.
pub fn render_metadata_block(metadata: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = metadata
        .keys()
        .filter(|k| !SUPPRESSED_METADATA_KEYS.contains(&k.to_lowercase().as_str()))
        .collect();
    keys.sort();

    keys.iter()
        .map(|k| format!("{}: {}", k, metadata[k.as_str()]))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the text to embed for a chunk under the given generation flag
pub fn embeddable_text(chunk: &Chunk, flag: GenFlag) -> String {
    match flag {
        GenFlag::OnlyText => chunk.text.clone(),
        GenFlag::FullTextMetadata => {
            let block = render_metadata_block(&chunk.metadata);
            if block.is_empty() {
                chunk.text.clone()
            } else {
                format!("{}\n\n{}", block, chunk.text)
            }
        }
        GenFlag::OnlyMetadata => render_metadata_block(&chunk.metadata),
    }
}
