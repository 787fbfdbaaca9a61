//! Core data models used throughout docvec.
//!
//! These types represent the documents, chunks, vectors, and collections
//! that flow through the ingestion and retrieval pipeline.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Free-form JSON object used for metadata records.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Declared type of a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentType {
    PlainText,
    Markup,
    StructuredData,
    Tabular,
    SourceCode,
    PortableDocument,
    WordProcessing,
}

impl DocumentType {
    pub const ALL: [DocumentType; 7] = [
        DocumentType::PlainText,
        DocumentType::Markup,
        DocumentType::StructuredData,
        DocumentType::Tabular,
        DocumentType::SourceCode,
        DocumentType::PortableDocument,
        DocumentType::WordProcessing,
    ];

    /// Canonical name, as accepted by [`FromStr`] and stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::PlainText => "plain-text",
            DocumentType::Markup => "markup",
            DocumentType::StructuredData => "structured-data",
            DocumentType::Tabular => "tabular",
            DocumentType::SourceCode => "source-code",
            DocumentType::PortableDocument => "portable-document",
            DocumentType::WordProcessing => "word-processing",
        }
    }

    /// MIME-equivalent type recorded in [`DocumentMetadata::mime_type`].
    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentType::PlainText => "text/plain",
            DocumentType::Markup => "text/html",
            DocumentType::StructuredData => "application/json",
            DocumentType::Tabular => "text/csv",
            DocumentType::SourceCode => "text/x-source",
            DocumentType::PortableDocument => MIME_PDF,
            DocumentType::WordProcessing => MIME_DOCX,
        }
    }

    /// Guess the type from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| Error::UnsupportedType(path.display().to_string()))?;
        ext.parse()
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = Error;

    /// Accepts canonical names, short aliases, file extensions, and MIME types.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().trim_start_matches('.').to_ascii_lowercase();
        let ty = match key.as_str() {
            "plain-text" | "plain" | "text" | "txt" | "text/plain" | "md" | "markdown"
            | "text/markdown" | "rst" | "log" => DocumentType::PlainText,
            "markup" | "html" | "htm" | "xhtml" | "xml" | "text/html" | "text/xml"
            | "application/xml" | "application/xhtml+xml" => DocumentType::Markup,
            "structured-data" | "structured" | "json" | "yaml" | "yml" | "application/json"
            | "application/yaml" | "application/x-yaml" | "text/yaml" => {
                DocumentType::StructuredData
            }
            "tabular" | "table" | "csv" | "tsv" | "xlsx" | "text/csv"
            | "text/tab-separated-values" | MIME_XLSX => DocumentType::Tabular,
            "source-code" | "code" | "rs" | "py" | "js" | "jsx" | "ts" | "tsx" | "go" | "java"
            | "kt" | "c" | "h" | "cc" | "cpp" | "hpp" | "cs" | "rb" | "php" | "swift" | "scala"
            | "sh" | "bash" | "sql" | "lua" | "text/x-source" => DocumentType::SourceCode,
            "portable-document" | "pdf" | MIME_PDF => DocumentType::PortableDocument,
            "word-processing" | "word" | "docx" | MIME_DOCX => DocumentType::WordProcessing,
            _ => return Err(Error::UnsupportedType(s.to_string())),
        };
        Ok(ty)
    }
}

/// Processing status of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Success,
    Partial,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Success => "success",
            ProcessingStatus::Partial => "partial",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "success" => Ok(ProcessingStatus::Success),
            "partial" => Ok(ProcessingStatus::Partial),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(Error::Storage(format!("unknown document status: {}", other))),
        }
    }
}

/// Metadata derived once per document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub language: String,
    pub word_count: usize,
    pub character_count: usize,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Provider-specific custom fields.
    #[serde(default)]
    pub custom: Metadata,
}

/// Readability and complexity signals computed by [`crate::analyze`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentStatistics {
    pub word_count: usize,
    pub sentence_count: usize,
    pub paragraph_count: usize,
    pub avg_words_per_sentence: f64,
    pub avg_syllables_per_word: f64,
    /// Flesch reading ease, clamped to `[0, 100]`.
    pub readability: f64,
    /// Additive complexity score, clamped to `[0, 100]`.
    pub complexity: f64,
    pub long_sentence_count: usize,
    pub looks_like_code: bool,
    pub reading_time_minutes: f64,
}

/// Normalized document produced by ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub file_name: String,
    pub doc_type: DocumentType,
    pub content: String,
    pub metadata: DocumentMetadata,
    pub statistics: Option<DocumentStatistics>,
    pub status: ProcessingStatus,
    #[serde(default)]
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// A freshly requested document with no content yet.
    pub fn pending(id: &str, file_name: &str, doc_type: DocumentType) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            title: file_name.to_string(),
            file_name: file_name.to_string(),
            doc_type,
            content: String::new(),
            metadata: DocumentMetadata {
                file_name: file_name.to_string(),
                mime_type: doc_type.mime_type().to_string(),
                language: "unknown".to_string(),
                ..Default::default()
            },
            statistics: None,
            status: ProcessingStatus::Pending,
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-chunk metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub word_count: usize,
    pub looks_like_code: bool,
}

/// A word-bounded slice of a document's text.
///
/// `start_offset` is inclusive and `end_offset` exclusive, both counted in
/// words from the start of the parent document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub index: usize,
    pub content: String,
    pub token_count: usize,
    pub char_count: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub metadata: ChunkMetadata,
    /// SHA-256 of `content`.
    pub hash: String,
}

/// Similarity metric fixed per collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    Euclidean,
    DotProduct,
    Manhattan,
}

impl SimilarityMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "cosine",
            SimilarityMetric::Euclidean => "euclidean",
            SimilarityMetric::DotProduct => "dot-product",
            SimilarityMetric::Manhattan => "manhattan",
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(SimilarityMetric::Cosine),
            "euclidean" | "l2" => Ok(SimilarityMetric::Euclidean),
            "dot-product" | "dot" | "dotproduct" => Ok(SimilarityMetric::DotProduct),
            "manhattan" | "l1" => Ok(SimilarityMetric::Manhattan),
            other => Err(Error::Configuration(format!(
                "unknown similarity metric '{}'; use cosine, euclidean, dot-product, or manhattan",
                other
            ))),
        }
    }
}

/// A stored embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Owning document, when the vector came from ingestion.
    #[serde(default)]
    pub document_id: Option<String>,
}

impl Vector {
    /// A vector with a random id and empty metadata.
    pub fn new(values: Vec<f32>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), values)
    }

    pub fn with_id(id: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            values,
            metadata: Metadata::new(),
            namespace: None,
            document_id: None,
        }
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }
}

/// Parameters for creating a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    #[serde(default)]
    pub metric: SimilarityMetric,
    #[serde(default)]
    pub metadata: Metadata,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            metric: SimilarityMetric::default(),
            metadata: Metadata::new(),
        }
    }

    pub fn metric(mut self, metric: SimilarityMetric) -> Self {
        self.metric = metric;
        self
    }
}

/// A named vector space with a fixed dimension and metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub dimension: usize,
    pub metric: SimilarityMetric,
    pub vector_count: usize,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    /// Build a new, empty collection from a spec with a fresh id.
    pub fn from_spec(spec: CollectionSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: spec.name,
            dimension: spec.dimension,
            metric: spec.metric,
            vector_count: 0,
            metadata: spec.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single ranked hit from a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    /// Higher is better for every metric.
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f32>>,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Per-collection statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub count: usize,
    pub dimension: usize,
    pub estimated_memory_bytes: u64,
}

/// Rough per-vector bookkeeping cost (id, metadata map, index entry).
const VECTOR_OVERHEAD_BYTES: u64 = 128;

impl CollectionStats {
    /// Stats with the shared memory estimate: raw `f32` payload plus a fixed
    /// per-vector overhead.
    pub fn estimate(count: usize, dimension: usize) -> Self {
        let per_vector = dimension as u64 * std::mem::size_of::<f32>() as u64 + VECTOR_OVERHEAD_BYTES;
        Self {
            count,
            dimension,
            estimated_memory_bytes: count as u64 * per_vector,
        }
    }
}

/// Options controlling how a single document is processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    pub extract_metadata: bool,
    pub generate_chunks: bool,
    /// Words per chunk; `None` uses the configured default.
    pub chunk_size: Option<usize>,
    /// Words shared by consecutive chunks; `None` uses the configured default.
    pub chunk_overlap: Option<usize>,
    pub preserve_formatting: bool,
    pub language_detection: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            extract_metadata: true,
            generate_chunks: true,
            chunk_size: None,
            chunk_overlap: None,
            preserve_formatting: false,
            language_detection: true,
        }
    }
}

/// A request to ingest one file into a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Document id; also the queue key.
    pub id: String,
    pub file_path: std::path::PathBuf,
    pub file_name: String,
    /// Declared type string, parsed with [`DocumentType::from_str`].
    pub file_type: String,
    pub collection_id: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub options: ProcessingOptions,
}

/// Outcome of processing one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub document: Document,
    pub chunks: Vec<DocumentChunk>,
    pub vectors_inserted: usize,
    pub duration_ms: u64,
}

/// Snapshot of the ingestion queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub processing: usize,
}
