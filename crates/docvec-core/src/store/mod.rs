//! Storage abstraction for docvec.
//!
//! [`VectorStore`] is the backend contract for collections of vectors:
//! every backend (in-memory, SQLite, remote index service) implements the
//! same operations with the same error taxonomy, so callers can tell them
//! apart only by latency and persistence. [`DocumentStore`] persists the
//! ingested documents and their chunks.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{
    Collection, CollectionSpec, CollectionStats, Document, DocumentChunk, SearchResult, Vector,
};
use crate::search::MetadataFilter;

/// Parameters for one similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub vector: Vec<f32>,
    pub top_k: usize,
    #[serde(default)]
    pub filter: Option<MetadataFilter>,
    /// Echo stored vector values in each result.
    #[serde(default)]
    pub include_values: bool,
}

impl SearchQuery {
    pub fn new(vector: Vec<f32>, top_k: usize) -> Self {
        Self {
            vector,
            top_k,
            filter: None,
            include_values: false,
        }
    }

    pub fn filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = (!filter.is_empty()).then_some(filter);
        self
    }

    pub fn include_values(mut self, include: bool) -> Self {
        self.include_values = include;
        self
    }
}

/// Abstract vector index backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_collection`](VectorStore::create_collection) | Create an empty collection |
/// | [`get_collection`](VectorStore::get_collection) | Fetch a collection descriptor |
/// | [`list_collections`](VectorStore::list_collections) | List all collections |
/// | [`delete_collection`](VectorStore::delete_collection) | Drop a collection and its vectors |
/// | [`insert`](VectorStore::insert) | Insert a batch of vectors (all-or-nothing) |
/// | [`search`](VectorStore::search) | Top-K similarity search |
/// | [`delete`](VectorStore::delete) | Remove vectors by id (unknown ids ignored) |
/// | [`stats`](VectorStore::stats) | Count, dimension, memory estimate |
/// | [`reindex`](VectorStore::reindex) | Rebuild internal structures |
///
/// # Contract
///
/// - `insert` fails with [`Error::DimensionMismatch`] if any vector's length
///   differs from the collection's dimension, and then stores nothing.
///   Re-inserting an existing id replaces that vector in place.
/// - `search` fails with [`Error::DimensionMismatch`] for a wrongly sized
///   query, returns results in non-increasing score order (ties in
///   insertion order), and returns every match when `top_k` exceeds the
///   collection size.
/// - Every operation on an unknown collection fails with
///   [`Error::CollectionNotFound`].
/// - `vector_count` always equals the number of stored vectors, including
///   under concurrent inserts into the same collection.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend identifier (`"memory"`, `"sqlite"`, `"qdrant"`).
    fn backend_name(&self) -> &'static str;

    async fn create_collection(&self, spec: CollectionSpec) -> Result<Collection>;

    async fn get_collection(&self, collection_id: &str) -> Result<Collection>;

    async fn list_collections(&self) -> Result<Vec<Collection>>;

    async fn delete_collection(&self, collection_id: &str) -> Result<()>;

    async fn insert(&self, collection_id: &str, vectors: Vec<Vector>) -> Result<()>;

    async fn search(&self, collection_id: &str, query: &SearchQuery) -> Result<Vec<SearchResult>>;

    async fn delete(&self, collection_id: &str, ids: &[String]) -> Result<()>;

    async fn stats(&self, collection_id: &str) -> Result<CollectionStats>;

    /// Rebuild internal structures without changing external behaviour.
    /// Exact-search backends have nothing to rebuild.
    async fn reindex(&self, collection_id: &str) -> Result<()> {
        self.get_collection(collection_id).await.map(|_| ())
    }
}

/// Persistence for ingested documents and their chunks.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Write a document and replace its chunks as one unit.
    async fn save_document(&self, doc: &Document, chunks: &[DocumentChunk]) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Chunks of a document, in index order.
    async fn get_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>>;
}

/// Reject a collection spec that cannot hold vectors.
pub fn validate_spec(spec: &CollectionSpec) -> Result<()> {
    if spec.dimension == 0 {
        return Err(Error::Configuration(
            "collection dimension must be > 0".to_string(),
        ));
    }
    if spec.name.trim().is_empty() {
        return Err(Error::Configuration(
            "collection name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Check every vector in a batch against the collection dimension.
///
/// Called before any write so a bad batch leaves the collection untouched.
pub fn validate_batch(dimension: usize, vectors: &[Vector]) -> Result<()> {
    for v in vectors {
        check_dimension(dimension, v.values.len())?;
        if v.id.is_empty() {
            return Err(Error::Configuration("vector id must not be empty".to_string()));
        }
        check_finite(&v.values, &format!("vector '{}'", v.id))?;
    }
    Ok(())
}

/// Check a query vector against the collection dimension.
pub fn validate_query(dimension: usize, vector: &[f32]) -> Result<()> {
    check_dimension(dimension, vector.len())?;
    check_finite(vector, "query vector")
}

/// NaN or infinite components have no place in a similarity ordering.
fn check_finite(values: &[f32], what: &str) -> Result<()> {
    if let Some(pos) = values.iter().position(|x| !x.is_finite()) {
        return Err(Error::Configuration(format!(
            "{} has a non-finite value at position {}",
            what, pos
        )));
    }
    Ok(())
}

pub fn check_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::DimensionMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_batch_reports_first_mismatch() {
        let batch = vec![
            Vector::with_id("a", vec![0.0; 4]),
            Vector::with_id("b", vec![0.0; 3]),
        ];
        let err = validate_batch(4, &batch).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let batch = vec![
            Vector::with_id("ok", vec![1.0, 0.0]),
            Vector::with_id("bad", vec![f32::NAN, 1.0]),
        ];
        let err = validate_batch(2, &batch).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("'bad'"));

        assert!(validate_batch(2, &[Vector::with_id("inf", vec![f32::INFINITY, 0.0])]).is_err());
        assert!(validate_query(2, &[0.5, f32::NEG_INFINITY]).is_err());
        assert!(matches!(
            validate_query(2, &[1.0]),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(validate_query(2, &[0.5, 0.5]).is_ok());
    }

    #[test]
    fn test_validate_spec() {
        assert!(validate_spec(&CollectionSpec::new("docs", 4)).is_ok());
        assert!(matches!(
            validate_spec(&CollectionSpec::new("docs", 0)),
            Err(Error::Configuration(_))
        ));
        assert!(validate_spec(&CollectionSpec::new("  ", 4)).is_err());
    }

    #[test]
    fn test_empty_filter_is_dropped() {
        let q = SearchQuery::new(vec![1.0], 3).filter(MetadataFilter::default());
        assert!(q.filter.is_none());
    }
}
