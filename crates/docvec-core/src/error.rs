//! Error taxonomy shared by every docvec component.
//!
//! Extraction and embedding failures are recovered per document by the
//! ingestion pipeline; vector store structural errors
//! ([`Error::DimensionMismatch`], [`Error::CollectionNotFound`]) are always
//! returned to the caller.

use thiserror::Error;

/// Main error type for docvec operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The declared document type is not one of the supported kinds.
    #[error("unsupported document type: {0}")]
    UnsupportedType(String),

    /// The source could not be parsed, decoded, or exceeded a size limit.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Invalid parameters (chunk size, overlap, dimension, ...).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Embedding input exceeds the model's maximum length.
    #[error("input too long: {tokens} tokens, max {max}")]
    InputTooLong { tokens: usize, max: usize },

    /// The embedding provider failed (network, auth, quota, timeout).
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A vector's length differs from its collection's dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// No collection with the given id exists.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// The operation was cancelled before completion.
    #[error("operation cancelled")]
    Cancelled,

    /// Backend I/O failure (database, remote index service).
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for docvec operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors that indicate a vector store contract violation.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::DimensionMismatch { .. } | Error::CollectionNotFound(_)
        )
    }
}
