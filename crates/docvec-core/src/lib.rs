//! # docvec core
//!
//! Shared, runtime-agnostic logic for docvec: data models, chunking,
//! text analysis, similarity ranking, the embedding provider trait with its
//! deterministic fallback, and the vector/document store contracts with
//! in-memory backends.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network code.
//! The `docvec` crate supplies extraction, persistent and remote backends,
//! network embedding providers, and the ingestion coordinator.

pub mod analyze;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod search;
pub mod store;

pub use error::{Error, Result};
