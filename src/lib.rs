//! # docvec
//!
//! A document-to-vector retrieval core: heterogeneous source documents go
//! in, normalized and chunked text is embedded, the vectors land in a
//! pluggable index, and nearest-neighbour queries come out.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────────┐   ┌──────────────┐
//! │ Files    │──▶│ Pipeline                     │──▶│ VectorStore  │
//! │ pdf/docx │   │ extract→analyze→chunk→embed  │   │ sqlite/mem/  │
//! │ csv/html │   └──────────────┬───────────────┘   │ qdrant       │
//! └──────────┘                  │                   └──────┬───────┘
//!        ▲                      ▼                          │
//!        │              ┌──────────────┐                   ▼
//!   ┌────┴────────┐     │ SQLite docs  │            ┌────────────┐
//!   │ Coordinator │     │ + chunks     │            │ query API  │
//!   │ (FIFO pool) │     └──────────────┘            └────────────┘
//!   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docvec init
//! docvec collection create docs
//! docvec ingest ./notes/*.md --collection <id>
//! docvec search "quarterly tax filing" --collection <id>
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`extract`] | Text extraction per document type |
//! | [`embedding`] | Embedding providers and the generator |
//! | [`sqlite_store`] | SQLite vector and document store |
//! | [`qdrant_store`] | Qdrant vector store |
//! | [`backends`] | Backend selection |
//! | [`ingest`] | Single-document ingestion pipeline |
//! | [`queue`] | Bounded ingestion coordinator |
//! | [`search`] | Query API |
//! | [`progress`] | Ingestion progress reporting |
//!
//! The pure building blocks (data model, chunker, analyzer, similarity,
//! store traits, in-memory backends) live in the `docvec-core` crate.

pub mod backends;
pub mod collections;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod get;
pub mod ingest;
pub mod ingest_cmd;
pub mod migrate;
pub mod progress;
pub mod qdrant_store;
pub mod queue;
pub mod search;
pub mod sqlite_store;
pub mod stats;

pub use docvec_core::{Error, Result};
