//! Configuration parsing and validation.
//!
//! docvec is configured via a TOML file (default: `config/docvec.toml`).
//! Every section except `[db]` may be omitted and falls back to defaults.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/docvec.sqlite"
//!
//! [chunking]
//! chunk_size = 100
//! chunk_overlap = 20
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//!
//! [vector_store]
//! backend = "sqlite"
//!
//! [ingestion]
//! concurrency = 5
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docvec_core::embedding::ModelSpec;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
}

impl Config {
    /// Defaults for commands that can run without a config file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/docvec.sqlite"),
            },
            chunking: ChunkingConfig::default(),
            extraction: ExtractionConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            ingestion: IngestionConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Word-window chunking defaults, overridable per request.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    100
}
fn default_chunk_overlap() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Files larger than this are rejected before they are read.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Rows rendered per table (CSV or worksheet).
    #[serde(default = "default_max_table_rows")]
    pub max_table_rows: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_table_rows: default_max_table_rows(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_max_table_rows() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// One of `hash`, `openai`, `ollama`, `local`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Model input limit in estimated tokens; defaults from the known-model table.
    #[serde(default)]
    pub max_input_tokens: Option<usize>,
    #[serde(default)]
    pub allow_truncation: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the ollama provider, or an OpenAI-compatible endpoint.
    #[serde(default)]
    pub url: Option<String>,
    /// Seed of the deterministic fallback embedding.
    #[serde(default)]
    pub fallback_seed: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            max_input_tokens: None,
            allow_truncation: false,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
            fallback_seed: 0,
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

/// Fallback input limit for models missing from the known-model table.
const DEFAULT_MAX_INPUT_TOKENS: usize = 8192;

impl EmbeddingConfig {
    /// Resolve the model name, dimension and input limit, filling gaps from
    /// the known-model table.
    pub fn model_spec(&self) -> Result<ModelSpec> {
        let name = match (&self.model, self.provider.as_str()) {
            (Some(m), _) => m.clone(),
            (None, "hash") => "hash".to_string(),
            (None, other) => anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                other
            ),
        };
        let known = ModelSpec::known(&name);
        let dims = self
            .dims
            .or(known.as_ref().map(|k| k.dims))
            .with_context(|| format!("embedding.dims must be set for model '{}'", name))?;
        let max_input_tokens = self
            .max_input_tokens
            .or(known.as_ref().map(|k| k.max_input_tokens))
            .unwrap_or(DEFAULT_MAX_INPUT_TOKENS);
        Ok(ModelSpec {
            name,
            dims,
            max_input_tokens,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    /// One of `sqlite`, `memory`, `qdrant`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: None,
            api_key: None,
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_store_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Number of documents processed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.extraction.max_file_bytes == 0 {
        anyhow::bail!("extraction.max_file_bytes must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "hash" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs must be > 0");
    }
    let spec = config.embedding.model_spec()?;
    if spec.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    // Validate vector store
    match config.vector_store.backend.as_str() {
        "sqlite" | "memory" => {}
        "qdrant" => {
            if config.vector_store.url.is_none() {
                anyhow::bail!("vector_store.url must be set when backend is 'qdrant'");
            }
        }
        other => anyhow::bail!(
            "Unknown vector store backend: '{}'. Must be sqlite, memory, or qdrant.",
            other
        ),
    }

    if config.ingestion.concurrency == 0 {
        anyhow::bail!("ingestion.concurrency must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"./data/docvec.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 100);
        assert_eq!(config.chunking.chunk_overlap, 20);
        assert_eq!(config.extraction.max_file_bytes, 50 * 1024 * 1024);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.embedding.max_retries, 3);
        assert_eq!(config.vector_store.backend, "sqlite");
        assert_eq!(config.vector_store.timeout_secs, 10);
        assert_eq!(config.ingestion.concurrency, 5);

        let spec = config.embedding.model_spec().unwrap();
        assert_eq!(spec.name, "hash");
        assert_eq!(spec.dims, 384);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse_config(
            "[db]\npath = \"x.db\"\n[chunking]\nchunk_size = 10\nchunk_overlap = 10\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_unknown_provider_and_backend_rejected() {
        assert!(parse_config("[db]\npath = \"x.db\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[db]\npath = \"x.db\"\n[vector_store]\nbackend = \"faiss\"\n").is_err());
    }

    #[test]
    fn test_qdrant_requires_url() {
        assert!(parse_config("[db]\npath = \"x.db\"\n[vector_store]\nbackend = \"qdrant\"\n").is_err());
        let config = parse_config(
            "[db]\npath = \"x.db\"\n[vector_store]\nbackend = \"qdrant\"\nurl = \"http://localhost:6333\"\n",
        )
        .unwrap();
        assert_eq!(config.vector_store.url.as_deref(), Some("http://localhost:6333"));
    }

    #[test]
    fn test_model_spec_from_known_table() {
        let config = parse_config(
            "[db]\npath = \"x.db\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
        )
        .unwrap();
        let spec = config.embedding.model_spec().unwrap();
        assert_eq!(spec.dims, 1536);
        assert_eq!(spec.max_input_tokens, 8191);
    }

    #[test]
    fn test_unknown_model_needs_dims() {
        let err = parse_config(
            "[db]\npath = \"x.db\"\n[embedding]\nprovider = \"ollama\"\nmodel = \"custom-model\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
        assert!(parse_config(
            "[db]\npath = \"x.db\"\n[embedding]\nprovider = \"ollama\"\nmodel = \"custom-model\"\ndims = 64\n",
        )
        .is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(parse_config("[db]\npath = \"x.db\"\n[ingestion]\nconcurrency = 0\n").is_err());
    }
}
