//! Vector store selection.
//!
//! The backend is chosen once, from `[vector_store] backend`, and handed
//! around as a trait object. Documents and chunks always live in SQLite.

use std::sync::Arc;

use anyhow::{bail, Result};
use docvec_core::store::memory::InMemoryVectorStore;
use docvec_core::store::VectorStore;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::embedding::EmbeddingGenerator;
use crate::qdrant_store::QdrantVectorStore;
use crate::sqlite_store::SqliteStore;

/// Everything a command needs, opened from one config.
pub struct Services {
    pub pool: SqlitePool,
    pub vectors: Arc<dyn VectorStore>,
    pub documents: Arc<SqliteStore>,
    pub generator: Arc<EmbeddingGenerator>,
}

impl Services {
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::open(config).await?;
        let vectors = open_vector_store(config, &pool)?;
        let generator = Arc::new(EmbeddingGenerator::from_config(&config.embedding)?);
        Ok(Self {
            documents: Arc::new(SqliteStore::new(pool.clone())),
            pool,
            vectors,
            generator,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

pub fn open_vector_store(config: &Config, pool: &SqlitePool) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.vector_store.backend.as_str() {
        "sqlite" => Arc::new(SqliteStore::new(pool.clone())),
        "memory" => Arc::new(InMemoryVectorStore::new()),
        "qdrant" => Arc::new(QdrantVectorStore::from_config(&config.vector_store)?),
        other => bail!("Unknown vector store backend: '{}'", other),
    };
    tracing::debug!(backend = store.backend_name(), "opened vector store");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[tokio::test]
    async fn test_selects_backend_from_config() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("t.sqlite"))
            .await
            .unwrap();

        let sqlite = parse_config("[db]\npath = \"x.sqlite\"\n").unwrap();
        assert_eq!(open_vector_store(&sqlite, &pool).unwrap().backend_name(), "sqlite");

        let memory =
            parse_config("[db]\npath = \"x.sqlite\"\n[vector_store]\nbackend = \"memory\"\n")
                .unwrap();
        assert_eq!(open_vector_store(&memory, &pool).unwrap().backend_name(), "memory");

        let qdrant = parse_config(
            "[db]\npath = \"x.sqlite\"\n[vector_store]\nbackend = \"qdrant\"\nurl = \"http://localhost:6333\"\n",
        )
        .unwrap();
        assert_eq!(open_vector_store(&qdrant, &pool).unwrap().backend_name(), "qdrant");
    }
}
