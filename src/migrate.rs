//! Idempotent schema setup.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `documents` | one row per ingested document: counts, language, status and error list |
//! | `chunks` | word-window chunks, unique per `(document_id, chunk_index)` |
//! | `collections` | vector collections with their dimension, metric and count |
//! | `vector_index` | vectors as little-endian `f32` BLOBs, in insertion order (`seq`), with insert time |
//!
//! Columns added after a table first shipped are also applied to existing
//! databases with `ALTER TABLE ... ADD COLUMN`.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create documents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            file_name TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            word_count INTEGER NOT NULL DEFAULT 0,
            char_count INTEGER NOT NULL DEFAULT 0,
            language TEXT NOT NULL DEFAULT 'unknown',
            statistics_json TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            errors_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create chunks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            char_count INTEGER NOT NULL,
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create collections table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            dimension INTEGER NOT NULL,
            metric TEXT NOT NULL DEFAULT 'cosine',
            vector_count INTEGER NOT NULL DEFAULT 0,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create vector index table; seq preserves insertion order across upserts
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_index (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            collection_id TEXT NOT NULL,
            vector_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            namespace TEXT,
            document_id TEXT,
            created_at INTEGER NOT NULL DEFAULT 0,
            UNIQUE(collection_id, vector_id),
            FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    add_column_if_missing(pool, "documents", "word_count", "INTEGER NOT NULL DEFAULT 0").await?;
    add_column_if_missing(pool, "documents", "char_count", "INTEGER NOT NULL DEFAULT 0").await?;
    add_column_if_missing(pool, "documents", "language", "TEXT NOT NULL DEFAULT 'unknown'")
        .await?;
    add_column_if_missing(pool, "vector_index", "created_at", "INTEGER NOT NULL DEFAULT 0").await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_index_document ON vector_index(document_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    let present: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await?;
    if present == 0 {
        sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition))
            .execute(pool)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn columns(pool: &SqlitePool, table: &str) -> Vec<String> {
        sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
            .bind(table)
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_persisted_columns() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("m.sqlite"))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        // Idempotent
        run_migrations(&pool).await.unwrap();

        let documents = columns(&pool, "documents").await;
        for col in ["word_count", "char_count", "language", "created_at", "updated_at"] {
            assert!(documents.iter().any(|c| c == col), "documents.{}", col);
        }
        let vectors = columns(&pool, "vector_index").await;
        assert!(vectors.iter().any(|c| c == "created_at"));
    }

    #[tokio::test]
    async fn test_upgrades_older_schema() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("old.sqlite"))
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE documents (id TEXT PRIMARY KEY, title TEXT NOT NULL, file_name TEXT NOT NULL, \
             doc_type TEXT NOT NULL, content TEXT NOT NULL DEFAULT '', metadata_json TEXT NOT NULL DEFAULT '{}', \
             statistics_json TEXT, status TEXT NOT NULL DEFAULT 'pending', errors_json TEXT NOT NULL DEFAULT '[]', \
             created_at INTEGER NOT NULL, updated_at INTEGER NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();

        run_migrations(&pool).await.unwrap();
        let documents = columns(&pool, "documents").await;
        assert!(documents.iter().any(|c| c == "language"));
        assert!(documents.iter().any(|c| c == "word_count"));
    }
}
