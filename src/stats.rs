//! Database statistics and health overview.
//!
//! Provides a quick summary of what's indexed: documents by status, chunk
//! counts, and per-collection vector counts with memory estimates. Used by
//! `docvec stats` to confirm that ingestion is working as expected.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use docvec_core::models::CollectionStats;

use crate::backends::Services;
use crate::config::Config;

/// Document counts per processing status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentCounts {
    pub pending: i64,
    pub success: i64,
    pub partial: i64,
    pub failed: i64,
}

impl DocumentCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.success + self.partial + self.failed
    }
}

pub async fn document_counts(pool: &SqlitePool) -> Result<DocumentCounts> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM documents GROUP BY status")
        .fetch_all(pool)
        .await?;

    let mut counts = DocumentCounts::default();
    for row in &rows {
        let status: String = row.get("status");
        let n: i64 = row.get("n");
        match status.as_str() {
            "pending" => counts.pending = n,
            "success" => counts.success = n,
            "partial" => counts.partial = n,
            "failed" => counts.failed = n,
            _ => {}
        }
    }
    Ok(counts)
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let services = Services::open(config).await?;

    let docs = document_counts(&services.pool).await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&services.pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docvec: database stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Backend:     {}", services.vectors.backend_name());
    println!();
    println!("  Documents:   {}", docs.total());
    println!(
        "    success {}  partial {}  failed {}  pending {}",
        docs.success, docs.partial, docs.failed, docs.pending
    );
    println!("  Chunks:      {}", total_chunks);

    let collections = services.vectors.list_collections().await?;
    if !collections.is_empty() {
        println!();
        println!("  Collections:");
        println!(
            "  {:<38} {:<16} {:>6} {:>10} {:>10}",
            "ID", "NAME", "DIMS", "VECTORS", "MEMORY"
        );
        println!("  {}", "-".repeat(84));

        for c in &collections {
            let stats: CollectionStats = services.vectors.stats(&c.id).await?;
            println!(
                "  {:<38} {:<16} {:>6} {:>10} {:>10}",
                c.id,
                c.name,
                stats.dimension,
                stats.count,
                format_bytes(stats.estimated_memory_bytes)
            );
        }
    }

    println!();
    services.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docvec_core::models::{Document, DocumentType, ProcessingStatus};
    use docvec_core::store::DocumentStore;

    use crate::sqlite_store::SqliteStore;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[tokio::test]
    async fn test_document_counts() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("s.sqlite"))
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let store = SqliteStore::new(pool.clone());

        let mut a = Document::pending("a", "a.txt", DocumentType::PlainText);
        a.status = ProcessingStatus::Success;
        let b = Document::pending("b", "b.txt", DocumentType::PlainText);
        store.save_document(&a, &[]).await.unwrap();
        store.save_document(&b, &[]).await.unwrap();

        let counts = document_counts(&pool).await.unwrap();
        assert_eq!(counts.success, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.total(), 2);
    }
}
