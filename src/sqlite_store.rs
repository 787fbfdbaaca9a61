//! SQLite-backed [`VectorStore`] and [`DocumentStore`] implementation.
//!
//! Vectors live in `vector_index` as little-endian `f32` BLOBs; search is
//! exact, loading a collection's rows in insertion order (`seq`) and ranking
//! them with the collection's metric.
//!
//! Every mutation is one transaction whose first statement touches the
//! collection row. That write takes SQLite's write lock, so mutations of a
//! collection are serialized, and `vector_count` is then recomputed from the
//! rows actually stored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use docvec_core::embedding::{blob_to_vec, vec_to_blob};
use docvec_core::models::{
    ChunkMetadata, Collection, CollectionSpec, CollectionStats, Document, DocumentChunk,
    DocumentMetadata, DocumentStatistics, Metadata, SearchResult, SimilarityMetric, Vector,
};
use docvec_core::search;
use docvec_core::store::{
    validate_batch, validate_query, validate_spec, DocumentStore, SearchQuery, VectorStore,
};
use docvec_core::{Error, Result};

/// SQLite implementation of the store traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a collection mutation: take the write lock by touching the
    /// collection row and return its dimension.
    async fn begin_mutation(
        &self,
        collection_id: &str,
    ) -> Result<(Transaction<'static, Sqlite>, usize)> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let touched = sqlx::query("UPDATE collections SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().timestamp_millis())
            .bind(collection_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        if touched.rows_affected() == 0 {
            return Err(Error::CollectionNotFound(collection_id.to_string()));
        }

        let dimension: i64 = sqlx::query_scalar("SELECT dimension FROM collections WHERE id = ?")
            .bind(collection_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;

        Ok((tx, dimension as usize))
    }
}

fn storage(e: sqlx::Error) -> Error {
    Error::Storage(e.to_string())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

async fn recount(tx: &mut Transaction<'static, Sqlite>, collection_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE collections
        SET vector_count = (SELECT COUNT(*) FROM vector_index WHERE collection_id = ?)
        WHERE id = ?
        "#,
    )
    .bind(collection_id)
    .bind(collection_id)
    .execute(&mut **tx)
    .await
    .map_err(storage)?;
    Ok(())
}

fn row_to_collection(row: &SqliteRow) -> Result<Collection> {
    let metric: String = row.get("metric");
    let metadata_json: String = row.get("metadata_json");
    Ok(Collection {
        id: row.get("id"),
        name: row.get("name"),
        dimension: row.get::<i64, _>("dimension") as usize,
        metric: metric.parse::<SimilarityMetric>()?,
        vector_count: row.get::<i64, _>("vector_count") as usize,
        metadata: serde_json::from_str(&metadata_json)?,
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    })
}

fn row_to_vector(row: &SqliteRow) -> Result<Vector> {
    let blob: Vec<u8> = row.get("embedding");
    let metadata_json: String = row.get("metadata_json");
    Ok(Vector {
        id: row.get("vector_id"),
        values: blob_to_vec(&blob),
        metadata: serde_json::from_str::<Metadata>(&metadata_json)?,
        namespace: row.get("namespace"),
        document_id: row.get("document_id"),
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn create_collection(&self, spec: CollectionSpec) -> Result<Collection> {
        validate_spec(&spec)?;
        let collection = Collection::from_spec(spec);

        sqlx::query(
            r#"
            INSERT INTO collections (id, name, dimension, metric, vector_count,
                                     metadata_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&collection.id)
        .bind(&collection.name)
        .bind(collection.dimension as i64)
        .bind(collection.metric.as_str())
        .bind(serde_json::to_string(&collection.metadata)?)
        .bind(collection.created_at.timestamp_millis())
        .bind(collection.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        tracing::info!(collection = %collection.id, name = %collection.name, dimension = collection.dimension, "created collection");
        Ok(collection)
    }

    async fn get_collection(&self, collection_id: &str) -> Result<Collection> {
        let row = sqlx::query("SELECT * FROM collections WHERE id = ?")
            .bind(collection_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| Error::CollectionNotFound(collection_id.to_string()))?;
        row_to_collection(&row)
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let rows = sqlx::query("SELECT * FROM collections ORDER BY created_at, rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(row_to_collection).collect()
    }

    async fn delete_collection(&self, collection_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query("DELETE FROM vector_index WHERE collection_id = ?")
            .bind(collection_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        let deleted = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(collection_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        if deleted.rows_affected() == 0 {
            return Err(Error::CollectionNotFound(collection_id.to_string()));
        }

        tx.commit().await.map_err(storage)?;
        tracing::info!(collection = %collection_id, "deleted collection");
        Ok(())
    }

    async fn insert(&self, collection_id: &str, vectors: Vec<Vector>) -> Result<()> {
        let (mut tx, dimension) = self.begin_mutation(collection_id).await?;
        validate_batch(dimension, &vectors)?;
        let now = Utc::now().timestamp_millis();

        for v in &vectors {
            sqlx::query(
                r#"
                INSERT INTO vector_index (collection_id, vector_id, embedding,
                                          metadata_json, namespace, document_id, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection_id, vector_id) DO UPDATE SET
                    embedding = excluded.embedding,
                    metadata_json = excluded.metadata_json,
                    namespace = excluded.namespace,
                    document_id = excluded.document_id
                "#,
            )
            .bind(collection_id)
            .bind(&v.id)
            .bind(vec_to_blob(&v.values))
            .bind(serde_json::to_string(&v.metadata)?)
            .bind(&v.namespace)
            .bind(&v.document_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        recount(&mut tx, collection_id).await?;
        tx.commit().await.map_err(storage)?;

        tracing::debug!(collection = %collection_id, inserted = vectors.len(), "inserted vectors");
        Ok(())
    }

    async fn search(&self, collection_id: &str, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let collection = self.get_collection(collection_id).await?;
        validate_query(collection.dimension, &query.vector)?;

        let namespace = query.filter.as_ref().and_then(|f| f.namespace.clone());
        let rows = match &namespace {
            Some(ns) => sqlx::query(
                "SELECT * FROM vector_index WHERE collection_id = ? AND namespace = ? ORDER BY seq",
            )
            .bind(collection_id)
            .bind(ns)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?,
            None => sqlx::query("SELECT * FROM vector_index WHERE collection_id = ? ORDER BY seq")
                .bind(collection_id)
                .fetch_all(&self.pool)
                .await
                .map_err(storage)?,
        };

        let vectors = rows.iter().map(row_to_vector).collect::<Result<Vec<_>>>()?;
        Ok(search::rank(
            collection.metric,
            &query.vector,
            &vectors,
            query.top_k,
            query.filter.as_ref(),
            query.include_values,
        ))
    }

    async fn delete(&self, collection_id: &str, ids: &[String]) -> Result<()> {
        let (mut tx, _) = self.begin_mutation(collection_id).await?;

        for id in ids {
            sqlx::query("DELETE FROM vector_index WHERE collection_id = ? AND vector_id = ?")
                .bind(collection_id)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }

        recount(&mut tx, collection_id).await?;
        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn stats(&self, collection_id: &str) -> Result<CollectionStats> {
        let collection = self.get_collection(collection_id).await?;
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vector_index WHERE collection_id = ?")
                .bind(collection_id)
                .fetch_one(&self.pool)
                .await
                .map_err(storage)?;
        Ok(CollectionStats::estimate(
            count as usize,
            collection.dimension,
        ))
    }

    /// Recompute the stored count from the rows.
    async fn reindex(&self, collection_id: &str) -> Result<()> {
        let (mut tx, _) = self.begin_mutation(collection_id).await?;
        recount(&mut tx, collection_id).await?;
        tx.commit().await.map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn save_document(&self, doc: &Document, chunks: &[DocumentChunk]) -> Result<()> {
        let statistics_json = doc
            .statistics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = Utc::now().timestamp_millis();

        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, title, file_name, doc_type, content, metadata_json,
                                   word_count, char_count, language, statistics_json,
                                   status, errors_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                file_name = excluded.file_name,
                doc_type = excluded.doc_type,
                content = excluded.content,
                metadata_json = excluded.metadata_json,
                word_count = excluded.word_count,
                char_count = excluded.char_count,
                language = excluded.language,
                statistics_json = excluded.statistics_json,
                status = excluded.status,
                errors_json = excluded.errors_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(&doc.file_name)
        .bind(doc.doc_type.as_str())
        .bind(&doc.content)
        .bind(serde_json::to_string(&doc.metadata)?)
        .bind(doc.metadata.word_count as i64)
        .bind(doc.metadata.character_count as i64)
        .bind(&doc.metadata.language)
        .bind(statistics_json)
        .bind(doc.status.as_str())
        .bind(serde_json::to_string(&doc.errors)?)
        .bind(doc.created_at.timestamp_millis())
        .bind(doc.updated_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, content, token_count, char_count,
                                    start_offset, end_offset, metadata_json, hash, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.index as i64)
            .bind(&chunk.content)
            .bind(chunk.token_count as i64)
            .bind(chunk.char_count as i64)
            .bind(chunk.start_offset as i64)
            .bind(chunk.end_offset as i64)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .bind(&chunk.hash)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let doc_type: String = row.get("doc_type");
        let status: String = row.get("status");
        let metadata_json: String = row.get("metadata_json");
        let statistics_json: Option<String> = row.get("statistics_json");
        let errors_json: String = row.get("errors_json");

        // The columns are authoritative over the copies inside metadata_json
        let mut metadata = serde_json::from_str::<DocumentMetadata>(&metadata_json)?;
        metadata.word_count = row.get::<i64, _>("word_count") as usize;
        metadata.character_count = row.get::<i64, _>("char_count") as usize;
        metadata.language = row.get("language");

        Ok(Some(Document {
            id: row.get("id"),
            title: row.get("title"),
            file_name: row.get("file_name"),
            doc_type: doc_type
                .parse()
                .map_err(|e: Error| Error::Storage(e.to_string()))?,
            content: row.get("content"),
            metadata,
            statistics: statistics_json
                .map(|s| serde_json::from_str::<DocumentStatistics>(&s))
                .transpose()?,
            status: status.parse()?,
            errors: serde_json::from_str(&errors_json)?,
            created_at: from_millis(row.get("created_at")),
            updated_at: from_millis(row.get("updated_at")),
        }))
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY chunk_index")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        rows.iter()
            .map(|row| {
                let metadata_json: String = row.get("metadata_json");
                Ok(DocumentChunk {
                    id: row.get("id"),
                    document_id: row.get("document_id"),
                    index: row.get::<i64, _>("chunk_index") as usize,
                    content: row.get("content"),
                    token_count: row.get::<i64, _>("token_count") as usize,
                    char_count: row.get::<i64, _>("char_count") as usize,
                    start_offset: row.get::<i64, _>("start_offset") as usize,
                    end_offset: row.get::<i64, _>("end_offset") as usize,
                    metadata: serde_json::from_str::<ChunkMetadata>(&metadata_json)?,
                    hash: row.get("hash"),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docvec_core::analyze::analyze;
    use docvec_core::chunk::chunk_text;
    use docvec_core::models::{DocumentType, ProcessingStatus};
    use tempfile::TempDir;

    async fn open(tmp: &TempDir) -> SqliteStore {
        let pool = crate::db::connect_path(&tmp.path().join("store.sqlite"))
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    #[tokio::test]
    async fn test_document_roundtrip_and_chunk_replacement() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;

        let text = "one two three four five six seven eight nine ten";
        let mut doc = Document::pending("d1", "notes.txt", DocumentType::PlainText);
        assert!(store.get_document("d1").await.unwrap().is_none());
        store.save_document(&doc, &[]).await.unwrap();

        let analysis = analyze(text);
        doc.content = text.to_string();
        doc.metadata.word_count = analysis.word_count;
        doc.statistics = Some(analysis.statistics);
        doc.status = ProcessingStatus::Partial;
        doc.errors.push("chunk 2: input too long".to_string());
        let chunks = chunk_text("d1", text, 4, 1).unwrap();
        store.save_document(&doc, &chunks).await.unwrap();

        let loaded = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(loaded.status, ProcessingStatus::Partial);
        assert_eq!(loaded.doc_type, DocumentType::PlainText);
        assert_eq!(loaded.content, text);
        assert_eq!(loaded.metadata.word_count, 10);
        assert_eq!(loaded.statistics.unwrap().word_count, 10);
        assert_eq!(loaded.errors, vec!["chunk 2: input too long".to_string()]);
        assert_eq!(
            loaded.created_at.timestamp_millis(),
            doc.created_at.timestamp_millis()
        );

        let stored = store.get_chunks("d1").await.unwrap();
        assert_eq!(stored, chunks);

        // Saving again replaces the chunk set
        let fewer = chunk_text("d1", text, 10, 0).unwrap();
        store.save_document(&doc, &fewer).await.unwrap();
        assert_eq!(store.get_chunks("d1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_count_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let id = {
            let store = open(&tmp).await;
            let c = store
                .create_collection(CollectionSpec::new("persisted", 2))
                .await
                .unwrap();
            store
                .insert(
                    &c.id,
                    vec![
                        Vector::with_id("a", vec![1.0, 0.0]).document("d1"),
                        Vector::with_id("b", vec![0.0, 1.0]),
                    ],
                )
                .await
                .unwrap();
            store.pool().close().await;
            c.id
        };

        let store = open(&tmp).await;
        let c = store.get_collection(&id).await.unwrap();
        assert_eq!(c.vector_count, 2);
        assert_eq!(c.name, "persisted");
        let hits = store
            .search(&id, &SearchQuery::new(vec![1.0, 0.0], 1))
            .await
            .unwrap();
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn test_counts_language_and_vector_timestamps_are_columns() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;

        let mut doc = Document::pending("d2", "memo.txt", DocumentType::PlainText);
        doc.content = "the quick brown fox".to_string();
        doc.metadata.word_count = 4;
        doc.metadata.character_count = 19;
        doc.metadata.language = "en".to_string();
        store.save_document(&doc, &[]).await.unwrap();

        let row = sqlx::query("SELECT word_count, char_count, language FROM documents WHERE id = ?")
            .bind("d2")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("word_count"), 4);
        assert_eq!(row.get::<i64, _>("char_count"), 19);
        assert_eq!(row.get::<String, _>("language"), "en");

        let loaded = store.get_document("d2").await.unwrap().unwrap();
        assert_eq!(loaded.metadata.word_count, 4);
        assert_eq!(loaded.metadata.character_count, 19);
        assert_eq!(loaded.metadata.language, "en");

        let c = store
            .create_collection(CollectionSpec::new("stamped", 2))
            .await
            .unwrap();
        store
            .insert(&c.id, vec![Vector::with_id("a", vec![1.0, 0.0])])
            .await
            .unwrap();
        let inserted_at: i64 =
            sqlx::query_scalar("SELECT created_at FROM vector_index WHERE vector_id = ?")
                .bind("a")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert!(inserted_at > 0);

        // An upsert keeps the original insert time
        store
            .insert(&c.id, vec![Vector::with_id("a", vec![0.0, 1.0])])
            .await
            .unwrap();
        let after: i64 =
            sqlx::query_scalar("SELECT created_at FROM vector_index WHERE vector_id = ?")
                .bind("a")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(after, inserted_at);
    }
}
