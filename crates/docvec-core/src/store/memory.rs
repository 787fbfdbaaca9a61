//! In-memory [`VectorStore`] and [`DocumentStore`] implementations.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Each collection has its own lock, so writers to different collections
//! never contend. Vector search is brute-force over all stored vectors.
//! Nothing survives the process.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::models::{
    Collection, CollectionSpec, CollectionStats, Document, DocumentChunk, SearchResult, Vector,
};
use crate::search;

use super::{validate_batch, validate_query, validate_spec, DocumentStore, SearchQuery, VectorStore};

struct CollectionState {
    info: Collection,
    /// Vectors in insertion order.
    vectors: Vec<Vector>,
    /// Vector id to position in `vectors`.
    positions: HashMap<String, usize>,
}

impl CollectionState {
    fn upsert(&mut self, vector: Vector) {
        match self.positions.get(&vector.id) {
            Some(&pos) => self.vectors[pos] = vector,
            None => {
                self.positions.insert(vector.id.clone(), self.vectors.len());
                self.vectors.push(vector);
            }
        }
    }

    fn remove(&mut self, ids: &[String]) {
        let before = self.vectors.len();
        self.vectors.retain(|v| !ids.contains(&v.id));
        if self.vectors.len() != before {
            self.positions = self
                .vectors
                .iter()
                .enumerate()
                .map(|(i, v)| (v.id.clone(), i))
                .collect();
        }
    }

    fn touch(&mut self) {
        self.info.vector_count = self.vectors.len();
        self.info.updated_at = Utc::now();
    }
}

type Shared = Arc<RwLock<CollectionState>>;

fn poisoned<T>(_: T) -> Error {
    Error::Storage("in-memory store lock poisoned".to_string())
}

fn read(state: &Shared) -> Result<RwLockReadGuard<'_, CollectionState>> {
    state.read().map_err(poisoned)
}

fn write(state: &Shared) -> Result<RwLockWriteGuard<'_, CollectionState>> {
    state.write().map_err(poisoned)
}

/// In-memory vector store for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Shared>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, id: &str) -> Result<Shared> {
        let map = self.collections.read().map_err(poisoned)?;
        map.get(id)
            .cloned()
            .ok_or_else(|| Error::CollectionNotFound(id.to_string()))
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create_collection(&self, spec: CollectionSpec) -> Result<Collection> {
        validate_spec(&spec)?;
        let info = Collection::from_spec(spec);
        let state = CollectionState {
            info: info.clone(),
            vectors: Vec::new(),
            positions: HashMap::new(),
        };
        self.collections
            .write()
            .map_err(poisoned)?
            .insert(info.id.clone(), Arc::new(RwLock::new(state)));
        Ok(info)
    }

    async fn get_collection(&self, collection_id: &str) -> Result<Collection> {
        let state = self.collection(collection_id)?;
        let guard = read(&state)?;
        Ok(guard.info.clone())
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let states: Vec<Shared> = self
            .collections
            .read()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect();
        let mut out = Vec::with_capacity(states.len());
        for state in &states {
            out.push(read(state)?.info.clone());
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(out)
    }

    async fn delete_collection(&self, collection_id: &str) -> Result<()> {
        self.collections
            .write()
            .map_err(poisoned)?
            .remove(collection_id)
            .map(|_| ())
            .ok_or_else(|| Error::CollectionNotFound(collection_id.to_string()))
    }

    async fn insert(&self, collection_id: &str, vectors: Vec<Vector>) -> Result<()> {
        let state = self.collection(collection_id)?;
        let mut guard = write(&state)?;
        validate_batch(guard.info.dimension, &vectors)?;
        for v in vectors {
            guard.upsert(v);
        }
        guard.touch();
        Ok(())
    }

    async fn search(&self, collection_id: &str, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let state = self.collection(collection_id)?;
        let guard = read(&state)?;
        validate_query(guard.info.dimension, &query.vector)?;
        Ok(search::rank(
            guard.info.metric,
            &query.vector,
            &guard.vectors,
            query.top_k,
            query.filter.as_ref(),
            query.include_values,
        ))
    }

    async fn delete(&self, collection_id: &str, ids: &[String]) -> Result<()> {
        let state = self.collection(collection_id)?;
        let mut guard = write(&state)?;
        guard.remove(ids);
        guard.touch();
        Ok(())
    }

    async fn stats(&self, collection_id: &str) -> Result<CollectionStats> {
        let state = self.collection(collection_id)?;
        let guard = read(&state)?;
        Ok(CollectionStats::estimate(
            guard.vectors.len(),
            guard.info.dimension,
        ))
    }
}

/// In-memory document store. Saving a document replaces its chunks.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<String, (Document, Vec<DocumentChunk>)>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn save_document(&self, doc: &Document, chunks: &[DocumentChunk]) -> Result<()> {
        let mut sorted = chunks.to_vec();
        sorted.sort_by_key(|c| c.index);
        self.docs
            .write()
            .map_err(poisoned)?
            .insert(doc.id.clone(), (doc.clone(), sorted));
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.get(id).map(|(d, _)| d.clone()))
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs
            .get(document_id)
            .map(|(_, chunks)| chunks.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use crate::models::{DocumentType, SimilarityMetric};

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    async fn store_with(dim: usize) -> (InMemoryVectorStore, Collection) {
        let store = InMemoryVectorStore::new();
        let c = store
            .create_collection(CollectionSpec::new("test", dim))
            .await
            .unwrap();
        (store, c)
    }

    #[tokio::test]
    async fn test_insert_and_search_orders_by_score() {
        let (store, c) = store_with(4).await;
        store
            .insert(
                &c.id,
                vec![
                    Vector::with_id("x", unit(4, 0)),
                    Vector::with_id("y", unit(4, 1)),
                    Vector::with_id("z", vec![0.7, 0.7, 0.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let results = store
            .search(&c.id, &SearchQuery::new(unit(4, 0), 2))
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "z"]);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(store.get_collection(&c.id).await.unwrap().vector_count, 3);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_inserts_nothing() {
        let (store, c) = store_with(4).await;
        let err = store
            .insert(
                &c.id,
                vec![
                    Vector::with_id("ok", unit(4, 0)),
                    Vector::with_id("bad", vec![1.0, 0.0, 0.0]),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
        assert_eq!(store.stats(&c.id).await.unwrap().count, 0);

        let err = store
            .search(&c.id, &SearchQuery::new(vec![1.0], 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_top_k_larger_than_collection() {
        let (store, c) = store_with(2).await;
        store
            .insert(&c.id, vec![Vector::new(vec![1.0, 0.0]), Vector::new(vec![0.0, 1.0])])
            .await
            .unwrap();
        let results = store
            .search(&c.id, &SearchQuery::new(vec![1.0, 1.0], 50))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let store = InMemoryVectorStore::new();
        assert!(matches!(
            store.get_collection("nope").await,
            Err(Error::CollectionNotFound(_))
        ));
        assert!(matches!(
            store.insert("nope", vec![]).await,
            Err(Error::CollectionNotFound(_))
        ));
        assert!(matches!(
            store.stats("nope").await,
            Err(Error::CollectionNotFound(_))
        ));
        assert!(matches!(
            store.reindex("nope").await,
            Err(Error::CollectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reinsert_replaces_in_place() {
        let (store, c) = store_with(2).await;
        store
            .insert(
                &c.id,
                vec![Vector::with_id("a", vec![1.0, 0.0]), Vector::with_id("b", vec![1.0, 0.0])],
            )
            .await
            .unwrap();
        store
            .insert(&c.id, vec![Vector::with_id("a", vec![0.0, 1.0])])
            .await
            .unwrap();
        let mut q = SearchQuery::new(vec![1.0, 0.0], 10);
        q.include_values = true;
        let results = store.search(&c.id, &q).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "b");
        assert_eq!(results[1].values.as_deref(), Some(&[0.0f32, 1.0][..]));
    }

    #[tokio::test]
    async fn test_delete_vectors_and_unknown_ids() {
        let (store, c) = store_with(2).await;
        store
            .insert(
                &c.id,
                vec![
                    Vector::with_id("a", vec![1.0, 0.0]),
                    Vector::with_id("b", vec![0.0, 1.0]),
                    Vector::with_id("c", vec![1.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
            .delete(&c.id, &["b".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(store.get_collection(&c.id).await.unwrap().vector_count, 2);

        // positions are rebuilt, so replacing "c" still works in place
        store
            .insert(&c.id, vec![Vector::with_id("c", vec![0.0, 1.0])])
            .await
            .unwrap();
        let results = store
            .search(&c.id, &SearchQuery::new(vec![0.0, 1.0], 10))
            .await
            .unwrap();
        assert_eq!(results[0].id, "c");
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_euclidean_collection() {
        let store = InMemoryVectorStore::new();
        let c = store
            .create_collection(CollectionSpec::new("l2", 2).metric(SimilarityMetric::Euclidean))
            .await
            .unwrap();
        store
            .insert(
                &c.id,
                vec![Vector::with_id("far", vec![5.0, 5.0]), Vector::with_id("near", vec![1.0, 0.0])],
            )
            .await
            .unwrap();
        let results = store
            .search(&c.id, &SearchQuery::new(vec![0.0, 0.0], 1))
            .await
            .unwrap();
        assert_eq!(results[0].id, "near");
        assert_eq!(results[0].score, -1.0);
    }

    #[tokio::test]
    async fn test_collection_lifecycle() {
        let store = InMemoryVectorStore::new();
        let a = store.create_collection(CollectionSpec::new("a", 3)).await.unwrap();
        let b = store.create_collection(CollectionSpec::new("b", 3)).await.unwrap();
        assert_eq!(store.list_collections().await.unwrap().len(), 2);
        store.delete_collection(&a.id).await.unwrap();
        let remaining = store.list_collections().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b.id);
        assert!(store.delete_collection(&a.id).await.is_err());
        assert!(store.create_collection(CollectionSpec::new("z", 0)).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_inserts_keep_count() {
        let (store, c) = store_with(3).await;
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for t in 0..8 {
            let store = store.clone();
            let id = c.id.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    store
                        .insert(&id, vec![Vector::with_id(format!("{}-{}", t, i), vec![1.0, 0.0, 0.0])])
                        .await
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let info = store.get_collection(&c.id).await.unwrap();
        assert_eq!(info.vector_count, 200);
        assert_eq!(store.stats(&c.id).await.unwrap().count, 200);
    }

    #[tokio::test]
    async fn test_document_store_replaces_chunks() {
        let docs = InMemoryDocumentStore::new();
        let doc = Document::pending("d1", "notes.txt", DocumentType::PlainText);
        let first = chunk_text("d1", "a b c d e f g", 3, 1).unwrap();
        docs.save_document(&doc, &first).await.unwrap();
        assert_eq!(docs.get_chunks("d1").await.unwrap().len(), 3);

        let second = chunk_text("d1", "a b c", 3, 1).unwrap();
        docs.save_document(&doc, &second).await.unwrap();
        assert_eq!(docs.get_chunks("d1").await.unwrap().len(), 1);
        assert_eq!(docs.get_document("d1").await.unwrap().unwrap().file_name, "notes.txt");
        assert!(docs.get_document("d2").await.unwrap().is_none());
        assert!(docs.get_chunks("d2").await.unwrap().is_empty());
    }
}
