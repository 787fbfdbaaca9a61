//! [`VectorStore`] backed by an external Qdrant service, over its REST API.
//!
//! Collections map one-to-one to Qdrant collections named by the collection
//! id. Vector ids become Qdrant point ids: UUID ids are used as-is, anything
//! else is mapped through a name-based UUID (v5). The original id, namespace
//! and document reference travel in the point payload under reserved keys.
//!
//! Dimension checks run locally before any request is sent. Qdrant reports
//! Euclid and Manhattan as distances; they are negated so that higher is
//! better for every metric.
//!
//! Collection names and metadata are kept in a process-local registry.
//! A collection created by another process is rehydrated from Qdrant on
//! first use, with its id standing in for its name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use docvec_core::models::{
    Collection, CollectionSpec, CollectionStats, Metadata, SearchResult, SimilarityMetric, Vector,
};
use docvec_core::search::{sort_results, MetadataFilter};
use docvec_core::store::{
    validate_batch, validate_query, validate_spec, SearchQuery, VectorStore,
};
use docvec_core::{Error, Result};

use crate::config::VectorStoreConfig;

const KEY_VECTOR_ID: &str = "_vector_id";
const KEY_NAMESPACE: &str = "_namespace";
const KEY_DOCUMENT_ID: &str = "_document_id";

type Handle = Arc<Mutex<Collection>>;

pub struct QdrantVectorStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    /// Collection id to descriptor; the mutex serializes writers per collection.
    collections: RwLock<HashMap<String, Handle>>,
}

impl QdrantVectorStore {
    pub fn new(url: &str, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            api_key,
            collections: RwLock::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &VectorStoreConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("vector_store.url must be set when backend is 'qdrant'"))?;
        Self::new(
            url,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }
        request
    }

    /// Send a request scoped to `collection_id` and return the JSON reply.
    /// A 404 means the collection does not exist.
    async fn send(&self, collection_id: &str, request: RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Storage(format!("qdrant request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::CollectionNotFound(collection_id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!("qdrant error {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Storage(format!("qdrant response decode failed: {}", e)))
    }

    async fn handle(&self, collection_id: &str) -> Result<Handle> {
        if let Some(handle) = self.collections.read().await.get(collection_id) {
            return Ok(handle.clone());
        }

        let collection = self.fetch_collection(collection_id).await?;
        let mut collections = self.collections.write().await;
        Ok(collections
            .entry(collection_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(collection)))
            .clone())
    }

    /// Registry entry without a round trip for the count.
    async fn cached(&self, collection_id: &str) -> Result<Collection> {
        let handle = self.handle(collection_id).await?;
        let collection = handle.lock().await.clone();
        Ok(collection)
    }

    async fn fetch_collection(&self, collection_id: &str) -> Result<Collection> {
        let path = format!("/collections/{}", collection_id);
        let json = self
            .send(collection_id, self.request(Method::GET, &path))
            .await?;

        let params = &json["result"]["config"]["params"]["vectors"];
        let dimension = params["size"]
            .as_u64()
            .ok_or_else(|| Error::Storage("qdrant collection has no vector size".to_string()))?;
        let metric = metric_from_distance(params["distance"].as_str().unwrap_or("Cosine"))?;

        let now = Utc::now();
        Ok(Collection {
            id: collection_id.to_string(),
            name: collection_id.to_string(),
            dimension: dimension as usize,
            metric,
            vector_count: json["result"]["points_count"].as_u64().unwrap_or(0) as usize,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn count(&self, collection_id: &str) -> Result<usize> {
        let path = format!("/collections/{}/points/count", collection_id);
        let json = self
            .send(
                collection_id,
                self.request(Method::POST, &path)
                    .json(&json!({ "exact": true })),
            )
            .await?;
        Ok(json["result"]["count"].as_u64().unwrap_or(0) as usize)
    }
}

fn distance_name(metric: SimilarityMetric) -> &'static str {
    match metric {
        SimilarityMetric::Cosine => "Cosine",
        SimilarityMetric::Euclidean => "Euclid",
        SimilarityMetric::DotProduct => "Dot",
        SimilarityMetric::Manhattan => "Manhattan",
    }
}

fn metric_from_distance(distance: &str) -> Result<SimilarityMetric> {
    match distance {
        "Cosine" => Ok(SimilarityMetric::Cosine),
        "Euclid" => Ok(SimilarityMetric::Euclidean),
        "Dot" => Ok(SimilarityMetric::DotProduct),
        "Manhattan" => Ok(SimilarityMetric::Manhattan),
        other => Err(Error::Storage(format!("unknown qdrant distance: {}", other))),
    }
}

/// Qdrant point ids must be UUIDs or integers.
pub(crate) fn point_id(vector_id: &str) -> String {
    match Uuid::parse_str(vector_id) {
        Ok(uuid) => uuid.to_string(),
        Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_OID, vector_id.as_bytes()).to_string(),
    }
}

fn point(vector: &Vector) -> Value {
    let mut payload = vector.metadata.clone();
    payload.insert(KEY_VECTOR_ID.to_string(), json!(vector.id));
    if let Some(ns) = &vector.namespace {
        payload.insert(KEY_NAMESPACE.to_string(), json!(ns));
    }
    if let Some(doc) = &vector.document_id {
        payload.insert(KEY_DOCUMENT_ID.to_string(), json!(doc));
    }
    json!({
        "id": point_id(&vector.id),
        "vector": vector.values,
        "payload": payload,
    })
}

/// Translate a metadata filter into a Qdrant `must` filter. Qdrant matches
/// keywords, integers and booleans exactly; other values are rejected.
pub(crate) fn build_filter(filter: &MetadataFilter) -> Result<Option<Value>> {
    let mut must = Vec::new();
    if let Some(ns) = &filter.namespace {
        must.push(json!({ "key": KEY_NAMESPACE, "match": { "value": ns } }));
    }
    for (key, value) in &filter.equals {
        let matchable = match value {
            Value::String(_) | Value::Bool(_) => true,
            Value::Number(n) => n.is_i64() || n.is_u64(),
            _ => false,
        };
        if !matchable {
            return Err(Error::Configuration(format!(
                "filter on '{}' must be a string, integer, or boolean for the qdrant backend",
                key
            )));
        }
        must.push(json!({ "key": key, "match": { "value": value } }));
    }
    Ok((!must.is_empty()).then(|| json!({ "must": must })))
}

fn parse_hit(hit: &Value, metric: SimilarityMetric, include_values: bool) -> SearchResult {
    let raw = hit["score"].as_f64().unwrap_or(0.0) as f32;
    let score = match metric {
        SimilarityMetric::Euclidean | SimilarityMetric::Manhattan => -raw,
        SimilarityMetric::Cosine | SimilarityMetric::DotProduct => raw,
    };

    let mut payload = hit["payload"].as_object().cloned().unwrap_or_default();
    let id = match payload.remove(KEY_VECTOR_ID) {
        Some(Value::String(id)) => id,
        _ => match &hit["id"] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    };
    let namespace = match payload.remove(KEY_NAMESPACE) {
        Some(Value::String(ns)) => Some(ns),
        _ => None,
    };
    payload.remove(KEY_DOCUMENT_ID);

    let values = if include_values {
        hit["vector"].as_array().map(|values| {
            values
                .iter()
                .map(|x| x.as_f64().unwrap_or(0.0) as f32)
                .collect()
        })
    } else {
        None
    };

    SearchResult {
        id,
        score,
        values,
        metadata: payload,
        namespace,
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn backend_name(&self) -> &'static str {
        "qdrant"
    }

    async fn create_collection(&self, spec: CollectionSpec) -> Result<Collection> {
        validate_spec(&spec)?;
        let collection = Collection::from_spec(spec);

        let path = format!("/collections/{}", collection.id);
        let body = json!({
            "vectors": {
                "size": collection.dimension,
                "distance": distance_name(collection.metric),
            }
        });
        self.send(&collection.id, self.request(Method::PUT, &path).json(&body))
            .await?;

        self.collections.write().await.insert(
            collection.id.clone(),
            Arc::new(Mutex::new(collection.clone())),
        );
        tracing::info!(collection = %collection.id, dimension = collection.dimension, "created qdrant collection");
        Ok(collection)
    }

    /// The registry entry refreshed with the live point count, since other
    /// processes may write to the same Qdrant collection.
    async fn get_collection(&self, collection_id: &str) -> Result<Collection> {
        let handle = self.handle(collection_id).await?;
        let mut collection = handle.lock().await;
        collection.vector_count = self.count(collection_id).await?;
        Ok(collection.clone())
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let json = self
            .send("", self.request(Method::GET, "/collections"))
            .await?;
        let names: Vec<String> = json["result"]["collections"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|c| c["name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let mut collections = Vec::with_capacity(names.len());
        for name in names {
            collections.push(self.get_collection(&name).await?);
        }
        collections.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(collections)
    }

    async fn delete_collection(&self, collection_id: &str) -> Result<()> {
        let handle = self.handle(collection_id).await?;
        let _guard = handle.lock().await;

        let path = format!("/collections/{}", collection_id);
        self.send(collection_id, self.request(Method::DELETE, &path))
            .await?;
        self.collections.write().await.remove(collection_id);

        tracing::info!(collection = %collection_id, "deleted qdrant collection");
        Ok(())
    }

    async fn insert(&self, collection_id: &str, vectors: Vec<Vector>) -> Result<()> {
        let handle = self.handle(collection_id).await?;
        let mut collection = handle.lock().await;
        validate_batch(collection.dimension, &vectors)?;
        if vectors.is_empty() {
            return Ok(());
        }

        let points: Vec<Value> = vectors.iter().map(point).collect();
        let path = format!("/collections/{}/points?wait=true", collection_id);
        self.send(
            collection_id,
            self.request(Method::PUT, &path)
                .json(&json!({ "points": points })),
        )
        .await?;

        collection.vector_count = self.count(collection_id).await?;
        collection.updated_at = Utc::now();
        tracing::debug!(collection = %collection_id, inserted = vectors.len(), "upserted qdrant points");
        Ok(())
    }

    async fn search(&self, collection_id: &str, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let collection = self.cached(collection_id).await?;
        validate_query(collection.dimension, &query.vector)?;
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let mut body = json!({
            "vector": query.vector,
            "limit": query.top_k,
            "with_payload": true,
            "with_vector": query.include_values,
        });
        if let Some(filter) = query.filter.as_ref().map(build_filter).transpose()?.flatten() {
            body["filter"] = filter;
        }

        let path = format!("/collections/{}/points/search", collection_id);
        let json = self
            .send(collection_id, self.request(Method::POST, &path).json(&body))
            .await?;

        let mut results: Vec<SearchResult> = json["result"]
            .as_array()
            .map(|hits| {
                hits.iter()
                    .map(|hit| parse_hit(hit, collection.metric, query.include_values))
                    .collect()
            })
            .unwrap_or_default();
        sort_results(&mut results);
        results.truncate(query.top_k);
        Ok(results)
    }

    async fn delete(&self, collection_id: &str, ids: &[String]) -> Result<()> {
        let handle = self.handle(collection_id).await?;
        let mut collection = handle.lock().await;
        if ids.is_empty() {
            return Ok(());
        }

        let points: Vec<String> = ids.iter().map(|id| point_id(id)).collect();
        let path = format!("/collections/{}/points/delete?wait=true", collection_id);
        self.send(
            collection_id,
            self.request(Method::POST, &path)
                .json(&json!({ "points": points })),
        )
        .await?;

        collection.vector_count = self.count(collection_id).await?;
        collection.updated_at = Utc::now();
        Ok(())
    }

    async fn stats(&self, collection_id: &str) -> Result<CollectionStats> {
        let collection = self.cached(collection_id).await?;
        let count = self.count(collection_id).await?;
        Ok(CollectionStats::estimate(count, collection.dimension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn store(server: &mockito::Server) -> QdrantVectorStore {
        QdrantVectorStore::new(&server.url(), None, Duration::from_secs(5)).unwrap()
    }

    async fn mock_create(server: &mut mockito::Server) -> mockito::Mock {
        server
            .mock("PUT", Matcher::Regex(r"^/collections/[0-9a-f-]+$".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result": true, "status": "ok", "time": 0.001}"#)
            .create_async()
            .await
    }

    #[test]
    fn test_point_id_keeps_uuids_and_hashes_others() {
        let uuid = "67e55044-10b1-426f-9247-bb680e5fe0c8";
        assert_eq!(point_id(uuid), uuid);
        let mapped = point_id("doc-1:0");
        assert!(Uuid::parse_str(&mapped).is_ok());
        assert_eq!(mapped, point_id("doc-1:0"));
        assert_ne!(mapped, point_id("doc-1:1"));
    }

    #[test]
    fn test_build_filter() {
        let mut filter = MetadataFilter {
            namespace: Some("legal".to_string()),
            ..Default::default()
        };
        filter.equals.insert("chunk_index".to_string(), json!(2));
        let built = build_filter(&filter).unwrap().unwrap();
        assert_eq!(built["must"].as_array().unwrap().len(), 2);
        assert_eq!(built["must"][0]["key"], KEY_NAMESPACE);

        filter.equals.insert("ratio".to_string(), json!(0.5));
        assert!(matches!(build_filter(&filter), Err(Error::Configuration(_))));

        assert!(build_filter(&MetadataFilter::default()).unwrap().is_none());
    }

    #[test]
    fn test_parse_hit_negates_distances_and_strips_reserved_keys() {
        let hit = json!({
            "id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "score": 1.5,
            "payload": {"_vector_id": "c-1", "_namespace": "ns", "_document_id": "d", "topic": "tax"}
        });
        let result = parse_hit(&hit, SimilarityMetric::Euclidean, false);
        assert_eq!(result.id, "c-1");
        assert_eq!(result.score, -1.5);
        assert_eq!(result.namespace.as_deref(), Some("ns"));
        assert_eq!(result.metadata.len(), 1);
        assert_eq!(result.metadata["topic"], "tax");

        let cosine = parse_hit(&hit, SimilarityMetric::Cosine, false);
        assert_eq!(cosine.score, 1.5);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_sends_no_points() {
        let mut server = mockito::Server::new_async().await;
        let _create = mock_create(&mut server).await;
        let upsert = server
            .mock("PUT", Matcher::Regex(r"^/collections/[^/]+/points".to_string()))
            .expect(0)
            .create_async()
            .await;

        let store = store(&server);
        let c = store
            .create_collection(CollectionSpec::new("docs", 4))
            .await
            .unwrap();
        let err = store
            .insert(&c.id, vec![Vector::with_id("a", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
        upsert.assert_async().await;
    }

    async fn mock_count(server: &mut mockito::Server, count: usize) -> mockito::Mock {
        server
            .mock("POST", Matcher::Regex(r"^/collections/[^/]+/points/count".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"result": {{"count": {}}}, "status": "ok"}}"#, count))
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_collection_count_is_read_live() {
        let mut server = mockito::Server::new_async().await;
        let _create = mock_create(&mut server).await;
        // Points written by another process
        let _count = mock_count(&mut server, 7).await;

        let store = store(&server);
        let c = store
            .create_collection(CollectionSpec::new("shared", 4))
            .await
            .unwrap();
        assert_eq!(c.vector_count, 0);
        assert_eq!(store.get_collection(&c.id).await.unwrap().vector_count, 7);
        assert_eq!(store.stats(&c.id).await.unwrap().count, 7);
    }

    #[tokio::test]
    async fn test_non_finite_query_sends_no_search() {
        let mut server = mockito::Server::new_async().await;
        let _create = mock_create(&mut server).await;
        let search = server
            .mock("POST", Matcher::Regex(r"^/collections/[^/]+/points/search".to_string()))
            .expect(0)
            .create_async()
            .await;
        let upsert = server
            .mock("PUT", Matcher::Regex(r"^/collections/[^/]+/points".to_string()))
            .expect(0)
            .create_async()
            .await;

        let store = store(&server);
        let c = store
            .create_collection(CollectionSpec::new("docs", 2))
            .await
            .unwrap();
        let err = store
            .search(&c.id, &SearchQuery::new(vec![f32::NAN, 0.0], 5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        let err = store
            .insert(&c.id, vec![Vector::with_id("a", vec![f32::INFINITY, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        search.assert_async().await;
        upsert.assert_async().await;
    }

    #[tokio::test]
    async fn test_insert_updates_count_and_search_ranks() {
        let mut server = mockito::Server::new_async().await;
        let _create = mock_create(&mut server).await;
        let _upsert = server
            .mock("PUT", Matcher::Regex(r"^/collections/[^/]+/points".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result": {"operation_id": 1, "status": "completed"}, "status": "ok"}"#)
            .create_async()
            .await;
        let _count = server
            .mock("POST", Matcher::Regex(r"^/collections/[^/]+/points/count".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result": {"count": 2}, "status": "ok"}"#)
            .create_async()
            .await;
        let _search = server
            .mock("POST", Matcher::Regex(r"^/collections/[^/]+/points/search".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"result": [
                    {"id": "00000000-0000-0000-0000-000000000002", "score": 0.2, "payload": {"_vector_id": "b"}},
                    {"id": "00000000-0000-0000-0000-000000000001", "score": 0.9, "payload": {"_vector_id": "a"}}
                ], "status": "ok"}"#,
            )
            .create_async()
            .await;

        let store = store(&server);
        let c = store
            .create_collection(CollectionSpec::new("docs", 2))
            .await
            .unwrap();
        store
            .insert(
                &c.id,
                vec![
                    Vector::with_id("a", vec![1.0, 0.0]),
                    Vector::with_id("b", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(store.get_collection(&c.id).await.unwrap().vector_count, 2);

        let results = store
            .search(&c.id, &SearchQuery::new(vec![1.0, 0.0], 10))
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", Matcher::Regex(r"^/collections/[^/]+$".to_string()))
            .with_status(404)
            .with_body(r#"{"status": {"error": "Not found"}}"#)
            .create_async()
            .await;

        let store = store(&server);
        let err = store
            .search("nope", &SearchQuery::new(vec![1.0], 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CollectionNotFound(id) if id == "nope"));
    }
}
