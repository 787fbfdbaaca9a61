//! Query API: nearest-neighbour search by text or by vector.
//!
//! Text queries are embedded with the same [`EmbeddingGenerator`] used at
//! ingestion, so a query and the chunks it should match share a vector
//! space. The embedding details travel back with the results.

use anyhow::{bail, Context};
use serde::Serialize;
use sqlx::SqlitePool;

use docvec_core::models::SearchResult;
use docvec_core::search::MetadataFilter;
use docvec_core::store::{SearchQuery, VectorStore};
use docvec_core::Result;

use crate::backends::Services;
use crate::config::Config;
use crate::embedding::{EmbeddingGenerator, EmbeddingInfo};

/// What to search with.
#[derive(Debug, Clone)]
pub enum QueryInput {
    Text(String),
    Vector(Vec<f32>),
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub results: Vec<SearchResult>,
    /// Present for text queries.
    pub embedding_info: Option<EmbeddingInfo>,
}

/// Search `collection_id` for the `top_k` nearest vectors to `input`.
///
/// A blank text query returns no results (after checking the collection
/// exists).
///
/// # Errors
///
/// [`docvec_core::Error::CollectionNotFound`], [`docvec_core::Error::DimensionMismatch`]
/// for a wrongly sized vector, and [`docvec_core::Error::InputTooLong`] for a
/// text beyond the model limit when truncation is off.
pub async fn query(
    store: &dyn VectorStore,
    generator: &EmbeddingGenerator,
    collection_id: &str,
    input: QueryInput,
    top_k: usize,
    filter: Option<MetadataFilter>,
) -> Result<QueryResponse> {
    let (vector, embedding_info) = match input {
        QueryInput::Text(text) if text.trim().is_empty() => {
            store.get_collection(collection_id).await?;
            return Ok(QueryResponse {
                results: Vec::new(),
                embedding_info: None,
            });
        }
        QueryInput::Text(text) => {
            let embedding = generator.embed(&text).await?;
            let info = EmbeddingInfo::from(&embedding);
            (embedding.values, Some(info))
        }
        QueryInput::Vector(values) => (values, None),
    };

    let mut search = SearchQuery::new(vector, top_k);
    if let Some(filter) = filter {
        search = search.filter(filter);
    }
    let results = store.search(collection_id, &search).await?;

    tracing::debug!(collection = %collection_id, top_k, hits = results.len(), "query");
    Ok(QueryResponse {
        results,
        embedding_info,
    })
}

/// Parse `key=value` filter arguments. Values that parse as JSON (numbers,
/// booleans) match as such; anything else matches as a string.
pub fn parse_filters(pairs: &[(String, String)], namespace: Option<String>) -> MetadataFilter {
    let mut filter = MetadataFilter {
        namespace,
        ..Default::default()
    };
    for (key, raw) in pairs {
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
        filter.equals.insert(key.clone(), value);
    }
    filter
}

/// CLI entry point: embed the query text, search, and print ranked hits.
pub async fn run_search(
    config: &Config,
    text: &str,
    collection_id: &str,
    top_k: usize,
    filters: Vec<(String, String)>,
    namespace: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    if top_k == 0 {
        bail!("--top-k must be >= 1");
    }
    let services = Services::open(config).await?;
    let filter = parse_filters(&filters, namespace);

    let response = query(
        services.vectors.as_ref(),
        &services.generator,
        collection_id,
        QueryInput::Text(text.to_string()),
        top_k,
        Some(filter),
    )
    .await
    .with_context(|| format!("search in collection {} failed", collection_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        services.close().await;
        return Ok(());
    }

    if response.results.is_empty() {
        println!("No results.");
        services.close().await;
        return Ok(());
    }

    for (i, result) in response.results.iter().enumerate() {
        let file_name = result
            .metadata
            .get("file_name")
            .and_then(|v| v.as_str())
            .unwrap_or("(unknown)");
        println!("{}. [{:.4}] {}", i + 1, result.score, file_name);
        if let Some(doc) = result.metadata.get("document_id").and_then(|v| v.as_str()) {
            println!("    document: {}", doc);
        }
        if let Some(ns) = &result.namespace {
            println!("    namespace: {}", ns);
        }
        if let Some(snippet) = chunk_snippet(&services.pool, &result.id).await? {
            println!("    excerpt: \"{}\"", snippet);
        }
        println!("    id: {}", result.id);
        println!();
    }

    if let Some(info) = &response.embedding_info {
        println!(
            "model: {} ({} dims, {} ms{})",
            info.model,
            info.dimension,
            info.latency_ms,
            if info.fallback { ", fallback" } else { "" }
        );
    }

    services.close().await;
    Ok(())
}

const SNIPPET_CHARS: usize = 200;

async fn chunk_snippet(pool: &SqlitePool, chunk_id: &str) -> anyhow::Result<Option<String>> {
    let content: Option<String> = sqlx::query_scalar("SELECT content FROM chunks WHERE id = ?")
        .bind(chunk_id)
        .fetch_optional(pool)
        .await?;
    Ok(content.map(|c| {
        let flat = c.replace('\n', " ");
        let trimmed = flat.trim();
        if trimmed.chars().count() > SNIPPET_CHARS {
            let cut: String = trimmed.chars().take(SNIPPET_CHARS).collect();
            format!("{}...", cut)
        } else {
            trimmed.to_string()
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docvec_core::embedding::{HashEmbedder, ModelSpec};
    use docvec_core::models::{CollectionSpec, Vector};
    use docvec_core::store::memory::InMemoryVectorStore;
    use docvec_core::Error;
    use serde_json::json;
    use std::sync::Arc;

    fn generator() -> EmbeddingGenerator {
        let spec = ModelSpec {
            name: "hash".to_string(),
            dims: 4,
            max_input_tokens: 8,
        };
        EmbeddingGenerator::new(Arc::new(HashProvider(HashEmbedder::new(4, 0))), spec)
    }

    struct HashProvider(HashEmbedder);

    #[async_trait::async_trait]
    impl docvec_core::embedding::EmbeddingProvider for HashProvider {
        fn model_name(&self) -> &str {
            "hash"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| self.0.embed(t)).collect())
        }
    }

    async fn seeded() -> (InMemoryVectorStore, String) {
        let store = InMemoryVectorStore::new();
        let c = store
            .create_collection(CollectionSpec::new("docs", 4))
            .await
            .unwrap();
        store
            .insert(
                &c.id,
                vec![
                    Vector::with_id("a", vec![1.0, 0.0, 0.0, 0.0]),
                    Vector::with_id("b", vec![0.0, 1.0, 0.0, 0.0]),
                    Vector::with_id("c", vec![0.0, 0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();
        (store, c.id)
    }

    #[tokio::test]
    async fn test_vector_query_returns_all_when_top_k_exceeds_size() {
        let (store, id) = seeded().await;
        let response = query(
            &store,
            &generator(),
            &id,
            QueryInput::Vector(vec![1.0, 0.0, 0.0, 0.0]),
            10,
            None,
        )
        .await
        .unwrap();
        assert_eq!(response.results.len(), 3);
        assert_eq!(response.results[0].id, "a");
        assert!((response.results[0].score - 1.0).abs() < 1e-6);
        assert!(response.embedding_info.is_none());
    }

    #[tokio::test]
    async fn test_text_query_reports_embedding_info() {
        let (store, id) = seeded().await;
        let response = query(
            &store,
            &generator(),
            &id,
            QueryInput::Text("tax".to_string()),
            2,
            None,
        )
        .await
        .unwrap();
        assert_eq!(response.results.len(), 2);
        let info = response.embedding_info.unwrap();
        assert_eq!(info.dimension, 4);
        assert!(!info.fallback);
    }

    #[tokio::test]
    async fn test_blank_text_and_errors() {
        let (store, id) = seeded().await;
        let empty = query(&store, &generator(), &id, QueryInput::Text("  ".into()), 3, None)
            .await
            .unwrap();
        assert!(empty.results.is_empty());

        let missing = query(&store, &generator(), "nope", QueryInput::Text("  ".into()), 3, None)
            .await
            .unwrap_err();
        assert!(matches!(missing, Error::CollectionNotFound(_)));

        let wrong = query(&store, &generator(), &id, QueryInput::Vector(vec![1.0]), 3, None)
            .await
            .unwrap_err();
        assert!(matches!(wrong, Error::DimensionMismatch { expected: 4, actual: 1 }));

        let long = query(
            &store,
            &generator(),
            &id,
            QueryInput::Text("x".repeat(100)),
            3,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(long, Error::InputTooLong { .. }));
    }

    #[test]
    fn test_parse_filters() {
        let filter = parse_filters(
            &[
                ("chunk_index".to_string(), "2".to_string()),
                ("doc_type".to_string(), "plain-text".to_string()),
                ("is_code".to_string(), "false".to_string()),
            ],
            Some("legal".to_string()),
        );
        assert_eq!(filter.namespace.as_deref(), Some("legal"));
        assert_eq!(filter.equals["chunk_index"], json!(2));
        assert_eq!(filter.equals["doc_type"], json!("plain-text"));
        assert_eq!(filter.equals["is_code"], json!(false));
    }
}
