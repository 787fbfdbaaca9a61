//! Single-document ingestion pipeline.
//!
//! Drives one [`IngestRequest`] through every stage:
//!
//! ```text
//! extract → normalize → analyze → chunk → embed (batched) → insert → persist
//! ```
//!
//! Stage failures are recorded on the document rather than retried: a
//! document whose text could not be extracted, chunked, or embedded at all
//! ends `failed`; one where only some chunk embeddings failed ends `partial`
//! with the surviving vectors stored. Vector store structural errors,
//! persistence failures and cancellation are recorded too, then returned to
//! the caller.
//!
//! Cancellation is cooperative and checked between stages.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use docvec_core::analyze::{analyze_text, AnalyzeOptions};
use docvec_core::chunk::chunk_text;
use docvec_core::models::{
    Document, DocumentChunk, DocumentType, IngestRequest, Metadata, ProcessedDocument,
    ProcessingStatus, Vector,
};
use docvec_core::store::{DocumentStore, VectorStore};
use docvec_core::{Error, Result};

use crate::config::Config;
use crate::embedding::EmbeddingGenerator;
use crate::extract::{extract_file, normalize_whitespace, ExtractLimits};

/// Error message recorded on a document whose job was cancelled.
pub const CANCELLED_MESSAGE: &str = "cancelled";

pub struct Pipeline {
    vectors: Arc<dyn VectorStore>,
    documents: Arc<dyn DocumentStore>,
    generator: Arc<EmbeddingGenerator>,
    limits: ExtractLimits,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Pipeline {
    pub fn new(
        vectors: Arc<dyn VectorStore>,
        documents: Arc<dyn DocumentStore>,
        generator: Arc<EmbeddingGenerator>,
    ) -> Self {
        Self {
            vectors,
            documents,
            generator,
            limits: ExtractLimits::default(),
            chunk_size: 100,
            chunk_overlap: 20,
        }
    }

    pub fn from_config(
        config: &Config,
        vectors: Arc<dyn VectorStore>,
        documents: Arc<dyn DocumentStore>,
        generator: Arc<EmbeddingGenerator>,
    ) -> Self {
        Self::new(vectors, documents, generator)
            .limits(ExtractLimits::from(&config.extraction))
            .chunking(config.chunking.chunk_size, config.chunking.chunk_overlap)
    }

    pub fn limits(mut self, limits: ExtractLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Default chunk size and overlap, in words, for requests that set none.
    pub fn chunking(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vectors
    }

    pub fn document_store(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// Delete the vectors of the chunks stored for `document_id` by an
    /// earlier failed or partial run. Returns how many ids were targeted;
    /// a missing collection leaves nothing to delete.
    pub async fn discard_previous_vectors(
        &self,
        document_id: &str,
        collection_id: &str,
    ) -> Result<usize> {
        let ids: Vec<String> = self
            .documents
            .get_chunks(document_id)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        match self.vectors.delete(collection_id, &ids).await {
            Ok(()) => {
                tracing::debug!(document = %document_id, stale = ids.len(), "removed vectors from previous run");
                Ok(ids.len())
            }
            Err(Error::CollectionNotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Process one request to completion.
    ///
    /// Re-processing a `failed` or `partial` document first deletes the
    /// vectors of its previously stored chunks, so a run that yields fewer
    /// chunks leaves none behind.
    ///
    /// Returns `Ok` with a `success`, `partial` or `failed` document for
    /// extraction, chunking and embedding failures. Returns `Err` for an
    /// unsupported type, an id that was already ingested successfully,
    /// cancellation, and vector store or persistence errors.
    pub async fn process(
        &self,
        request: &IngestRequest,
        cancel: &CancellationToken,
    ) -> Result<ProcessedDocument> {
        let started = Instant::now();
        let doc_type: DocumentType = request.file_type.parse()?;

        if let Some(existing) = self.documents.get_document(&request.id).await? {
            if existing.status == ProcessingStatus::Success {
                return Err(Error::Configuration(format!(
                    "document {} was already ingested",
                    request.id
                )));
            }
        }

        let mut doc = Document::pending(&request.id, &request.file_name, doc_type);
        doc.title = title_for(&request.file_name);
        let mut chunks = Vec::new();

        tracing::info!(document = %request.id, file = %request.file_name, doc_type = %doc_type, "processing document");

        let outcome = self.run_stages(request, &mut doc, &mut chunks, cancel).await;
        doc.updated_at = Utc::now();

        let (vectors_inserted, surfaced) = match outcome {
            Ok(inserted) => {
                if doc.status == ProcessingStatus::Pending {
                    doc.status = ProcessingStatus::Success;
                }
                (inserted, None)
            }
            Err(e) => {
                doc.status = ProcessingStatus::Failed;
                doc.errors.push(match e {
                    Error::Cancelled => CANCELLED_MESSAGE.to_string(),
                    ref other => other.to_string(),
                });
                tracing::warn!(document = %request.id, error = %e, "document failed");
                let recoverable = matches!(
                    e,
                    Error::Extraction(_)
                        | Error::Configuration(_)
                        | Error::InputTooLong { .. }
                        | Error::ProviderUnavailable(_)
                );
                (0, (!recoverable).then_some(e))
            }
        };

        if let Err(e) = self.documents.save_document(&doc, &chunks).await {
            tracing::error!(document = %doc.id, error = %e, "failed to persist document");
            return Err(surfaced.unwrap_or(e));
        }
        if let Some(e) = surfaced {
            return Err(e);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            document = %doc.id,
            status = %doc.status,
            chunks = chunks.len(),
            vectors = vectors_inserted,
            duration_ms,
            "processed document"
        );

        Ok(ProcessedDocument {
            document: doc,
            chunks,
            vectors_inserted,
            duration_ms,
        })
    }

    /// Run every stage, filling in `doc` and `chunks` as they complete.
    /// Returns the number of vectors inserted.
    async fn run_stages(
        &self,
        request: &IngestRequest,
        doc: &mut Document,
        chunks: &mut Vec<DocumentChunk>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let options = &request.options;

        // Fail fast on a missing collection before any work.
        let collection = self.vectors.get_collection(&request.collection_id).await?;
        checkpoint(cancel)?;

        self.discard_previous_vectors(&doc.id, &collection.id).await?;

        // Extract
        let path = request.file_path.clone();
        let file_type = request.file_type.clone();
        let limits = self.limits.clone();
        let extraction = tokio::task::spawn_blocking(move || extract_file(&path, &file_type, &limits));
        let text = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            joined = extraction => joined
                .map_err(|e| Error::Extraction(format!("extraction task failed: {}", e)))??,
        };

        doc.content = if options.preserve_formatting {
            text
        } else {
            normalize_whitespace(&text)
        };
        doc.metadata.size_bytes = tokio::fs::metadata(&request.file_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        doc.metadata.character_count = doc.content.chars().count();
        doc.metadata.word_count = doc.content.split_whitespace().count();
        checkpoint(cancel)?;

        // Analyze
        if options.extract_metadata {
            let analysis = analyze_text(
                &doc.content,
                AnalyzeOptions {
                    detect_language: options.language_detection,
                },
            );
            doc.metadata.language = analysis.language;
            doc.metadata.tags = analysis.tags;
            doc.metadata.word_count = analysis.word_count;
            doc.metadata.character_count = analysis.character_count;
            doc.statistics = Some(analysis.statistics);
        }
        checkpoint(cancel)?;

        // Chunk
        if !options.generate_chunks {
            return Ok(0);
        }
        let chunk_size = options.chunk_size.unwrap_or(self.chunk_size);
        let overlap = options.chunk_overlap.unwrap_or(self.chunk_overlap);
        *chunks = chunk_text(&doc.id, &doc.content, chunk_size, overlap)?;
        if chunks.is_empty() {
            tracing::debug!(document = %doc.id, "no text to chunk");
            return Ok(0);
        }
        checkpoint(cancel)?;

        // Embed
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            results = self.generator.embed_batch(&texts) => results,
        };

        let mut vectors = Vec::with_capacity(chunks.len());
        let mut fallbacks = 0usize;
        for (chunk, result) in chunks.iter().zip(embeddings) {
            match result {
                Ok(embedding) => {
                    if embedding.fallback {
                        fallbacks += 1;
                    }
                    let mut vector = Vector::with_id(chunk.id.clone(), embedding.values)
                        .metadata(vector_metadata(doc, chunk))
                        .document(doc.id.clone());
                    if let Some(ns) = &request.namespace {
                        vector = vector.namespace(ns.clone());
                    }
                    vectors.push(vector);
                }
                Err(e) => doc.errors.push(format!("chunk {}: {}", chunk.index, e)),
            }
        }
        if fallbacks > 0 {
            tracing::warn!(document = %doc.id, fallbacks, "embedded chunks with the fallback embedder");
        }
        if vectors.is_empty() {
            doc.status = ProcessingStatus::Failed;
            return Ok(0);
        }
        checkpoint(cancel)?;

        // Insert
        let inserted = vectors.len();
        self.vectors.insert(&collection.id, vectors).await?;
        tracing::debug!(document = %doc.id, collection = %collection.id, inserted, "inserted vectors");

        if inserted < chunks.len() {
            doc.status = ProcessingStatus::Partial;
        }
        Ok(inserted)
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

fn title_for(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(file_name)
        .to_string()
}

/// Back-references written on every vector produced by ingestion.
fn vector_metadata(doc: &Document, chunk: &DocumentChunk) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("document_id".to_string(), json!(doc.id));
    metadata.insert("chunk_id".to_string(), json!(chunk.id));
    metadata.insert("chunk_index".to_string(), json!(chunk.index));
    metadata.insert("file_name".to_string(), json!(doc.file_name));
    metadata.insert("doc_type".to_string(), json!(doc.doc_type.as_str()));
    metadata.insert("word_count".to_string(), json!(chunk.metadata.word_count));
    metadata.insert("is_code".to_string(), json!(chunk.metadata.looks_like_code));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use docvec_core::embedding::{EmbeddingProvider, ModelSpec};
    use docvec_core::models::{CollectionSpec, ProcessingOptions};
    use docvec_core::store::memory::{InMemoryDocumentStore, InMemoryVectorStore};
    use docvec_core::store::SearchQuery;
    use docvec_core::embedding::HashEmbedder;
    use tempfile::TempDir;

    struct Hashing(HashEmbedder, usize);

    #[async_trait::async_trait]
    impl EmbeddingProvider for Hashing {
        fn model_name(&self) -> &str {
            "hash"
        }
        fn dims(&self) -> usize {
            self.1
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| self.0.embed(t)).collect())
        }
    }

    fn generator(dims: usize) -> Arc<EmbeddingGenerator> {
        let spec = ModelSpec {
            name: "hash".to_string(),
            dims,
            max_input_tokens: 8192,
        };
        Arc::new(EmbeddingGenerator::new(
            Arc::new(Hashing(HashEmbedder::new(dims, 0), dims)),
            spec,
        ))
    }

    struct Fixture {
        _tmp: TempDir,
        dir: std::path::PathBuf,
        vectors: Arc<InMemoryVectorStore>,
        documents: Arc<InMemoryDocumentStore>,
        pipeline: Pipeline,
        collection_id: String,
    }

    async fn fixture(dims: usize) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let vectors = Arc::new(InMemoryVectorStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let collection = vectors
            .create_collection(CollectionSpec::new("docs", dims))
            .await
            .unwrap();
        let pipeline = Pipeline::new(vectors.clone(), documents.clone(), generator(dims))
            .chunking(10, 2);
        Fixture {
            _tmp: tmp,
            dir,
            vectors,
            documents,
            pipeline,
            collection_id: collection.id,
        }
    }

    fn request(fx: &Fixture, id: &str, name: &str, body: &str, file_type: &str) -> IngestRequest {
        let path = fx.dir.join(name);
        std::fs::write(&path, body).unwrap();
        IngestRequest {
            id: id.to_string(),
            file_path: path,
            file_name: name.to_string(),
            file_type: file_type.to_string(),
            collection_id: fx.collection_id.clone(),
            namespace: None,
            options: ProcessingOptions::default(),
        }
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[tokio::test]
    async fn test_process_text_document() {
        let fx = fixture(16).await;
        let req = request(&fx, "doc-1", "notes.txt", &words(25), "txt");

        let processed = fx
            .pipeline
            .process(&req, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(processed.document.status, ProcessingStatus::Success);
        assert_eq!(processed.document.title, "notes");
        // 25 words, window 10, step 8: starts at 0, 8, 16
        assert_eq!(processed.chunks.len(), 3);
        assert_eq!(processed.vectors_inserted, 3);

        let stats = fx.vectors.stats(&fx.collection_id).await.unwrap();
        assert_eq!(stats.count, 3);

        let stored = fx.documents.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Success);
        assert_eq!(fx.documents.get_chunks("doc-1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_vectors_carry_back_references() {
        let fx = fixture(16).await;
        let mut req = request(&fx, "doc-2", "a.txt", &words(5), "txt");
        req.namespace = Some("team-a".to_string());
        let processed = fx
            .pipeline
            .process(&req, &CancellationToken::new())
            .await
            .unwrap();
        let chunk = &processed.chunks[0];

        let query = SearchQuery::new(generator(16).embed(&chunk.content).await.unwrap().values, 1);
        let hits = fx.vectors.search(&fx.collection_id, &query).await.unwrap();
        assert_eq!(hits[0].id, chunk.id);
        assert_eq!(hits[0].metadata["document_id"], "doc-2");
        assert_eq!(hits[0].metadata["chunk_index"], 0);
        assert_eq!(hits[0].namespace.as_deref(), Some("team-a"));
    }

    #[tokio::test]
    async fn test_extraction_failure_marks_document_failed() {
        let fx = fixture(16).await;
        let req = request(&fx, "doc-3", "broken.json", "{ not json: [", "json");

        let processed = fx
            .pipeline
            .process(&req, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(processed.document.status, ProcessingStatus::Failed);
        assert_eq!(processed.document.errors.len(), 1);
        assert_eq!(processed.vectors_inserted, 0);
        assert_eq!(fx.vectors.stats(&fx.collection_id).await.unwrap().count, 0);

        let stored = fx.documents.get_document("doc-3").await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_surfaced() {
        let fx = fixture(16).await;
        let mut req = request(&fx, "doc-4", "a.txt", "hello", "txt");
        req.collection_id = "missing".to_string();

        let err = fx
            .pipeline
            .process(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CollectionNotFound(_)));
        let stored = fx.documents.get_document("doc-4").await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_surfaced() {
        let fx = fixture(16).await;
        let other = fx
            .vectors
            .create_collection(CollectionSpec::new("small", 4))
            .await
            .unwrap();
        let mut req = request(&fx, "doc-5", "a.txt", "some words here", "txt");
        req.collection_id = other.id.clone();

        let err = fx
            .pipeline
            .process(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 16 }));
        assert_eq!(fx.vectors.stats(&other.id).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fx = fixture(16).await;
        let req = request(&fx, "doc-6", "a.txt", &words(30), "txt");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fx.pipeline.process(&req, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        let stored = fx.documents.get_document("doc-6").await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Failed);
        assert_eq!(stored.errors, vec![CANCELLED_MESSAGE.to_string()]);
        assert_eq!(fx.vectors.stats(&fx.collection_id).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_resubmitting_success_fails() {
        let fx = fixture(16).await;
        let req = request(&fx, "doc-7", "a.txt", "alpha beta", "txt");
        fx.pipeline
            .process(&req, &CancellationToken::new())
            .await
            .unwrap();

        let err = fx
            .pipeline
            .process(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        let stored = fx.documents.get_document("doc-7").await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Success);
    }

    #[tokio::test]
    async fn test_input_too_long_gives_partial() {
        let fx = fixture(8).await;
        let spec = ModelSpec {
            name: "tiny".to_string(),
            dims: 8,
            max_input_tokens: 5,
        };
        let generator = Arc::new(EmbeddingGenerator::new(
            Arc::new(Hashing(HashEmbedder::new(8, 0), 8)),
            spec,
        ));
        let pipeline = Pipeline::new(fx.vectors.clone(), fx.documents.clone(), generator)
            .chunking(3, 0);
        // Chunks: "a b c" (5 chars, 2 tokens) and one long-word chunk.
        let long = "x".repeat(40);
        let req = request(&fx, "doc-8", "a.txt", &format!("a b c {} y z", long), "txt");

        let processed = pipeline
            .process(&req, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(processed.chunks.len(), 2);
        assert_eq!(processed.vectors_inserted, 1);
        assert_eq!(processed.document.status, ProcessingStatus::Partial);
        assert!(processed.document.errors[0].starts_with("chunk 1:"));
    }

    #[tokio::test]
    async fn test_reprocessing_partial_document_drops_stale_vectors() {
        let fx = fixture(8).await;
        let spec = ModelSpec {
            name: "tiny".to_string(),
            dims: 8,
            max_input_tokens: 5,
        };
        let strict = Arc::new(EmbeddingGenerator::new(
            Arc::new(Hashing(HashEmbedder::new(8, 0), 8)),
            spec.clone(),
        ));
        let long = "x".repeat(40);
        let mut req = request(&fx, "doc-10", "a.txt", &format!("a b c d e f {} y z", long), "txt");
        req.options.chunk_size = Some(3);
        req.options.chunk_overlap = Some(0);

        let first = Pipeline::new(fx.vectors.clone(), fx.documents.clone(), strict)
            .process(&req, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.document.status, ProcessingStatus::Partial);
        assert_eq!(first.chunks.len(), 3);
        assert_eq!(fx.vectors.stats(&fx.collection_id).await.unwrap().count, 2);

        // Second run: one large chunk, truncated to fit
        let truncating = Arc::new(
            EmbeddingGenerator::new(Arc::new(Hashing(HashEmbedder::new(8, 0), 8)), spec)
                .allow_truncation(true),
        );
        req.options.chunk_size = Some(50);
        let second = Pipeline::new(fx.vectors.clone(), fx.documents.clone(), truncating)
            .process(&req, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.document.status, ProcessingStatus::Success);
        assert_eq!(second.chunks.len(), 1);

        assert_eq!(fx.vectors.stats(&fx.collection_id).await.unwrap().count, 1);
        let stored = fx.documents.get_chunks("doc-10").await.unwrap();
        let hits = fx
            .vectors
            .search(&fx.collection_id, &SearchQuery::new(vec![1.0; 8], 10))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["chunk_id"], serde_json::json!(stored[0].id));
    }

    #[tokio::test]
    async fn test_skip_chunking_and_metadata() {
        let fx = fixture(16).await;
        let mut req = request(&fx, "doc-9", "a.txt", "Just a few words here.", "txt");
        req.options.generate_chunks = false;
        req.options.extract_metadata = false;

        let processed = fx
            .pipeline
            .process(&req, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(processed.document.status, ProcessingStatus::Success);
        assert!(processed.chunks.is_empty());
        assert!(processed.document.statistics.is_none());
        assert_eq!(processed.document.metadata.word_count, 5);
    }

    #[test]
    fn test_title_for() {
        assert_eq!(title_for("report.final.pdf"), "report.final");
        assert_eq!(title_for("README"), "README");
    }
}
