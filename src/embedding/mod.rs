//! Embedding providers and the embedding generator.
//!
//! Provider implementations:
//! - **`hash`**: [`HashEmbedder`], deterministic and offline.
//! - **[`OpenAIProvider`]**: OpenAI embeddings API with batching, retry, and backoff.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: fastembed, behind the `local-embeddings` feature.
//!
//! [`EmbeddingGenerator`] wraps a provider with the input-length policy,
//! batching, a per-call timeout, L2 normalization, and the deterministic
//! fallback: when the provider fails, each affected text is embedded with a
//! seeded [`HashEmbedder`] and the result is flagged `fallback = true`.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use docvec::config::EmbeddingConfig;
//! # use docvec::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "hash"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "hash");
//! ```

mod remote;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use serde::{Deserialize, Serialize};

pub use docvec_core::embedding::{l2_normalize, EmbeddingProvider, HashEmbedder, ModelSpec};
use docvec_core::chunk::{estimate_tokens, CHARS_PER_TOKEN};
use docvec_core::{Error, Result};
pub use remote::{OllamaProvider, OpenAIProvider};

use crate::config::EmbeddingConfig;

/// One embedded text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// Unit-length vector.
    pub values: Vec<f32>,
    pub dimension: usize,
    pub token_estimate: usize,
    /// Wall time of the provider call that produced this vector.
    pub latency_ms: u64,
    pub model: String,
    /// True when the deterministic fallback produced the vector.
    pub fallback: bool,
}

/// Embedding details reported alongside query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingInfo {
    pub model: String,
    pub dimension: usize,
    pub token_estimate: usize,
    pub latency_ms: u64,
    pub fallback: bool,
}

impl From<&Embedding> for EmbeddingInfo {
    fn from(e: &Embedding) -> Self {
        Self {
            model: e.model.clone(),
            dimension: e.dimension,
            token_estimate: e.token_estimate,
            latency_ms: e.latency_ms,
            fallback: e.fallback,
        }
    }
}

/// Turns text into normalized vectors, never failing on provider errors.
pub struct EmbeddingGenerator {
    provider: Arc<dyn EmbeddingProvider>,
    fallback: HashEmbedder,
    spec: ModelSpec,
    allow_truncation: bool,
    batch_size: usize,
    timeout: Duration,
}

impl EmbeddingGenerator {
    /// A generator with default policy: no truncation, batches of 64, a
    /// 30 second timeout, fallback seed 0.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, spec: ModelSpec) -> Self {
        Self {
            fallback: HashEmbedder::new(spec.dims, 0),
            provider,
            spec,
            allow_truncation: false,
            batch_size: 64,
            timeout: Duration::from_secs(30),
        }
    }

    /// Build the configured provider and apply the configured policy.
    pub fn from_config(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let spec = config.model_spec()?;
        let provider = create_provider(config)?;
        if provider.dims() != spec.dims {
            bail!(
                "provider '{}' produces {} dimensions, configured {}",
                provider.model_name(),
                provider.dims(),
                spec.dims
            );
        }
        Ok(Self::new(provider, spec)
            .allow_truncation(config.allow_truncation)
            .batch_size(config.batch_size)
            .timeout(Duration::from_secs(config.timeout_secs))
            .fallback_seed(config.fallback_seed))
    }

    pub fn allow_truncation(mut self, allow: bool) -> Self {
        self.allow_truncation = allow;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn fallback_seed(mut self, seed: u64) -> Self {
        self.fallback = HashEmbedder::new(self.spec.dims, seed);
        self
    }

    pub fn dims(&self) -> usize {
        self.spec.dims
    }

    pub fn model_name(&self) -> &str {
        &self.spec.name
    }

    pub fn max_input_tokens(&self) -> usize {
        self.spec.max_input_tokens
    }

    /// Embed one text.
    ///
    /// # Errors
    ///
    /// [`Error::InputTooLong`] when the text exceeds the model limit and
    /// truncation is off. Provider failures never surface here.
    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut results = self.embed_batch(&[text.to_string()]).await;
        results
            .pop()
            .unwrap_or_else(|| Err(Error::ProviderUnavailable("empty embedding batch".to_string())))
    }

    /// Embed many texts; one result per input, in input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Embedding>> {
        let mut results: Vec<Option<Result<Embedding>>> = Vec::with_capacity(texts.len());
        let mut ready: Vec<(usize, String, usize)> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.prepare(text) {
                Ok((prepared, tokens)) => {
                    results.push(None);
                    ready.push((i, prepared, tokens));
                }
                Err(e) => results.push(Some(Err(e))),
            }
        }

        for batch in ready.chunks(self.batch_size) {
            let inputs: Vec<String> = batch.iter().map(|(_, t, _)| t.clone()).collect();
            let started = Instant::now();
            let outcome = self.call_provider(&inputs).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(vectors) => {
                    tracing::debug!(
                        batch = inputs.len(),
                        latency_ms,
                        model = %self.spec.name,
                        "embedded batch"
                    );
                    for ((i, _, tokens), mut values) in batch.iter().zip(vectors) {
                        l2_normalize(&mut values);
                        results[*i] = Some(Ok(self.wrap(values, *tokens, latency_ms, false)));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        batch = inputs.len(),
                        model = %self.spec.name,
                        "embedding provider failed, using deterministic fallback"
                    );
                    for (i, text, tokens) in batch {
                        let values = self.fallback.embed(text);
                        results[*i] = Some(Ok(self.wrap(values, *tokens, latency_ms, true)));
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| Err(Error::ProviderUnavailable("text was not embedded".to_string())))
            })
            .collect()
    }

    /// Apply the input-length policy.
    fn prepare(&self, text: &str) -> Result<(String, usize)> {
        let tokens = estimate_tokens(text);
        let max = self.spec.max_input_tokens;
        if tokens <= max {
            return Ok((text.to_string(), tokens));
        }
        if !self.allow_truncation {
            return Err(Error::InputTooLong { tokens, max });
        }
        let truncated: String = text.chars().take(max * CHARS_PER_TOKEN).collect();
        let tokens = estimate_tokens(&truncated);
        Ok((truncated, tokens))
    }

    /// Call the provider under the timeout and check the shape of its reply.
    async fn call_provider(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = tokio::time::timeout(self.timeout, self.provider.embed_batch(inputs))
            .await
            .map_err(|_| {
                Error::ProviderUnavailable(format!(
                    "embedding timed out after {:?}",
                    self.timeout
                ))
            })??;

        if vectors.len() != inputs.len() {
            return Err(Error::ProviderUnavailable(format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                inputs.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.spec.dims) {
            return Err(Error::ProviderUnavailable(format!(
                "provider returned a {}-dimensional vector, expected {}",
                bad.len(),
                self.spec.dims
            )));
        }
        if vectors.iter().flatten().any(|x| !x.is_finite()) {
            return Err(Error::ProviderUnavailable(
                "provider returned a non-finite value".to_string(),
            ));
        }
        Ok(vectors)
    }

    fn wrap(&self, values: Vec<f32>, tokens: usize, latency_ms: u64, fallback: bool) -> Embedding {
        Embedding {
            dimension: values.len(),
            values,
            token_estimate: tokens,
            latency_ms,
            model: self.spec.name.clone(),
            fallback,
        }
    }
}

// ============ Local Provider (fastembed) ============

/// Embedding provider for local inference via fastembed.
///
/// Models are downloaded on first use from Hugging Face and cached.
/// After initial download, embeddings run entirely offline.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let spec = config.model_spec()?;
        config_to_fastembed_model(&spec.name)?;
        Ok(Self {
            model_name: spec.name,
            dims: spec.dims,
            batch_size: config.batch_size,
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> anyhow::Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait::async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = config_to_fastembed_model(&self.model_name)
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(model).with_show_download_progress(true),
            )
            .map_err(|e| {
                Error::ProviderUnavailable(format!(
                    "Failed to initialize local embedding model: {}",
                    e
                ))
            })?;

            model
                .embed(texts, Some(batch_size))
                .map_err(|e| Error::ProviderUnavailable(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| Error::ProviderUnavailable(e.to_string()))?
    }
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"hash"` | [`HashEmbedder`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (requires the `local-embeddings` feature) |
pub fn create_provider(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hash" => {
            let spec = config.model_spec()?;
            Ok(Arc::new(HashEmbedder::new(spec.dims, config.fallback_seed)))
        }
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            8
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::ProviderUnavailable("quota exceeded".to_string()))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn model_name(&self) -> &str {
            "slow"
        }
        fn dims(&self) -> usize {
            8
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![vec![1.0; 8]; texts.len()])
        }
    }

    /// Returns vectors of the wrong dimension.
    struct ShortProvider;

    #[async_trait]
    impl EmbeddingProvider for ShortProvider {
        fn model_name(&self) -> &str {
            "short"
        }
        fn dims(&self) -> usize {
            8
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0; 3]; texts.len()])
        }
    }

    struct NanProvider;

    #[async_trait]
    impl EmbeddingProvider for NanProvider {
        fn model_name(&self) -> &str {
            "nan"
        }
        fn dims(&self) -> usize {
            8
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![f32::NAN; 8]; texts.len()])
        }
    }

    fn spec(dims: usize, max: usize) -> ModelSpec {
        ModelSpec {
            name: "test-model".to_string(),
            dims,
            max_input_tokens: max,
        }
    }

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[tokio::test]
    async fn test_provider_output_is_normalized() {
        let generator = EmbeddingGenerator::new(Arc::new(HashEmbedder::new(8, 1)), spec(8, 100));
        let e = generator.embed("normalize me please").await.unwrap();
        assert_eq!(e.dimension, 8);
        assert!(!e.fallback);
        assert!((norm(&e.values) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_failure_uses_deterministic_fallback() {
        let generator = EmbeddingGenerator::new(Arc::new(FailingProvider), spec(8, 100)).fallback_seed(9);
        let a = generator.embed("same input").await.unwrap();
        let b = generator.embed("same input").await.unwrap();
        assert!(a.fallback);
        assert_eq!(a.values, b.values);
        assert_eq!(a.values, HashEmbedder::new(8, 9).embed("same input"));
        assert_eq!(a.model, "test-model");
    }

    #[tokio::test]
    async fn test_wrong_dimension_reply_falls_back() {
        let generator = EmbeddingGenerator::new(Arc::new(ShortProvider), spec(8, 100));
        let e = generator.embed("text").await.unwrap();
        assert!(e.fallback);
        assert_eq!(e.values.len(), 8);
    }

    #[tokio::test]
    async fn test_non_finite_reply_falls_back() {
        let generator = EmbeddingGenerator::new(Arc::new(NanProvider), spec(8, 100));
        let e = generator.embed("text").await.unwrap();
        assert!(e.fallback);
        assert!(e.values.iter().all(|x| x.is_finite()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back() {
        let generator = EmbeddingGenerator::new(Arc::new(SlowProvider), spec(8, 100))
            .timeout(Duration::from_millis(50));
        let e = generator.embed("slow text").await.unwrap();
        assert!(e.fallback);
    }

    #[tokio::test]
    async fn test_input_too_long() {
        let generator = EmbeddingGenerator::new(Arc::new(HashEmbedder::new(8, 0)), spec(8, 2));
        let err = generator.embed("far too many characters here").await.unwrap_err();
        assert!(matches!(err, Error::InputTooLong { max: 2, .. }));

        let truncating = EmbeddingGenerator::new(Arc::new(HashEmbedder::new(8, 0)), spec(8, 2))
            .allow_truncation(true);
        let e = truncating.embed("far too many characters here").await.unwrap();
        assert_eq!(e.token_estimate, 2);
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_per_item_errors() {
        let generator = EmbeddingGenerator::new(Arc::new(HashEmbedder::new(16, 4)), spec(16, 3))
            .batch_size(2);
        let texts: Vec<String> = vec![
            "one".into(),
            "this one is definitely too long".into(),
            "two".into(),
            "three".into(),
        ];
        let results = generator.embed_batch(&texts).await;
        assert_eq!(results.len(), 4);
        assert!(matches!(results[1], Err(Error::InputTooLong { .. })));
        let reference = HashEmbedder::new(16, 4);
        for (i, text) in [(0, "one"), (2, "two"), (3, "three")] {
            let got = &results[i].as_ref().unwrap().values;
            let want = reference.embed(text);
            assert!(got.iter().zip(&want).all(|(a, b)| (a - b).abs() < 1e-6));
        }
    }

    #[test]
    fn test_create_provider() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "hash");
        assert_eq!(provider.dims(), 384);

        let bad = EmbeddingConfig {
            provider: "magic".to_string(),
            ..Default::default()
        };
        assert!(create_provider(&bad).is_err());
    }
}
