//! Embedding provider trait, deterministic fallback embedder, and vector
//! utilities.
//!
//! Concrete network providers (OpenAI, Ollama, fastembed) live in the
//! `docvec` app crate; this module holds what every provider shares.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Trait for embedding providers.
///
/// Implementations return one vector per input text, in input order. Output
/// does not need to be normalized; the generator normalizes every vector
/// before it reaches a vector store.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Declared properties of an embedding model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub dims: usize,
    /// Maximum input length in estimated tokens.
    pub max_input_tokens: usize,
}

/// Models with well-known dimensions and input limits.
const KNOWN_MODELS: &[(&str, usize, usize)] = &[
    ("text-embedding-3-small", 1536, 8191),
    ("text-embedding-3-large", 3072, 8191),
    ("text-embedding-ada-002", 1536, 8191),
    ("nomic-embed-text", 768, 8192),
    ("mxbai-embed-large", 1024, 512),
    ("all-minilm", 384, 256),
    ("all-minilm-l6-v2", 384, 256),
    ("bge-small-en-v1.5", 384, 512),
    ("bge-base-en-v1.5", 768, 512),
    ("bge-large-en-v1.5", 1024, 512),
    ("hash", 384, 8192),
];

impl ModelSpec {
    /// Look up a model by name.
    pub fn known(name: &str) -> Option<Self> {
        KNOWN_MODELS
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|&(n, dims, max)| Self {
                name: n.to_string(),
                dims,
                max_input_tokens: max,
            })
    }
}

/// Deterministic pseudo-embedding derived from a seeded hash of the text.
///
/// Uses feature hashing: every lowercased word adds `±1` to a bucket chosen
/// by `SHA-256(seed || word)`, so texts that share words point in similar
/// directions. Text without any word characters hashes as a whole. The
/// result is L2-normalized and identical across runs and machines.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
    seed: u64,
}

impl HashEmbedder {
    pub fn new(dims: usize, seed: u64) -> Self {
        Self { dims, seed }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        if self.dims == 0 {
            return v;
        }

        let lowered = text.to_lowercase();
        let mut tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            tokens.push(lowered.as_str());
        }

        for token in tokens {
            let digest = self.digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) % self.dims as u64;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket as usize] += sign;
        }

        l2_normalize(&mut v);
        v
    }

    fn digest(&self, bytes: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        out
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }
}

/// Scale a vector to unit L2 length in place. Zero vectors are left as is.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use docvec_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::cosine_similarity;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_hash_embedder_deterministic_and_normalized() {
        let e = HashEmbedder::new(64, 7);
        let a = e.embed("Rust vector search");
        let b = e.embed("Rust vector search");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_seed_changes_output() {
        let a = HashEmbedder::new(64, 1).embed("same text here");
        let b = HashEmbedder::new(64, 2).embed("same text here");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_embedder_shared_words_are_closer() {
        let e = HashEmbedder::new(256, 42);
        let base = e.embed("kubernetes deployment rollout strategy");
        let near = e.embed("kubernetes deployment rollback");
        let far = e.embed("sourdough bread baking tips");
        assert!(cosine_similarity(&base, &near) > cosine_similarity(&base, &far));
    }

    #[test]
    fn test_hash_embedder_punctuation_only_text() {
        let v = HashEmbedder::new(16, 0).embed("!!!");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0f32; 3];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0; 3]);
        let mut w = vec![3.0f32, 4.0];
        l2_normalize(&mut w);
        assert!((w[0] - 0.6).abs() < 1e-6 && (w[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_known_models() {
        let spec = ModelSpec::known("text-embedding-3-small").unwrap();
        assert_eq!(spec.dims, 1536);
        assert!(ModelSpec::known("no-such-model").is_none());
    }

    #[tokio::test]
    async fn test_hash_embedder_as_provider() {
        let e = HashEmbedder::new(8, 3);
        let out = e
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], e.embed("a"));
    }
}
