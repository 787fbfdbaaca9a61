//! Similarity scoring and exact top-K ranking.
//!
//! Every backend ranks with the same convention: **higher is better**.
//! Distance metrics are negated so callers never special-case the metric.
//!
//! | Metric | Score | Range |
//! |--------|-------|-------|
//! | cosine | `cos(q, v)` | `[-1, 1]` |
//! | dot-product | `q · v` | unbounded |
//! | euclidean | `-‖q - v‖₂` | `(-∞, 0]` |
//! | manhattan | `-‖q - v‖₁` | `(-∞, 0]` |
//!
//! Cosine is computed in full rather than as a plain dot product. Vectors
//! from the embedding generator are unit length, so the two agree there;
//! un-normalized vectors inserted directly are scored by true cosine.
//!
//! # Ranking Algorithm
//!
//! 1. Drop candidates rejected by the [`MetadataFilter`].
//! 2. Score every remaining candidate against the query.
//! 3. Stable-sort by score, descending; insertion order breaks ties.
//! 4. Truncate to `min(top_k, candidates)`.

use serde::{Deserialize, Serialize};

use crate::models::{Metadata, SearchResult, SimilarityMetric, Vector};

/// Exact-match filter over vector namespace and metadata keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataFilter {
    pub namespace: Option<String>,
    /// Every key must be present in the vector's metadata with an equal value.
    pub equals: Metadata,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.namespace.is_none() && self.equals.is_empty()
    }

    pub fn matches(&self, vector: &Vector) -> bool {
        if let Some(ns) = &self.namespace {
            if vector.namespace.as_deref() != Some(ns.as_str()) {
                return false;
            }
        }
        self.equals
            .iter()
            .all(|(k, v)| vector.metadata.get(k) == Some(v))
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Similarity of `candidate` to `query` under `metric`, higher is better.
pub fn score(metric: SimilarityMetric, query: &[f32], candidate: &[f32]) -> f32 {
    match metric {
        SimilarityMetric::Cosine => cosine_similarity(query, candidate),
        SimilarityMetric::DotProduct => dot(query, candidate),
        SimilarityMetric::Euclidean => -query
            .iter()
            .zip(candidate.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
        SimilarityMetric::Manhattan => -query
            .iter()
            .zip(candidate.iter())
            .map(|(x, y)| (x - y).abs())
            .sum::<f32>(),
    }
}

/// Sort results by descending score. The sort is stable, so results that
/// arrive in insertion order keep it among equal scores. `total_cmp` keeps
/// the order total even if a NaN score slips through.
pub fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Exact top-K search over `candidates`, which must be in insertion order.
///
/// Requesting more results than there are candidates returns all of them.
pub fn rank<'a, I>(
    metric: SimilarityMetric,
    query: &[f32],
    candidates: I,
    top_k: usize,
    filter: Option<&MetadataFilter>,
    include_values: bool,
) -> Vec<SearchResult>
where
    I: IntoIterator<Item = &'a Vector>,
{
    let mut results: Vec<SearchResult> = candidates
        .into_iter()
        .filter(|v| filter.map_or(true, |f| f.matches(v)))
        .map(|v| SearchResult {
            id: v.id.clone(),
            score: score(metric, query, &v.values),
            values: include_values.then(|| v.values.clone()),
            metadata: v.metadata.clone(),
            namespace: v.namespace.clone(),
        })
        .collect();

    sort_results(&mut results);
    results.truncate(top_k);
    results
}
