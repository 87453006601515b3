use std::cmp::Ordering;

use crate::core::config::DistanceMetric;
use crate::core::errors::RagError;

impl DistanceMetric {
    /// pgvector ordering operator for this metric.
    pub fn operator(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "<=>",
            DistanceMetric::L2 => "<->",
            DistanceMetric::InnerProduct => "<#>",
        }
    }

    /// pgvector operator class used when building an index.
    pub fn index_ops(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "vector_cosine_ops",
            DistanceMetric::L2 => "vector_l2_ops",
            DistanceMetric::InnerProduct => "vector_ip_ops",
        }
    }

    /// Distance between two vectors; smaller is closer.
    ///
    /// Inner product is negated, as pgvector's `<#>` does.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> Result<f32, RagError> {
        if a.len() != b.len() {
            return Err(RagError::DimensionMismatch {
                expected: a.len(),
                actual: b.len(),
            });
        }

        let distance = match self {
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
            DistanceMetric::L2 => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            DistanceMetric::InnerProduct => -dot(a, b),
        };
        Ok(distance)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity; zero-norm vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot(a, b) / denom
    }
}

/// Ranks candidates closest-first, returning `(index, distance)`.
///
/// The sort is stable, so equal distances keep candidate order.
pub fn rank_ascending(
    metric: DistanceMetric,
    query: &[f32],
    candidates: &[Vec<f32>],
) -> Result<Vec<(usize, f32)>, RagError> {
    let mut scores = Vec::with_capacity(candidates.len());
    for (idx, candidate) in candidates.iter().enumerate() {
        scores.push((idx, metric.distance(query, candidate)?));
    }

    scores.sort_by(|left, right| left.1.partial_cmp(&right.1).unwrap_or(Ordering::Equal));
    Ok(scores)
}
