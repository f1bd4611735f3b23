use crate::error::RosterError;
use serde::{Deserialize, Serialize};

/// Allowed drift from unit length for a normalized embedding.
pub const NORM_TOLERANCE: f32 = 1e-4;

/// L2-normalized face embedding (typically 512-dimensional).
///
/// Only constructible through [`Embedding::normalized`], so every value of
/// this type has unit norm.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Normalize a raw model output to unit length.
    pub fn normalized(raw: &[f32]) -> Result<Self, RosterError> {
        if raw.is_empty() || raw.iter().any(|v| !v.is_finite()) {
            return Err(RosterError::DegenerateEmbedding);
        }

        // Scale by the largest magnitude first so the squares can neither
        // overflow to infinity nor underflow to zero.
        let max = raw.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        if max == 0.0 {
            return Err(RosterError::DegenerateEmbedding);
        }

        let scaled: Vec<f32> = raw.iter().map(|x| x / max).collect();
        let norm = scaled.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values: Vec<f32> = scaled.iter().map(|x| x / norm).collect();

        let embedding = Self { values };
        if (embedding.norm() - 1.0).abs() > NORM_TOLERANCE {
            return Err(RosterError::DegenerateEmbedding);
        }
        Ok(embedding)
    }

    /// Validate `raw` against a fixed store dimension, then normalize it.
    pub fn with_dimension(raw: &[f32], expected: usize) -> Result<Self, RosterError> {
        if raw.len() != expected {
            return Err(RosterError::InvalidDimension {
                expected,
                actual: raw.len(),
            });
        }
        Self::normalized(raw)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Cosine similarity in [-1, 1]. Both sides are unit length, so this is
    /// the plain dot product.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Cosine distance `1 - a·b` in [0, 2]. 0 = same direction.
    pub fn distance(&self, other: &Embedding) -> f32 {
        (1.0 - self.similarity(other)).clamp(0.0, 2.0)
    }
}

/// An enrolled person: stable code plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub code: String,
    pub name: String,
}

/// Identity listing row with the number of enrolled embeddings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySummary {
    pub code: String,
    pub name: String,
    pub embedding_count: usize,
}

/// One nearest-neighbor hit from an embedding store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub identity_code: String,
    /// Cosine distance to the query.
    pub distance: f32,
}

/// Rank `entries` by ascending distance to `query`, keeping at most `k`.
///
/// `entries` must be in insertion order: the sort is stable, so on equal
/// distance the earliest enrollment wins.
pub fn rank_neighbors<'e, I>(query: &Embedding, entries: I, k: usize) -> Vec<Neighbor>
where
    I: IntoIterator<Item = (&'e str, &'e Embedding)>,
{
    let mut scored: Vec<Neighbor> = entries
        .into_iter()
        .map(|(code, embedding)| Neighbor {
            identity_code: code.to_string(),
            distance: query.distance(embedding),
        })
        .collect();

    scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_has_unit_norm() {
        let e = Embedding::normalized(&[3.0, 4.0, 12.0]).unwrap();
        assert!((e.norm() - 1.0).abs() < NORM_TOLERANCE);
    }

    #[test]
    fn test_normalized_rejects_zero_vector() {
        assert!(matches!(
            Embedding::normalized(&[0.0, 0.0]),
            Err(RosterError::DegenerateEmbedding)
        ));
    }

    #[test]
    fn test_normalized_large_values_stay_unit() {
        let e = Embedding::normalized(&[1e20, 1e20, 0.0]).unwrap();
        assert!((e.norm() - 1.0).abs() < NORM_TOLERANCE);
        assert!((e.values()[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_normalized_tiny_values_accepted() {
        let e = Embedding::normalized(&[1e-25, 0.0, 0.0]).unwrap();
        assert_eq!(e.values(), &[1.0, 0.0, 0.0]);

        let mixed = Embedding::normalized(&[f32::MAX, -f32::MAX]).unwrap();
        assert!((mixed.norm() - 1.0).abs() < NORM_TOLERANCE);
    }

    #[test]
    fn test_normalized_rejects_nan() {
        assert!(Embedding::normalized(&[1.0, f32::NAN]).is_err());
        assert!(Embedding::normalized(&[]).is_err());
    }

    #[test]
    fn test_with_dimension_mismatch() {
        let err = Embedding::with_dimension(&[1.0, 0.0], 3).unwrap_err();
        assert!(err.is_validation());
        assert!(matches!(
            err,
            RosterError::InvalidDimension { expected: 3, actual: 2 }
        ));
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let e = Embedding::normalized(&[0.2, -0.7, 0.4, 0.1]).unwrap();
        assert!(e.distance(&e).abs() < 1e-6);
    }

    #[test]
    fn test_distance_orthogonal_and_opposite() {
        let a = Embedding::normalized(&[1.0, 0.0]).unwrap();
        let b = Embedding::normalized(&[0.0, 1.0]).unwrap();
        let c = Embedding::normalized(&[-2.0, 0.0]).unwrap();
        assert!((a.distance(&b) - 1.0).abs() < 1e-6);
        assert!((a.distance(&c) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_rank_neighbors_ties_keep_insertion_order() {
        let q = Embedding::normalized(&[1.0, 0.0]).unwrap();
        let first = Embedding::normalized(&[0.0, 1.0]).unwrap();
        let second = Embedding::normalized(&[0.0, -1.0]).unwrap();
        let near = Embedding::normalized(&[1.0, 0.1]).unwrap();
        let ranked = rank_neighbors(&q, [("A", &first), ("B", &second), ("C", &near)], 3);
        let codes: Vec<&str> = ranked.iter().map(|n| n.identity_code.as_str()).collect();
        assert_eq!(codes, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_rank_neighbors_truncates_to_k() {
        let q = Embedding::normalized(&[1.0, 0.0]).unwrap();
        let e = Embedding::normalized(&[1.0, 1.0]).unwrap();
        assert_eq!(rank_neighbors(&q, [("A", &e), ("B", &e)], 1).len(), 1);
        assert!(rank_neighbors(&q, [("A", &e)], 0).is_empty());
    }
}
