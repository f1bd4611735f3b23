//! Nearest-neighbor recognition over an [`EmbeddingStore`].

use crate::error::RosterError;
use crate::store::EmbeddingStore;

/// Default maximum cosine distance for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.7;

/// Label reported for a face that matched no one.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Result of matching a query embedding. A miss is a normal outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Found {
        identity_code: String,
        distance: f32,
        /// `1 - distance`.
        confidence: f32,
    },
    NotFound {
        /// Distance to the nearest entry, if the store had any.
        distance: Option<f32>,
    },
}

impl MatchOutcome {
    pub fn identity_code(&self) -> Option<&str> {
        match self {
            MatchOutcome::Found { identity_code, .. } => Some(identity_code),
            MatchOutcome::NotFound { .. } => None,
        }
    }

    pub fn distance(&self) -> Option<f32> {
        match self {
            MatchOutcome::Found { distance, .. } => Some(*distance),
            MatchOutcome::NotFound { distance } => *distance,
        }
    }

    /// Identity code, or `"Unknown"`.
    pub fn label(&self) -> &str {
        self.identity_code().unwrap_or(UNKNOWN_LABEL)
    }
}

/// Cosine-distance matcher: accept the single nearest neighbor when its
/// distance is at most `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct CosineMatcher {
    threshold: f32,
}

impl Default for CosineMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl CosineMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Read-only: queries the store once, never retries.
    pub fn recognize(
        &self,
        store: &dyn EmbeddingStore,
        query: &[f32],
    ) -> Result<MatchOutcome, RosterError> {
        let nearest = store.nearest(query, 1)?.into_iter().next();

        let outcome = match nearest {
            Some(n) if n.distance <= self.threshold => MatchOutcome::Found {
                confidence: 1.0 - n.distance,
                distance: n.distance,
                identity_code: n.identity_code,
            },
            Some(n) => MatchOutcome::NotFound {
                distance: Some(n.distance),
            },
            None => MatchOutcome::NotFound { distance: None },
        };

        tracing::debug!(
            label = outcome.label(),
            distance = ?outcome.distance(),
            threshold = self.threshold,
            "recognition"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEmbeddingStore;
    use crate::types::Identity;

    fn store_with(entries: &[(&str, [f32; 3])]) -> MemoryEmbeddingStore {
        let store = MemoryEmbeddingStore::new(3);
        for (code, values) in entries {
            store
                .upsert_identity(&Identity { code: code.to_string(), name: code.to_string() })
                .unwrap();
            store.add(code, values).unwrap();
        }
        store
    }

    #[test]
    fn test_self_query_exact_match() {
        let e = [0.6, 0.0, 0.8];
        let store = store_with(&[("E001", e)]);
        let outcome = CosineMatcher::default().recognize(&store, &e).unwrap();

        let MatchOutcome::Found { identity_code, distance, confidence } = outcome else {
            panic!("expected a match");
        };
        assert_eq!(identity_code, "E001");
        assert!(distance.abs() < 1e-6);
        assert!((confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_store_is_unknown() {
        let store = MemoryEmbeddingStore::new(3);
        let outcome = CosineMatcher::default().recognize(&store, &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(outcome, MatchOutcome::NotFound { distance: None });
        assert_eq!(outcome.label(), UNKNOWN_LABEL);
    }

    #[test]
    fn test_beyond_threshold_reports_distance() {
        let store = store_with(&[("E001", [0.0, 1.0, 0.0])]);
        let outcome = CosineMatcher::new(0.5).recognize(&store, &[1.0, 0.0, 0.0]).unwrap();
        assert!(outcome.identity_code().is_none());
        assert!((outcome.distance().unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // Orthogonal vectors sit at distance exactly 1.0.
        let store = store_with(&[("E001", [0.0, 1.0, 0.0])]);
        let outcome = CosineMatcher::new(1.0).recognize(&store, &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(outcome.identity_code(), Some("E001"));
    }

    #[test]
    fn test_recognize_is_deterministic() {
        let store = store_with(&[
            ("E001", [1.0, 0.2, 0.0]),
            ("E002", [0.9, 0.1, 0.3]),
            ("E003", [0.0, 0.0, 1.0]),
        ]);
        let matcher = CosineMatcher::default();
        let query = [0.95, 0.15, 0.1];
        let first = matcher.recognize(&store, &query).unwrap();
        for _ in 0..10 {
            assert_eq!(matcher.recognize(&store, &query).unwrap(), first);
        }
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let store = store_with(&[("E001", [1.0, 0.0, 0.0])]);
        let err = CosineMatcher::default().recognize(&store, &[1.0, 0.0]).unwrap_err();
        assert!(err.is_validation());
    }
}
