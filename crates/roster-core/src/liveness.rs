//! Liveness gate: decides whether a detected face may be trusted at all.
//!
//! A rejected face never reaches recognition, so a photo or replay of an
//! enrolled employee cannot produce an attendance record.

use serde::{Deserialize, Serialize};

/// Default minimum "real" probability for score-based signals.
pub const DEFAULT_LIVENESS_THRESHOLD: f32 = 0.5;

/// Class index of "real" in a two-class classifier output `[fake, real]`.
const REAL_CLASS_INDEX: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessLabel {
    Real,
    Fake,
}

/// Upstream classifier output for one face.
///
/// In JSON: `"real"` / `"fake"`, a bare number, or a probability array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LivenessSignal {
    Label(LivenessLabel),
    /// Probability that the face is real.
    Score(f32),
    /// Softmax output ordered `[fake, real]`.
    Probabilities(Vec<f32>),
}

#[derive(Debug, Clone, Copy)]
pub struct LivenessGate {
    score_threshold: f32,
}

impl Default for LivenessGate {
    fn default() -> Self {
        Self::new(DEFAULT_LIVENESS_THRESHOLD)
    }
}

impl LivenessGate {
    pub fn new(score_threshold: f32) -> Self {
        Self { score_threshold }
    }

    pub fn accepts(&self, signal: &LivenessSignal) -> bool {
        match signal {
            LivenessSignal::Label(label) => *label == LivenessLabel::Real,
            LivenessSignal::Score(score) => score.is_finite() && *score > self.score_threshold,
            LivenessSignal::Probabilities(probs) => argmax(probs) == Some(REAL_CLASS_INDEX),
        }
    }
}

/// Index of the first strict maximum. `None` for empty or NaN-only input.
fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        let gate = LivenessGate::default();
        assert!(gate.accepts(&LivenessSignal::Label(LivenessLabel::Real)));
        assert!(!gate.accepts(&LivenessSignal::Label(LivenessLabel::Fake)));
    }

    #[test]
    fn test_score_must_exceed_threshold() {
        let gate = LivenessGate::new(0.8);
        assert!(gate.accepts(&LivenessSignal::Score(0.81)));
        assert!(!gate.accepts(&LivenessSignal::Score(0.8)));
        assert!(!gate.accepts(&LivenessSignal::Score(f32::NAN)));
    }

    #[test]
    fn test_probabilities_argmax() {
        let gate = LivenessGate::default();
        assert!(gate.accepts(&LivenessSignal::Probabilities(vec![0.1, 0.9])));
        assert!(!gate.accepts(&LivenessSignal::Probabilities(vec![0.9, 0.1])));
        // Ties resolve to the first class (fake).
        assert!(!gate.accepts(&LivenessSignal::Probabilities(vec![0.5, 0.5])));
        assert!(!gate.accepts(&LivenessSignal::Probabilities(vec![])));
    }

    #[test]
    fn test_signal_json_forms() {
        let label: LivenessSignal = serde_json::from_str("\"real\"").unwrap();
        assert_eq!(label, LivenessSignal::Label(LivenessLabel::Real));
        let score: LivenessSignal = serde_json::from_str("0.93").unwrap();
        assert_eq!(score, LivenessSignal::Score(0.93));
        let probs: LivenessSignal = serde_json::from_str("[0.2, 0.8]").unwrap();
        assert_eq!(probs, LivenessSignal::Probabilities(vec![0.2, 0.8]));
    }
}
