//! Per-frame orchestration: liveness, then recognition, then attendance.

use crate::attendance::{
    AttendanceBook, AttendanceLog, EventType, Punctuality, RecordOutcome, Schedule,
};
use crate::clock::Clock;
use crate::error::RosterError;
use crate::liveness::{LivenessGate, LivenessSignal, DEFAULT_LIVENESS_THRESHOLD};
use crate::matcher::{CosineMatcher, MatchOutcome, DEFAULT_MATCH_THRESHOLD};
use crate::store::EmbeddingStore;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One detected face, as produced by the external detection, embedding and
/// liveness models.
#[derive(Debug, Clone, Deserialize)]
pub struct FaceObservation {
    pub embedding: Vec<f32>,
    pub liveness: LivenessSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Ok,
    Fake,
    Unknown,
    AlreadyRecorded,
    Error,
}

/// Per-face outcome of [`Pipeline::process_frame`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub identity_code: Option<String>,
    pub event_type: Option<EventType>,
    pub punctuality: Option<Punctuality>,
    pub distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Verdict {
    fn bare(status: VerdictStatus) -> Self {
        Self {
            status,
            identity_code: None,
            event_type: None,
            punctuality: None,
            distance: None,
            message: None,
        }
    }

    fn failed(err: &RosterError) -> Self {
        Self {
            message: Some(err.to_string()),
            ..Self::bare(VerdictStatus::Error)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Maximum cosine distance for a match.
    pub match_threshold: f32,
    /// Minimum "real" score for score-based liveness signals.
    pub liveness_threshold: f32,
    pub schedule: Schedule,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            liveness_threshold: DEFAULT_LIVENESS_THRESHOLD,
            schedule: Schedule::default(),
        }
    }
}

/// Recognition pipeline over injected store, log and clock.
///
/// Holds only shared references, so one instance can serve concurrent
/// callers; the log's atomic append keeps attendance consistent.
pub struct Pipeline<'a> {
    store: &'a dyn EmbeddingStore,
    clock: &'a dyn Clock,
    gate: LivenessGate,
    matcher: CosineMatcher,
    book: AttendanceBook<'a>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a dyn EmbeddingStore,
        log: &'a dyn AttendanceLog,
        clock: &'a dyn Clock,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            clock,
            gate: LivenessGate::new(config.liveness_threshold),
            matcher: CosineMatcher::new(config.match_threshold),
            book: AttendanceBook::new(log, config.schedule),
        }
    }

    /// One verdict per face, in input order. Faces are independent: an
    /// error on one face is reported in its verdict and the rest still run.
    pub fn process_frame(&self, faces: &[FaceObservation]) -> Vec<Verdict> {
        let now = self.clock.now();
        faces
            .iter()
            .enumerate()
            .map(|(index, face)| {
                self.process_face(face, now).unwrap_or_else(|err| {
                    tracing::warn!(face = index, error = %err, "face processing failed");
                    Verdict::failed(&err)
                })
            })
            .collect()
    }

    pub fn process_face(
        &self,
        face: &FaceObservation,
        now: NaiveDateTime,
    ) -> Result<Verdict, RosterError> {
        if !self.gate.accepts(&face.liveness) {
            tracing::warn!(liveness = ?face.liveness, "liveness rejected; face treated as spoof");
            return Ok(Verdict::bare(VerdictStatus::Fake));
        }

        let (identity_code, distance) = match self.matcher.recognize(self.store, &face.embedding)? {
            MatchOutcome::Found {
                identity_code,
                distance,
                ..
            } => (identity_code, distance),
            MatchOutcome::NotFound { distance } => {
                return Ok(Verdict {
                    distance,
                    ..Verdict::bare(VerdictStatus::Unknown)
                });
            }
        };

        let matched = |status: VerdictStatus,
                       event_type: Option<EventType>,
                       punctuality: Option<Punctuality>| Verdict {
            status,
            identity_code: Some(identity_code.clone()),
            event_type,
            punctuality,
            distance: Some(distance),
            message: None,
        };

        let next = self.book.determine_next_type(&identity_code, now.date())?;
        let Some(event_type) = next.event_type() else {
            tracing::debug!(identity = %identity_code, "day already complete");
            return Ok(matched(
                VerdictStatus::AlreadyRecorded,
                Some(EventType::CheckOut),
                None,
            ));
        };

        let verdict = match self.book.record(&identity_code, event_type, now)? {
            RecordOutcome::Recorded(event) => {
                matched(VerdictStatus::Ok, Some(event_type), Some(event.punctuality))
            }
            RecordOutcome::Duplicate => {
                matched(VerdictStatus::AlreadyRecorded, Some(event_type), None)
            }
        };
        Ok(verdict)
    }
}
