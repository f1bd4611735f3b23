//! roster-core — Attendance decision engine.
//!
//! Matches face embeddings against enrolled identities, gates every match
//! behind a liveness signal, and runs the per-identity, per-day check-in /
//! check-out state machine. Detection, embedding and liveness models live
//! outside this crate; only their numeric outputs are consumed here.

pub mod attendance;
pub mod clock;
pub mod error;
pub mod liveness;
pub mod matcher;
pub mod pipeline;
pub mod store;
pub mod summary;
pub mod types;

pub use attendance::{
    AppendOutcome, AttendanceBook, AttendanceEvent, AttendanceLog, EventFilter, EventType,
    NextEvent, Punctuality, RecordOutcome, Schedule,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::RosterError;
pub use liveness::{LivenessGate, LivenessLabel, LivenessSignal};
pub use matcher::{CosineMatcher, MatchOutcome};
pub use pipeline::{FaceObservation, Pipeline, PipelineConfig, Verdict, VerdictStatus};
pub use store::{EmbeddingStore, MemoryAttendanceLog, MemoryEmbeddingStore};
pub use summary::{daily_summary, DailySummary};
pub use types::{Embedding, Identity, IdentitySummary, Neighbor};
