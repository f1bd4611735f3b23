//! Daily attendance summary for dashboards and reports.

use crate::attendance::{AttendanceEvent, AttendanceLog, EventFilter, EventType, Punctuality};
use crate::error::RosterError;
use crate::store::EmbeddingStore;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;

/// Number of latest events listed in a summary.
pub const RECENT_EVENTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySummary {
    pub day: NaiveDate,
    pub total_identities: usize,
    pub checked_in: usize,
    pub checked_out: usize,
    /// Check-ins stamped `late` when recorded.
    pub late: usize,
    /// Check-outs stamped `early` when recorded.
    pub early: usize,
    /// Enrolled identities without a check-in on `day`.
    pub absent: usize,
    /// Latest events across all days, newest first.
    pub recent: Vec<AttendanceEvent>,
}

pub fn daily_summary(
    store: &dyn EmbeddingStore,
    log: &dyn AttendanceLog,
    day: NaiveDate,
) -> Result<DailySummary, RosterError> {
    let total_identities = store.identities()?.len();
    let events = log.events(&EventFilter {
        day: Some(day),
        limit: usize::MAX,
        ..EventFilter::default()
    })?;

    let distinct = |event_type: EventType, status: Option<Punctuality>| {
        events
            .iter()
            .filter(|e| e.event_type == event_type)
            .filter(|e| status.map_or(true, |s| e.punctuality == s))
            .map(|e| e.identity_code.as_str())
            .collect::<HashSet<_>>()
            .len()
    };

    let checked_in = distinct(EventType::CheckIn, None);
    Ok(DailySummary {
        day,
        total_identities,
        checked_in,
        checked_out: distinct(EventType::CheckOut, None),
        late: distinct(EventType::CheckIn, Some(Punctuality::Late)),
        early: distinct(EventType::CheckOut, Some(Punctuality::Early)),
        absent: total_identities.saturating_sub(checked_in),
        recent: log.events(&EventFilter {
            limit: RECENT_EVENTS,
            ..EventFilter::default()
        })?,
    })
}
