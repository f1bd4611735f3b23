//! Per-identity, per-day attendance state machine.
//!
//! `NoEvent -> CheckedIn -> CheckedOut`. The at-most-one-event-per-type-per-day
//! rule is enforced by the log's atomic [`AttendanceLog::append`], never by
//! reading the latest row first.

use crate::error::RosterError;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_CHECKIN_HOUR: u32 = 9;
pub const DEFAULT_CHECKOUT_HOUR: u32 = 18;
pub const DEFAULT_EVENT_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "checkin")]
    CheckIn,
    #[serde(rename = "checkout")]
    CheckOut,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CheckIn => "checkin",
            EventType::CheckOut => "checkout",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = RosterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkin" => Ok(EventType::CheckIn),
            "checkout" => Ok(EventType::CheckOut),
            other => Err(RosterError::InvalidLabel(format!("event type {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Punctuality {
    Present,
    Late,
    Early,
    /// Status of a row whose label this build does not recognize.
    Unknown,
}

impl Punctuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Punctuality::Present => "present",
            Punctuality::Late => "late",
            Punctuality::Early => "early",
            Punctuality::Unknown => "unknown",
        }
    }

    /// Decode a stored status. Unrecognized labels map to `Unknown`.
    pub fn from_stored(s: &str) -> Self {
        s.parse().unwrap_or(Punctuality::Unknown)
    }
}

impl fmt::Display for Punctuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Punctuality {
    type Err = RosterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(Punctuality::Present),
            "late" => Ok(Punctuality::Late),
            "early" => Ok(Punctuality::Early),
            "unknown" => Ok(Punctuality::Unknown),
            other => Err(RosterError::InvalidLabel(format!("punctuality {other:?}"))),
        }
    }
}

/// Configured working hours.
///
/// Comparisons use the hour only: a check-in at 09:59 with `checkin_hour = 9`
/// is still `present`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub checkin_hour: u32,
    pub checkout_hour: u32,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            checkin_hour: DEFAULT_CHECKIN_HOUR,
            checkout_hour: DEFAULT_CHECKOUT_HOUR,
        }
    }
}

impl Schedule {
    pub fn punctuality(&self, event_type: EventType, at: NaiveDateTime) -> Punctuality {
        let hour = at.hour();
        match event_type {
            EventType::CheckIn if hour <= self.checkin_hour => Punctuality::Present,
            EventType::CheckIn => Punctuality::Late,
            EventType::CheckOut if hour >= self.checkout_hour => Punctuality::Present,
            EventType::CheckOut => Punctuality::Early,
        }
    }
}

/// An appended attendance record. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub identity_code: String,
    pub occurred_at: NaiveDateTime,
    pub event_type: EventType,
    pub punctuality: Punctuality,
}

impl AttendanceEvent {
    /// Calendar day the event counts against.
    pub fn day(&self) -> NaiveDate {
        self.occurred_at.date()
    }
}

/// What the state machine expects next for an identity on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextEvent {
    CheckIn,
    CheckOut,
    /// Checked out already. No implicit second cycle is started.
    DayComplete,
}

impl NextEvent {
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            NextEvent::CheckIn => Some(EventType::CheckIn),
            NextEvent::CheckOut => Some(EventType::CheckOut),
            NextEvent::DayComplete => None,
        }
    }
}

/// Result of an atomic conditional insert into the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// An event with the same (identity, day, event type) already exists.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded(AttendanceEvent),
    Duplicate,
}

/// Query for [`AttendanceLog::events`]. Results are newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub day: Option<NaiveDate>,
    pub identity_code: Option<String>,
    pub punctuality: Option<Punctuality>,
    pub limit: usize,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            day: None,
            identity_code: None,
            punctuality: None,
            limit: DEFAULT_EVENT_LIMIT,
        }
    }
}

impl EventFilter {
    pub fn matches(&self, event: &AttendanceEvent) -> bool {
        self.day.map_or(true, |d| event.day() == d)
            && self
                .identity_code
                .as_deref()
                .map_or(true, |c| event.identity_code == c)
            && self.punctuality.map_or(true, |p| event.punctuality == p)
    }
}

/// Append-only attendance log.
///
/// `append` must perform the duplicate check and the insert as one atomic
/// step, keyed on (identity, day, event type).
pub trait AttendanceLog: Send + Sync {
    /// Latest event for `identity_code` on `day`, by time (then insertion).
    fn latest_on(
        &self,
        identity_code: &str,
        day: NaiveDate,
    ) -> Result<Option<AttendanceEvent>, RosterError>;

    fn append(&self, event: &AttendanceEvent) -> Result<AppendOutcome, RosterError>;

    fn events(&self, filter: &EventFilter) -> Result<Vec<AttendanceEvent>, RosterError>;
}

/// The state machine over an [`AttendanceLog`].
#[derive(Clone, Copy)]
pub struct AttendanceBook<'a> {
    log: &'a dyn AttendanceLog,
    schedule: Schedule,
}

impl<'a> AttendanceBook<'a> {
    pub fn new(log: &'a dyn AttendanceLog, schedule: Schedule) -> Self {
        Self { log, schedule }
    }

    pub fn determine_next_type(
        &self,
        identity_code: &str,
        day: NaiveDate,
    ) -> Result<NextEvent, RosterError> {
        let next = match self.log.latest_on(identity_code, day)? {
            None => NextEvent::CheckIn,
            Some(e) if e.event_type == EventType::CheckIn => NextEvent::CheckOut,
            Some(_) => NextEvent::DayComplete,
        };
        Ok(next)
    }

    /// Stamp punctuality and append. `Duplicate` when the slot is taken.
    pub fn record(
        &self,
        identity_code: &str,
        event_type: EventType,
        now: NaiveDateTime,
    ) -> Result<RecordOutcome, RosterError> {
        let occurred_at = now.with_nanosecond(0).unwrap_or(now);
        let event = AttendanceEvent {
            identity_code: identity_code.to_string(),
            occurred_at,
            event_type,
            punctuality: self.schedule.punctuality(event_type, occurred_at),
        };

        match self.log.append(&event)? {
            AppendOutcome::Inserted => {
                tracing::info!(
                    identity = identity_code,
                    event_type = %event_type,
                    punctuality = %event.punctuality,
                    at = %occurred_at,
                    "attendance recorded"
                );
                Ok(RecordOutcome::Recorded(event))
            }
            AppendOutcome::Duplicate => {
                tracing::debug!(
                    identity = identity_code,
                    event_type = %event_type,
                    day = %occurred_at.date(),
                    "attendance already recorded"
                );
                Ok(RecordOutcome::Duplicate)
            }
        }
    }
}
