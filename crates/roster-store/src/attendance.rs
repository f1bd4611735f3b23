//! Attendance log on the `attendance_events` table.

use crate::{db_err, SqliteStore};
use chrono::{NaiveDate, NaiveDateTime};
use roster_core::{
    AppendOutcome, AttendanceEvent, AttendanceLog, EventFilter, EventType, Punctuality,
    RosterError,
};
use rusqlite::types::Value;
use rusqlite::{ffi, params, params_from_iter, OptionalExtension, Row};

const DAY_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SELECT_EVENTS: &str =
    "SELECT identity_code, occurred_at, event_type, punctuality FROM attendance_events";

/// Raw text columns, decoded after the statement is done.
struct EventRow {
    identity_code: String,
    occurred_at: String,
    event_type: String,
    punctuality: String,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            identity_code: row.get(0)?,
            occurred_at: row.get(1)?,
            event_type: row.get(2)?,
            punctuality: row.get(3)?,
        })
    }

    fn decode(self) -> Result<AttendanceEvent, RosterError> {
        let occurred_at = NaiveDateTime::parse_from_str(&self.occurred_at, TIME_FORMAT)
            .map_err(|e| {
                RosterError::CorruptRecord(format!("timestamp {:?}: {e}", self.occurred_at))
            })?;
        let event_type = self.event_type.parse::<EventType>().map_err(|_| {
            RosterError::CorruptRecord(format!("event type {:?}", self.event_type))
        })?;
        Ok(AttendanceEvent {
            identity_code: self.identity_code,
            occurred_at,
            event_type,
            punctuality: Punctuality::from_stored(&self.punctuality),
        })
    }
}

fn day_key(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

impl AttendanceLog for SqliteStore {
    fn latest_on(
        &self,
        identity_code: &str,
        day: NaiveDate,
    ) -> Result<Option<AttendanceEvent>, RosterError> {
        let row = self
            .conn()?
            .query_row(
                &format!(
                    "{SELECT_EVENTS} WHERE identity_code = ?1 AND day = ?2 \
                     ORDER BY occurred_at DESC, id DESC LIMIT 1"
                ),
                params![identity_code, day_key(day)],
                EventRow::from_row,
            )
            .optional()
            .map_err(db_err)?;
        row.map(EventRow::decode).transpose()
    }

    /// Single INSERT guarded by `UNIQUE(identity_code, day, event_type)`;
    /// the uniqueness violation is the duplicate signal.
    fn append(&self, event: &AttendanceEvent) -> Result<AppendOutcome, RosterError> {
        let result = self.conn()?.execute(
            r#"
            INSERT INTO attendance_events (identity_code, day, occurred_at, event_type, punctuality)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                event.identity_code,
                day_key(event.day()),
                event.occurred_at.format(TIME_FORMAT).to_string(),
                event.event_type.as_str(),
                event.punctuality.as_str(),
            ],
        );

        match result {
            Ok(_) => Ok(AppendOutcome::Inserted),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Ok(AppendOutcome::Duplicate)
            }
            Err(e) => {
                tracing::warn!(
                    identity = %event.identity_code,
                    error = %e,
                    "attendance insert failed"
                );
                Err(db_err(e))
            }
        }
    }

    fn events(&self, filter: &EventFilter) -> Result<Vec<AttendanceEvent>, RosterError> {
        let mut sql = format!("{SELECT_EVENTS} WHERE 1=1");
        let mut values: Vec<Value> = Vec::new();

        if let Some(day) = filter.day {
            sql.push_str(" AND day = ?");
            values.push(Value::Text(day_key(day)));
        }
        if let Some(code) = &filter.identity_code {
            sql.push_str(" AND identity_code = ?");
            values.push(Value::Text(code.clone()));
        }
        if let Some(status) = filter.punctuality {
            sql.push_str(" AND punctuality = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        sql.push_str(" ORDER BY occurred_at DESC, id DESC LIMIT ?");
        values.push(Value::Integer(
            i64::try_from(filter.limit).unwrap_or(i64::MAX),
        ));

        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), EventRow::from_row)
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            rows
        };

        rows.into_iter().map(EventRow::decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::{
        AttendanceBook, Clock, EmbeddingStore, FaceObservation, FixedClock, Identity,
        LivenessLabel, LivenessSignal, NextEvent, Pipeline, PipelineConfig, RecordOutcome,
        Schedule, VerdictStatus,
    };

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_duplicate_checkin_single_row() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let book = AttendanceBook::new(&store, Schedule::default());

        assert!(matches!(
            book.record("E001", EventType::CheckIn, at(4, 8, 0)).unwrap(),
            RecordOutcome::Recorded(_)
        ));
        assert_eq!(
            book.record("E001", EventType::CheckIn, at(4, 12, 0)).unwrap(),
            RecordOutcome::Duplicate
        );
        assert_eq!(store.events(&EventFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_next_type_after_checkin_is_checkout() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let book = AttendanceBook::new(&store, Schedule::default());
        let today = at(4, 0, 0).date();

        book.record("E001", EventType::CheckIn, at(4, 9, 0)).unwrap();
        assert_eq!(book.determine_next_type("E001", today).unwrap(), NextEvent::CheckOut);
        assert_eq!(book.determine_next_type("E002", today).unwrap(), NextEvent::CheckIn);

        book.record("E001", EventType::CheckOut, at(4, 18, 30)).unwrap();
        assert_eq!(book.determine_next_type("E001", today).unwrap(), NextEvent::DayComplete);
    }

    #[test]
    fn test_concurrent_record_one_winner() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let book = AttendanceBook::new(&store, Schedule::default());
        let now = at(4, 8, 30);

        let outcomes: Vec<RecordOutcome> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| s.spawn(move || book.record("E001", EventType::CheckIn, now).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(
            outcomes.iter().filter(|o| matches!(o, RecordOutcome::Recorded(_))).count(),
            1
        );
        assert!(outcomes.contains(&RecordOutcome::Duplicate));
    }

    #[test]
    fn test_events_filtering_and_roundtrip() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let book = AttendanceBook::new(&store, Schedule::default());
        book.record("E001", EventType::CheckIn, at(4, 8, 0)).unwrap();
        book.record("E002", EventType::CheckIn, at(4, 10, 30)).unwrap();
        book.record("E001", EventType::CheckOut, at(4, 17, 0)).unwrap();
        book.record("E001", EventType::CheckIn, at(5, 11, 0)).unwrap();

        let day4 = store
            .events(&EventFilter { day: Some(at(4, 0, 0).date()), ..EventFilter::default() })
            .unwrap();
        assert_eq!(day4.len(), 3);
        assert_eq!(day4[0].event_type, EventType::CheckOut);
        assert_eq!(day4[0].occurred_at, at(4, 17, 0));
        assert_eq!(day4[0].punctuality, Punctuality::Early);

        let late = store
            .events(&EventFilter { punctuality: Some(Punctuality::Late), ..EventFilter::default() })
            .unwrap();
        let codes: Vec<&str> = late.iter().map(|e| e.identity_code.as_str()).collect();
        assert_eq!(codes, vec!["E001", "E002"]);

        let limited = store
            .events(&EventFilter { limit: 1, ..EventFilter::default() })
            .unwrap();
        assert_eq!(limited[0].occurred_at, at(5, 11, 0));
    }

    #[test]
    fn test_unrecognized_status_reads_as_unknown() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO attendance_events \
                 (identity_code, day, occurred_at, event_type, punctuality) \
                 VALUES ('E001', '2024-03-04', '2024-03-04 09:10:00', 'checkin', 'Có mặt')",
                [],
            )
            .unwrap();
        let latest = store.latest_on("E001", at(4, 0, 0).date()).unwrap().unwrap();
        assert_eq!(latest.punctuality, Punctuality::Unknown);
    }

    #[test]
    fn test_unrecognized_event_type_is_corrupt() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO attendance_events \
                 (identity_code, day, occurred_at, event_type, punctuality) \
                 VALUES ('E001', '2024-03-04', '2024-03-04 12:00:00', 'lunch', 'present')",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.latest_on("E001", at(4, 0, 0).date()),
            Err(RosterError::CorruptRecord(_))
        ));
    }

    #[test]
    fn test_bad_timestamp_is_corrupt() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO attendance_events \
                 (identity_code, day, occurred_at, event_type, punctuality) \
                 VALUES ('E001', '2024-03-04', 'yesterday', 'checkin', 'present')",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.events(&EventFilter::default()),
            Err(RosterError::CorruptRecord(_))
        ));
    }

    #[test]
    fn test_pipeline_on_sqlite() {
        let store = SqliteStore::open_in_memory(3).unwrap();
        store
            .upsert_identity(&Identity { code: "E001".into(), name: "Ann".into() })
            .unwrap();
        store.add("E001", &[0.0, 0.6, 0.8]).unwrap();

        let clock = FixedClock(at(4, 9, 45));
        let pipeline = Pipeline::new(&store, &store, &clock, PipelineConfig::default());
        let face = |label| FaceObservation {
            embedding: vec![0.0, 0.6, 0.8],
            liveness: LivenessSignal::Label(label),
        };

        let v = pipeline.process_frame(&[face(LivenessLabel::Fake), face(LivenessLabel::Real)]);
        assert_eq!(v[0].status, VerdictStatus::Fake);
        assert_eq!(v[1].status, VerdictStatus::Ok);
        assert_eq!(v[1].punctuality, Some(Punctuality::Present));

        let events = store.events(&EventFilter::default()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].occurred_at, clock.now());
    }
}
