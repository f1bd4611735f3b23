/// Database schema. Idempotent; applied on every open.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS identities (
    code TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- id order is enrollment order; nearest() breaks distance ties on it.
CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_code TEXT NOT NULL REFERENCES identities(code) ON DELETE CASCADE,
    vector BLOB NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_embeddings_identity ON embeddings(identity_code);

-- Append-only. identity_code is not a foreign key: history outlives enrollment.
CREATE TABLE IF NOT EXISTS attendance_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_code TEXT NOT NULL,
    day TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    event_type TEXT NOT NULL,
    punctuality TEXT NOT NULL,
    UNIQUE (identity_code, day, event_type)
);

CREATE INDEX IF NOT EXISTS idx_attendance_day ON attendance_events(day);
"#;
