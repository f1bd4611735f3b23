use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use roster_core::{
    daily_summary, AttendanceBook, AttendanceEvent, AttendanceLog, Clock, EmbeddingStore,
    EventFilter, EventType, FaceObservation, Identity, NextEvent, Pipeline, Punctuality,
    RecordOutcome, SystemClock, VerdictStatus,
};
use roster_store::SqliteStore;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "roster", about = "Face-recognition attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll (or add embeddings to) an identity
    Enroll {
        /// Stable identity code (e.g., "E001")
        #[arg(short, long)]
        code: String,
        /// Display name
        #[arg(short, long)]
        name: String,
        /// JSON files, each holding one embedding as an array of floats
        #[arg(required = true)]
        embeddings: Vec<PathBuf>,
    },
    /// Run one frame of detected faces through the pipeline ("-" reads stdin)
    Recognize { frame: PathBuf },
    /// Record a check-in or check-out by hand, stamped with the current time
    Record {
        code: String,
        /// checkin or checkout
        #[arg(long = "type")]
        event_type: EventType,
    },
    /// Show the next expected event for an identity
    Next {
        code: String,
        /// Day to check (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List attendance events, newest first
    Log {
        #[arg(long)]
        date: Option<NaiveDate>,
        /// present, late, early or unknown
        #[arg(long)]
        status: Option<Punctuality>,
        #[arg(long)]
        code: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Daily attendance summary
    Stats {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List enrolled identities
    Identities,
}

/// Input to `recognize`: the faces found in one camera frame.
#[derive(Deserialize)]
struct Frame {
    faces: Vec<FaceObservation>,
}

#[derive(Serialize)]
struct EnrollReport<'a> {
    code: &'a str,
    added: usize,
}

#[derive(Serialize)]
struct RecordReport<'a> {
    status: VerdictStatus,
    identity_code: &'a str,
    event_type: EventType,
    event: Option<AttendanceEvent>,
}

#[derive(Serialize)]
struct NextReport<'a> {
    identity_code: &'a str,
    day: NaiveDate,
    next: &'static str,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing::debug!(?config, "configuration loaded");

    let store = SqliteStore::open(&config.db_path, config.embedding_dim)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let today = || Local::now().date_naive();

    match cli.command {
        Commands::Enroll {
            code,
            name,
            embeddings,
        } => {
            print_json(&enroll(&store, &code, name, &embeddings)?)?;
        }
        Commands::Recognize { frame } => {
            let frame: Frame = read_json(&frame)?;
            let clock = SystemClock;
            let pipeline = Pipeline::new(&store, &store, &clock, config.pipeline());
            let verdicts = pipeline.process_frame(&frame.faces);
            print_json(&verdicts)?;
        }
        Commands::Record { code, event_type } => {
            let book = AttendanceBook::new(&store, config.pipeline().schedule);
            print_json(&record(&book, &code, event_type, SystemClock.now())?)?;
        }
        Commands::Next { code, date } => {
            let day = date.unwrap_or_else(today);
            let book = AttendanceBook::new(&store, config.pipeline().schedule);
            let next = match book.determine_next_type(&code, day)? {
                NextEvent::CheckIn => "checkin",
                NextEvent::CheckOut => "checkout",
                NextEvent::DayComplete => "complete",
            };
            print_json(&NextReport {
                identity_code: &code,
                day,
                next,
            })?;
        }
        Commands::Log {
            date,
            status,
            code,
            limit,
        } => {
            let events = store.events(&EventFilter {
                day: date,
                identity_code: code,
                punctuality: status,
                limit,
            })?;
            print_json(&events)?;
        }
        Commands::Stats { date } => {
            let summary = daily_summary(&store, &store, date.unwrap_or_else(today))?;
            print_json(&summary)?;
        }
        Commands::Identities => {
            print_json(&store.identities()?)?;
        }
    }

    Ok(())
}

/// Reads every embedding file before touching the store, so a bad file leaves it unchanged.
fn enroll<'a>(
    store: &dyn EmbeddingStore,
    code: &'a str,
    name: String,
    paths: &[PathBuf],
) -> Result<EnrollReport<'a>> {
    let vectors = paths
        .iter()
        .map(|path| read_json::<Vec<f32>>(path))
        .collect::<Result<Vec<_>>>()?;
    let identity = Identity {
        code: code.to_string(),
        name,
    };
    let added = store
        .enroll(&identity, &vectors)
        .with_context(|| format!("enrolling {code}"))?;
    Ok(EnrollReport { code, added })
}

fn record<'a>(
    book: &AttendanceBook<'_>,
    code: &'a str,
    event_type: EventType,
    now: NaiveDateTime,
) -> Result<RecordReport<'a>> {
    let (status, event) = match book.record(code, event_type, now)? {
        RecordOutcome::Recorded(event) => (VerdictStatus::Ok, Some(event)),
        RecordOutcome::Duplicate => (VerdictStatus::AlreadyRecorded, None),
    };
    Ok(RecordReport {
        status,
        identity_code: code,
        event_type,
        event,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
