use anyhow::{bail, Context, Result};
use roster_core::{PipelineConfig, Schedule};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Optional TOML layer named by `ROSTER_CONFIG`. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    embedding_dim: Option<usize>,
    match_threshold: Option<f32>,
    liveness_threshold: Option<f32>,
    checkin_hour: Option<u32>,
    checkout_hour: Option<u32>,
}

/// CLI configuration: defaults, then the TOML file, then `ROSTER_*` env vars.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Fixed embedding dimension (512 for FaceNet / ArcFace).
    pub embedding_dim: usize,
    /// Maximum cosine distance for a positive match.
    pub match_threshold: f32,
    /// Minimum "real" score for score-based liveness signals.
    pub liveness_threshold: f32,
    /// Last hour (inclusive) that counts as an on-time check-in.
    pub checkin_hour: u32,
    /// First hour that counts as an on-time check-out.
    pub checkout_hour: u32,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = match env("ROSTER_CONFIG") {
            Some(path) => read_file(Path::new(&path))?,
            None => FileConfig::default(),
        };

        let db_path = env("ROSTER_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| default_data_dir(&env).join("roster.db"));

        let defaults = PipelineConfig::default();
        let config = Self {
            db_path,
            embedding_dim: env_parse(&env, "ROSTER_EMBEDDING_DIM")?
                .or(file.embedding_dim)
                .unwrap_or(512),
            match_threshold: env_parse(&env, "ROSTER_MATCH_THRESHOLD")?
                .or(file.match_threshold)
                .unwrap_or(defaults.match_threshold),
            liveness_threshold: env_parse(&env, "ROSTER_LIVENESS_THRESHOLD")?
                .or(file.liveness_threshold)
                .unwrap_or(defaults.liveness_threshold),
            checkin_hour: env_parse(&env, "ROSTER_CHECKIN_HOUR")?
                .or(file.checkin_hour)
                .unwrap_or(defaults.schedule.checkin_hour),
            checkout_hour: env_parse(&env, "ROSTER_CHECKOUT_HOUR")?
                .or(file.checkout_hour)
                .unwrap_or(defaults.schedule.checkout_hour),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.checkin_hour > 23 || self.checkout_hour > 23 {
            bail!(
                "check-in/check-out hours must be 0-23 (got {}/{})",
                self.checkin_hour,
                self.checkout_hour
            );
        }
        for (key, value) in [
            ("match threshold", self.match_threshold),
            ("liveness threshold", self.liveness_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{key} must be a finite, non-negative number (got {value})");
            }
        }
        if self.embedding_dim == 0 {
            bail!("embedding dimension must be positive");
        }
        Ok(())
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            match_threshold: self.match_threshold,
            liveness_threshold: self.liveness_threshold,
            schedule: Schedule {
                checkin_hour: self.checkin_hour,
                checkout_hour: self.checkout_hour,
            },
        }
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("roster")
}

/// `None` when unset; a set value that does not parse is an error.
fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match env(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().parse() {
            Ok(value) => Ok(Some(value)),
            Err(_) => bail!("invalid value for {key}: {raw:?}"),
        },
    }
}
