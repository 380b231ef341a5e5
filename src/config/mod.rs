//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on malformed values. An optional
//! TOML file named by `WORKPOOL_CONFIG` can override partition names and
//! reclamation settings:
//!
//! ```toml
//! [partitions]
//! pending = "A"
//! in_progress = "B"
//! completed = "C"
//!
//! [reclaim]
//! interval_secs = 60
//! max_age_secs = 600
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::Partition;
use crate::queue::Partitions;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub partitions: Partitions,
    pub reclaim_interval: Duration,
    pub reclaim_max_age: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// Shape of the optional TOML file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    partitions: FilePartitions,
    #[serde(default)]
    reclaim: FileReclaim,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilePartitions {
    pending: Option<Partition>,
    in_progress: Option<Partition>,
    completed: Option<Partition>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileReclaim {
    interval_secs: Option<u64>,
    max_age_secs: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            db_path: std::env::var("WORKPOOL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("pool.redb")),
            partitions: Partitions::default(),
            reclaim_interval: Duration::from_secs(secs_var("RECLAIM_INTERVAL_SECS", 60)?),
            reclaim_max_age: Duration::from_secs(secs_var("RECLAIM_MAX_AGE_SECS", 600)?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };

        if let Ok(path) = std::env::var("WORKPOOL_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }
        if config.reclaim_interval.is_zero() {
            return Err(Error::Config("reclaim interval must be positive".to_string()));
        }
        Ok(config)
    }

    /// Overlay values from a TOML file.
    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let file: FileConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad config {}: {e}", path.display())))?;

        let p = file.partitions;
        self.partitions = Partitions::new(
            p.pending.unwrap_or_else(|| self.partitions.pending.clone()),
            p.in_progress
                .unwrap_or_else(|| self.partitions.in_progress.clone()),
            p.completed.unwrap_or_else(|| self.partitions.completed.clone()),
        )?;
        if let Some(secs) = file.reclaim.interval_secs {
            self.reclaim_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.reclaim.max_age_secs {
            self.reclaim_max_age = Duration::from_secs(secs);
        }
        Ok(())
    }
}

fn secs_var(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} must be a whole number of seconds, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
