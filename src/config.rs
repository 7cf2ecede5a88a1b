//! Configuration module for SmokeTrail.
//!
//! Loads configuration from environment variables with sensible defaults,
//! plus an optional JSON file seeding the target registry.

use crate::db::Target;
use crate::parse::Platform;
use crate::probe::{ProbeConfig, ROUTE_TIMEOUT};
use crate::scheduler::{ScheduleConfig, CLEANUP_INTERVAL, ROUTE_INTERVAL};

use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "smoketrail.db")
    pub db_path: String,
    /// Ping cadence (default: 60s)
    pub ping_interval: Duration,
    /// Packets per ping probe (default: 10)
    pub ping_count: u32,
    /// Per-packet reply timeout (default: 2s)
    pub ping_wait: Duration,
    /// Pings per hop in an mtr report (default: 10)
    pub mtr_count: u32,
    /// Traceroute max TTL (default: 30)
    pub max_hops: u32,
    /// Samples older than this many days are purged (default: 30)
    pub retention_days: u32,
    /// Optional JSON file of targets to upsert at startup
    pub targets_file: Option<PathBuf>,
    /// How long shutdown waits for in-flight probes (default: 10s)
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "smoketrail.db".to_string(),
            ping_interval: Duration::from_secs(60),
            ping_count: 10,
            ping_wait: Duration::from_secs(2),
            mtr_count: 10,
            max_hops: 30,
            retention_days: 30,
            targets_file: None,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SMOKETRAIL_HTTP_PORT`: HTTP port (default: 8080)
    /// - `SMOKETRAIL_DB_PATH`: Database file path (default: "smoketrail.db")
    /// - `SMOKETRAIL_PING_INTERVAL_MS`: Ping cadence in ms (default: 60000)
    /// - `SMOKETRAIL_PING_COUNT`: Packets per ping (default: 10)
    /// - `SMOKETRAIL_PING_WAIT_SECS`: Reply timeout per packet (default: 2)
    /// - `SMOKETRAIL_MTR_COUNT`: Pings per mtr hop (default: 10)
    /// - `SMOKETRAIL_MAX_HOPS`: Traceroute max TTL (default: 30)
    /// - `SMOKETRAIL_RETENTION_DAYS`: Retention window (default: 30)
    /// - `SMOKETRAIL_TARGETS_FILE`: Targets seed file (default: unset)
    /// - `SMOKETRAIL_SHUTDOWN_GRACE_SECS`: Shutdown grace (default: 10)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup. Missing, unparsable and zero
    /// values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = positive::<u16>(&lookup, "SMOKETRAIL_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Some(db_path) = lookup("SMOKETRAIL_DB_PATH").filter(|s| !s.trim().is_empty()) {
            cfg.db_path = db_path;
        }
        if let Some(ms) = positive::<u64>(&lookup, "SMOKETRAIL_PING_INTERVAL_MS") {
            cfg.ping_interval = Duration::from_millis(ms);
        }
        if let Some(count) = positive(&lookup, "SMOKETRAIL_PING_COUNT") {
            cfg.ping_count = count;
        }
        if let Some(secs) = positive::<u64>(&lookup, "SMOKETRAIL_PING_WAIT_SECS") {
            cfg.ping_wait = Duration::from_secs(secs);
        }
        if let Some(count) = positive(&lookup, "SMOKETRAIL_MTR_COUNT") {
            cfg.mtr_count = count;
        }
        if let Some(hops) = positive(&lookup, "SMOKETRAIL_MAX_HOPS") {
            cfg.max_hops = hops;
        }
        if let Some(days) = positive(&lookup, "SMOKETRAIL_RETENTION_DAYS") {
            cfg.retention_days = days;
        }
        if let Some(path) = lookup("SMOKETRAIL_TARGETS_FILE").filter(|s| !s.trim().is_empty()) {
            cfg.targets_file = Some(PathBuf::from(path));
        }
        if let Some(secs) = positive::<u64>(&lookup, "SMOKETRAIL_SHUTDOWN_GRACE_SECS") {
            cfg.shutdown_grace = Duration::from_secs(secs);
        }

        cfg
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            ping_count: self.ping_count,
            ping_wait: self.ping_wait,
            mtr_count: self.mtr_count,
            max_hops: self.max_hops,
            route_timeout: ROUTE_TIMEOUT,
            platform: Platform::host(),
        }
    }

    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            ping_interval: self.ping_interval,
            route_interval: ROUTE_INTERVAL,
            retention: ChronoDuration::days(i64::from(self.retention_days)),
            cleanup_interval: CLEANUP_INTERVAL,
            shutdown_grace: self.shutdown_grace,
            ..Default::default()
        }
    }
}

fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let value = lookup(key)?.trim().parse::<T>().ok()?;
    if value > T::default() {
        Some(value)
    } else {
        tracing::warn!("Ignoring non-positive value for {}", key);
        None
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid targets file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Shape of the targets seed file.
#[derive(Debug, Deserialize)]
pub struct TargetsFile {
    pub targets: Vec<TargetSeed>,
}

#[derive(Debug, Deserialize)]
pub struct TargetSeed {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl From<TargetSeed> for Target {
    fn from(seed: TargetSeed) -> Self {
        Target {
            id: 0,
            name: seed.name,
            host: seed.host,
            group: seed.group,
            description: seed.description,
            enabled: seed.enabled,
        }
    }
}

/// Read a targets seed file. Entries with a blank name or host are skipped.
pub fn load_targets_file(path: &Path) -> Result<Vec<Target>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: TargetsFile = serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(file
        .targets
        .into_iter()
        .filter(|seed| {
            let valid = !seed.name.trim().is_empty() && !seed.host.trim().is_empty();
            if !valid {
                tracing::warn!("Skipping seed target with empty name or host: {:?}", seed);
            }
            valid
        })
        .map(Target::from)
        .collect())
}
