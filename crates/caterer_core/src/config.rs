//! Process-wide settings.
//!
//! Loaded from an optional JSON file; every field has a default so a partial
//! file (or none at all) works.

use crate::pattern::DEFAULT_LOOKBACK;
use crate::render::DEFAULT_SIZE_CAP;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 8088;

/// Maximum generations per step for one request.
pub const DEFAULT_FRAME_CAP: u64 = 2500;

/// Seconds to wait for the requester's next choice.
pub const DEFAULT_WAIT_SECS: u64 = 25;

/// Cancel markers from third parties needed before the count exceeds this.
pub const DEFAULT_CANCEL_QUORUM: u32 = 3;

/// Largest artifact the front end accepts.
pub const DEFAULT_DELIVERY_LIMIT: u64 = 8_000_000;

/// Sessions kept in the recent-activity log.
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 5;

/// Errors while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// A value is out of range.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Failed to read config: {}", e),
            Self::Json(e) => write!(f, "Invalid config: {}", e),
            Self::Invalid(s) => write!(f, "Invalid config: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Everything the binary needs to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatererConfig {
    /// `host:port` for the HTTP front end.
    pub listen: String,
    /// Directory for per-request artifacts.
    pub artifact_dir: PathBuf,
    /// Path of the engine binary.
    pub engine_binary: PathBuf,
    /// SQLite database of uploaded rules.
    pub rule_db: PathBuf,
    /// Encoded GIF size after which rendering stops.
    pub size_cap: u64,
    /// Largest accepted generation/step ratio.
    pub frame_cap: u64,
    /// Inactivity window in seconds.
    pub wait_secs: u64,
    /// History messages searched for a missing pattern or rule.
    pub lookback: usize,
    pub cancel_quorum: u32,
    /// Threads in the compute pool; 0 picks one per core.
    pub compute_threads: usize,
    pub delivery_limit: u64,
    pub activity_capacity: usize,
}

impl Default for CatererConfig {
    fn default() -> Self {
        Self {
            listen: format!("0.0.0.0:{}", DEFAULT_PORT),
            artifact_dir: PathBuf::from("artifacts"),
            engine_binary: PathBuf::from("resources/bgolly"),
            rule_db: PathBuf::from("rules.db"),
            size_cap: DEFAULT_SIZE_CAP,
            frame_cap: DEFAULT_FRAME_CAP,
            wait_secs: DEFAULT_WAIT_SECS,
            lookback: DEFAULT_LOOKBACK,
            cancel_quorum: DEFAULT_CANCEL_QUORUM,
            compute_threads: 0,
            delivery_limit: DEFAULT_DELIVERY_LIMIT,
            activity_capacity: DEFAULT_ACTIVITY_CAPACITY,
        }
    }
}

impl CatererConfig {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_cap == 0 {
            return Err(ConfigError::Invalid("frame_cap must be positive".into()));
        }
        if self.size_cap == 0 {
            return Err(ConfigError::Invalid("size_cap must be positive".into()));
        }
        if self.activity_capacity == 0 {
            return Err(ConfigError::Invalid("activity_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}
