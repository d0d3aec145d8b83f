use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default engine tick cadence in seconds.
pub const DEFAULT_TICK_SECS: u64 = 10;
/// Default lock TTL — a holder silent for this long is presumed dead.
pub const DEFAULT_LOCK_TTL_MS: i64 = 60_000;

/// Top-level config (chime.toml + CHIME_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChimeConfig {
    /// Root directory for schedule records and lock files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Scheduler engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-schedule polls.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Lock time-to-live in milliseconds.
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
        }
    }
}

impl Default for ChimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ChimeConfig {
    /// Load configuration. Priority:
    ///   1. Explicit path argument
    ///   2. CHIME_CONFIG env
    ///   3. ~/.chime/chime.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CHIME_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        tracing::debug!(config_path = %path, "loading configuration");
        let config: ChimeConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CHIME_").split("_"))
            .extract()
            .map_err(|e| crate::error::ChimeError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chime/chime.toml", home)
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(format!("{}/.chime", home))
}

fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}

fn default_lock_ttl_ms() -> i64 {
    DEFAULT_LOCK_TTL_MS
}
