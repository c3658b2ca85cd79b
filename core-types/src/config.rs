use std::path::PathBuf;

use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DEVICE_ID: u32 = 13_500;

/// Runtime configuration, layered from an optional `paceline.toml` and
/// `PACELINE_`-prefixed environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// ANT+ device id of the tracked equipment.
    #[serde(default = "default_device_id")]
    pub device_id: u32,
    /// SQLite file holding daily distance totals.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Seconds between periodic flush/liveness ticks.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Maximum gap since the last sample before the link counts as lost.
    #[serde(default = "default_liveness_window_secs")]
    pub liveness_window_secs: f64,
    /// Fixed delay between reconnection attempts.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Reconnection attempt bound; exhausting it is fatal for the run.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Capacity of the transport -> aggregator sample queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Rolling average window in seconds.
    #[serde(default = "default_speed_window_secs")]
    pub speed_window_secs: f64,
    /// Print stored today/yesterday totals and exit.
    #[serde(default)]
    pub stats_only: bool,
}

fn default_device_id() -> u32 {
    DEFAULT_DEVICE_ID
}

fn default_db_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".paceline.db"),
        None => PathBuf::from("paceline.db"),
    }
}

fn default_flush_interval_secs() -> u64 {
    30
}

fn default_liveness_window_secs() -> f64 {
    10.0
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_queue_capacity() -> usize {
    64
}

fn default_speed_window_secs() -> f64 {
    crate::SPEED_WINDOW_SECS
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            db_path: default_db_path(),
            flush_interval_secs: default_flush_interval_secs(),
            liveness_window_secs: default_liveness_window_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            queue_capacity: default_queue_capacity(),
            speed_window_secs: default_speed_window_secs(),
            stats_only: false,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("paceline").required(false))
            .add_source(config::Environment::with_prefix("PACELINE"))
            .build()?;
        settings.try_deserialize()
    }
}
