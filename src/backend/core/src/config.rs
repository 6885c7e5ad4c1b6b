//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

/// Main engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between scheduler ticks (independent of any job's frequency)
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// Maximum run results retained per job id (oldest evicted first)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Fallback timeout used for stuck-run detection when a job's own
    /// timeout is not available
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub default_timeout: Duration,

    /// Age past which a force-cleared running entry is swept into history
    /// as a terminal failure (operator clear-locks)
    #[serde(with = "humantime_serde", default = "default_lock_stale_after")]
    pub lock_stale_after: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            history_limit: default_history_limit(),
            default_timeout: default_timeout(),
            lock_stale_after: default_lock_stale_after(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

// Default value functions
fn default_tick_interval() -> Duration { Duration::from_secs(60) }
fn default_history_limit() -> usize { 50 }
fn default_timeout() -> Duration { Duration::from_secs(600) }
fn default_lock_stale_after() -> Duration { Duration::from_secs(3600) }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("BURSAR").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("BURSAR").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
