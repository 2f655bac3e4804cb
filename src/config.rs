//! Application configuration.
//!
//! Settings are loaded in three layers: built-in defaults, an optional TOML
//! file, and `CYCLEMON_*` environment variable overrides (double underscore as
//! the section separator, e.g. `CYCLEMON_MONITOR__P1_TOTAL_FAILURE_THRESHOLD=10`).
//!
//! Parsing errors surface as [`MonitorError::Config`]; semantic problems that
//! parse fine but are logically invalid (thresholds out of range, zero retry
//! budget) are caught by [`Settings::validate`] and surface as
//! [`MonitorError::Configuration`].
//!
//! Durations are human-readable (`"30s"`, `"5m"`) via `humantime-serde`.

use crate::error::{AppResult, MonitorError};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Thresholds and cadence for the alerting state machine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// P1 alert fires when cumulative failures reach this count. Must be >= 1.
    pub p1_total_failure_threshold: u64,
    /// P2 alert fires when the overall success rate drops below this. Must be in (0, 1).
    pub p2_success_rate_threshold: f64,
    /// A periodic report fires every this many cycles. Must be >= 1.
    pub report_cycle_interval: u64,
    /// Trailing window used for recent-rate and recent-duration statistics.
    pub recent_window: usize,
    /// Maximum number of cycle records retained in memory.
    pub retained_cycles: usize,
    /// Pause between work cycles.
    #[serde(with = "humantime_serde")]
    pub cycle_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            p1_total_failure_threshold: 5,
            p2_success_rate_threshold: 0.9,
            report_cycle_interval: 100,
            recent_window: 10,
            retained_cycles: 256,
            cycle_interval: Duration::from_secs(30),
        }
    }
}

/// Health-check loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Process RSS above this many megabytes fails the memory probe.
    pub memory_threshold_mb: u64,
    /// Per-attempt deadline for each probe.
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    /// Pause between health-check passes.
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    /// Consecutive failed passes before a health alert is forwarded.
    pub alert_after_consecutive_failures: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            memory_threshold_mb: 500,
            probe_timeout: Duration::from_secs(15),
            check_interval: Duration::from_secs(60),
            alert_after_consecutive_failures: 3,
        }
    }
}

/// Retry policy parameters for transient failures (network-facing probes).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum attempts before declaring the operation failed. Must be >= 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each attempt. Must be >= 1.0.
    pub backoff_multiplier: f64,
    /// Upper bound on the backoff delay.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Notification delivery settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Recipients, in delivery order.
    pub recipients: Vec<String>,
    /// Deadline for a single send attempt.
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            send_timeout: Duration::from_secs(30),
        }
    }
}

/// Top-level application settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub monitor: MonitorSettings,
    pub health: HealthSettings,
    pub retry: RetrySettings,
    pub notification: NotificationSettings,
}

impl Settings {
    /// Loads settings from defaults, an optional TOML file, and the environment.
    pub fn new(config_path: Option<&Path>) -> AppResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(Environment::with_prefix("CYCLEMON").separator("__"))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks semantic constraints the deserializer cannot express.
    pub fn validate(&self) -> AppResult<()> {
        if self.monitor.p1_total_failure_threshold < 1 {
            return Err(MonitorError::Configuration(
                "monitor.p1_total_failure_threshold must be >= 1".into(),
            ));
        }
        let rate = self.monitor.p2_success_rate_threshold;
        if !(rate > 0.0 && rate < 1.0) {
            return Err(MonitorError::Configuration(format!(
                "monitor.p2_success_rate_threshold must be in (0, 1), got {rate}"
            )));
        }
        if self.monitor.report_cycle_interval < 1 {
            return Err(MonitorError::Configuration(
                "monitor.report_cycle_interval must be >= 1".into(),
            ));
        }
        if self.monitor.recent_window == 0 {
            return Err(MonitorError::Configuration(
                "monitor.recent_window must be >= 1".into(),
            ));
        }
        if self.monitor.retained_cycles < self.monitor.recent_window {
            return Err(MonitorError::Configuration(
                "monitor.retained_cycles must be >= monitor.recent_window".into(),
            ));
        }
        if self.retry.max_attempts < 1 {
            return Err(MonitorError::Configuration(
                "retry.max_attempts must be >= 1".into(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(MonitorError::Configuration(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        Ok(())
    }
}
