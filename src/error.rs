//! Custom error types for the application.
//!
//! This module defines the primary error type, `MonitorError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different failure domains of the monitor:
//!
//! - **`Config`**: Wraps errors from the `config` crate, typically related to file
//!   parsing or format issues in the configuration files.
//! - **`Configuration`**: Represents semantic errors in the configuration, such as
//!   values that parse fine but are logically invalid (e.g., a success-rate
//!   threshold outside (0, 1)). These are caught during the validation step.
//! - **`Io`**: Wraps standard `std::io::Error`.
//! - **`Probe`**: A single health probe failed. Probe failures are isolated by the
//!   health supervisor and never abort the other probes.
//! - **`Timeout`**: An attempt exceeded its per-attempt deadline. Counts as a
//!   retryable failure for the retry executor.
//! - **`NonRetryable`**: An operation-level error that must abort a retry loop
//!   immediately without consuming the remaining attempts.
//! - **`RetriesExhausted`**: The retry budget was consumed; carries the last error.
//! - **`NotificationDelivery`**: A notification send returned false or failed. Logged
//!   at the emitter boundary, never propagated into alerting state.
//! - **`FatalSupervisor`**: A supervised work loop failed unrecoverably; triggers
//!   coordinated shutdown of its siblings.
//!
//! The `is_retryable` classification drives the default retry predicate.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, MonitorError>;

/// Unified error type for the monitor.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Probe failure: {0}")]
    Probe(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Non-retryable error: {0}")]
    NonRetryable(String),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<MonitorError>,
    },

    #[error("Notification delivery failed: {0}")]
    NotificationDelivery(String),

    #[error("Fatal supervisor error in task '{task}': {message}")]
    FatalSupervisor { task: String, message: String },
}

impl MonitorError {
    /// Whether the retry executor may consume another attempt on this error.
    ///
    /// Configuration problems and explicit `NonRetryable` errors abort
    /// immediately; transient conditions (probe failures, timeouts, I/O,
    /// delivery hiccups) are retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            MonitorError::Config(_)
                | MonitorError::Configuration(_)
                | MonitorError::NonRetryable(_)
                | MonitorError::RetriesExhausted { .. }
                | MonitorError::FatalSupervisor { .. }
        )
    }
}
