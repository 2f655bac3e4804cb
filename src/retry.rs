//! Bounded retry with backoff and per-attempt timeout.
//!
//! [`execute`] wraps a fallible async operation with a [`RetryPolicy`]: each
//! attempt is bounded by `per_attempt_timeout` (a timeout counts as a retryable
//! failure), the delay between attempts grows by `backoff_multiplier` up to
//! `max_delay`, and an error rejected by the retryable predicate aborts the
//! loop immediately without consuming the remaining attempts. Exhausting the
//! budget yields [`MonitorError::RetriesExhausted`] carrying the last error.
//!
//! The executor is stateless and reentrant; backoff sleeps are ordinary awaits,
//! so a caller racing the whole future against a shutdown signal cancels
//! mid-backoff without leaking the timer.

use crate::config::RetrySettings;
use crate::error::{AppResult, MonitorError};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::debug;

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// The maximum number of attempts (initial attempt included).
    pub max_attempts: u32,
    /// The delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
    /// Deadline for a single attempt; `None` leaves attempts unbounded.
    pub per_attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            per_attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Builds a policy from configuration, without a per-attempt timeout.
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: settings.base_delay,
            backoff_multiplier: settings.backoff_multiplier,
            max_delay: settings.max_delay,
            per_attempt_timeout: None,
        }
    }

    /// Returns the same policy with a per-attempt deadline.
    pub fn with_timeout(mut self, deadline: Duration) -> Self {
        self.per_attempt_timeout = Some(deadline);
        self
    }

    /// Delay to sleep after `completed_attempts` failed attempts:
    /// `base_delay * backoff_multiplier^(completed_attempts - 1)`, capped at `max_delay`.
    pub fn delay_before(&self, completed_attempts: u32) -> Duration {
        let exponent = completed_attempts.saturating_sub(1);
        let scaled = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent as i32);
        let delay = Duration::try_from_secs_f64(scaled).unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }
}

/// Retries `operation` under `policy`, using [`MonitorError::is_retryable`]
/// as the predicate.
pub async fn execute<T, F, Fut>(policy: &RetryPolicy, operation: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    execute_with(policy, operation, MonitorError::is_retryable).await
}

/// Retries `operation` under `policy` with an explicit retryable-error predicate.
pub async fn execute_with<T, F, Fut, P>(
    policy: &RetryPolicy,
    mut operation: F,
    retryable: P,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
    P: Fn(&MonitorError) -> bool,
{
    let mut last_error: Option<MonitorError> = None;

    for attempt in 1..=policy.max_attempts {
        let result = match policy.per_attempt_timeout {
            Some(deadline) => match timeout(deadline, operation()).await {
                Ok(result) => result,
                Err(_) => Err(MonitorError::Timeout(deadline)),
            },
            None => operation().await,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !retryable(&error) {
                    debug!(attempt, %error, "non-retryable error, aborting retry loop");
                    return Err(error);
                }
                debug!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    %error,
                    "attempt failed"
                );
                last_error = Some(error);
            }
        }

        if attempt < policy.max_attempts {
            sleep(policy.delay_before(attempt)).await;
        }
    }

    Err(MonitorError::RetriesExhausted {
        attempts: policy.max_attempts,
        last: Box::new(last_error.unwrap_or_else(|| {
            MonitorError::NonRetryable("retry budget was zero".to_string())
        })),
    })
}
