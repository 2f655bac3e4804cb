//! Concurrent probe execution and verdict aggregation.

use crate::clock::Clock;
use crate::error::MonitorError;
use crate::health::probe::Probe;
use crate::retry::{self, RetryPolicy};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Result of one probe within a health pass.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Whether the probe reported healthy. A probe that errored is unhealthy.
    pub healthy: bool,
    /// The probe's error, retained for diagnostics.
    pub error: Option<String>,
}

/// Aggregated result of one health pass.
#[derive(Debug, Clone)]
pub struct HealthVerdict {
    /// Per-probe outcomes keyed by probe name.
    pub probes: HashMap<String, ProbeOutcome>,
    /// True only if every probe reported healthy.
    pub overall_ok: bool,
    /// When the pass started.
    pub checked_at: DateTime<Utc>,
}

impl HealthVerdict {
    /// Names of probes that did not report healthy, sorted for stable logging.
    pub fn failed_probes(&self) -> Vec<&str> {
        let mut failed: Vec<&str> = self
            .probes
            .iter()
            .filter(|(_, outcome)| !outcome.healthy)
            .map(|(name, _)| name.as_str())
            .collect();
        failed.sort_unstable();
        failed
    }
}

struct RegisteredProbe {
    probe: Arc<dyn Probe>,
    retry: Option<RetryPolicy>,
}

/// Runs all registered probes concurrently and aggregates a boolean verdict.
///
/// One probe's failure never prevents the others from completing: errors are
/// captured per probe, logged, and folded into the verdict. The last-checked
/// timestamp updates unconditionally on every invocation so staleness can be
/// measured independently of health outcome.
pub struct HealthSupervisor {
    probes: Vec<RegisteredProbe>,
    clock: Arc<dyn Clock>,
    probe_timeout: Duration,
    last_checked: Mutex<Option<DateTime<Utc>>>,
    consecutive_failures: AtomicU32,
}

impl HealthSupervisor {
    /// Creates a supervisor with no probes registered.
    pub fn new(clock: Arc<dyn Clock>, probe_timeout: Duration) -> Self {
        Self {
            probes: Vec::new(),
            clock,
            probe_timeout,
            last_checked: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Registers a probe that runs once per pass (no retry).
    pub fn register(&mut self, probe: Arc<dyn Probe>) {
        self.probes.push(RegisteredProbe { probe, retry: None });
    }

    /// Registers a probe whose transient failures are retried under `policy`.
    ///
    /// The supervisor's per-attempt timeout is applied to every attempt.
    pub fn register_with_retry(&mut self, probe: Arc<dyn Probe>, policy: RetryPolicy) {
        let policy = policy.with_timeout(self.probe_timeout);
        self.probes.push(RegisteredProbe {
            probe,
            retry: Some(policy),
        });
    }

    /// Runs all probes concurrently and returns the aggregated verdict.
    pub async fn run_checks(&self) -> HealthVerdict {
        let checked_at = self.clock.now();
        {
            let mut last = self.last_checked.lock().unwrap_or_else(|e| e.into_inner());
            *last = Some(checked_at);
        }

        let checks = self.probes.iter().map(|registered| async {
            let name = registered.probe.name().to_string();
            let result = match &registered.retry {
                Some(policy) => {
                    retry::execute(policy, || registered.probe.check()).await
                }
                None => self.check_once(registered.probe.as_ref()).await,
            };
            let outcome = match result {
                Ok(healthy) => ProbeOutcome {
                    healthy,
                    error: None,
                },
                Err(error) => {
                    warn!(probe = %name, %error, "health probe failed");
                    ProbeOutcome {
                        healthy: false,
                        error: Some(error.to_string()),
                    }
                }
            };
            (name, outcome)
        });

        let probes: HashMap<String, ProbeOutcome> = join_all(checks).await.into_iter().collect();
        let overall_ok = probes.values().all(|outcome| outcome.healthy);
        let verdict = HealthVerdict {
            probes,
            overall_ok,
            checked_at,
        };

        if overall_ok {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            debug!(probe_count = verdict.probes.len(), "health pass ok");
        } else {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(
                failed = ?verdict.failed_probes(),
                consecutive_failures = failures,
                "health pass degraded"
            );
        }

        verdict
    }

    async fn check_once(&self, probe: &dyn Probe) -> Result<bool, MonitorError> {
        match tokio::time::timeout(self.probe_timeout, probe.check()).await {
            Ok(result) => result,
            Err(_) => Err(MonitorError::Timeout(self.probe_timeout)),
        }
    }

    /// Timestamp of the most recent pass, regardless of its outcome.
    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        *self.last_checked.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of consecutive passes with `overall_ok == false`.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::AppResult;
    use crate::health::probe::MockProbe;
    use async_trait::async_trait;

    fn supervisor() -> HealthSupervisor {
        HealthSupervisor::new(Arc::new(SystemClock), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn all_probes_healthy_yields_overall_ok() {
        let mut sup = supervisor();
        sup.register(Arc::new(MockProbe::new("memory")));
        sup.register(Arc::new(MockProbe::new("network")));

        let verdict = sup.run_checks().await;
        assert!(verdict.overall_ok);
        assert_eq!(verdict.probes.len(), 2);
        assert!(verdict.failed_probes().is_empty());
        assert_eq!(sup.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn failing_probe_is_isolated_from_the_others() {
        let broken = Arc::new(MockProbe::new("dependent_service"));
        broken.enqueue_error("connection refused");
        let healthy = Arc::new(MockProbe::new("memory"));

        let mut sup = supervisor();
        sup.register(broken);
        sup.register(healthy.clone());

        let verdict = sup.run_checks().await;
        assert!(!verdict.overall_ok);
        assert_eq!(verdict.failed_probes(), vec!["dependent_service"]);

        // The healthy probe still completed and its result is present.
        assert_eq!(healthy.calls(), 1);
        assert!(verdict.probes["memory"].healthy);
        // The error is retained for diagnostics.
        let error = verdict.probes["dependent_service"]
            .error
            .as_deref()
            .expect("error retained");
        assert!(error.contains("connection refused"));
    }

    #[tokio::test]
    async fn last_checked_updates_even_when_probes_fail() {
        let broken = Arc::new(MockProbe::new("network"));
        broken.enqueue_result(false);

        let mut sup = supervisor();
        sup.register(broken);
        assert!(sup.last_checked().is_none());

        let verdict = sup.run_checks().await;
        assert!(!verdict.overall_ok);
        assert_eq!(sup.last_checked(), Some(verdict.checked_at));
    }

    #[tokio::test]
    async fn consecutive_failures_count_and_reset() {
        let probe = Arc::new(MockProbe::new("dependent_service"));
        probe.enqueue_result(false);
        probe.enqueue_result(false);
        // Third pass: empty script defaults to healthy.

        let mut sup = supervisor();
        sup.register(probe);

        sup.run_checks().await;
        assert_eq!(sup.consecutive_failures(), 1);
        sup.run_checks().await;
        assert_eq!(sup.consecutive_failures(), 2);
        sup.run_checks().await;
        assert_eq!(sup.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn retried_probe_recovers_within_its_budget() {
        let flaky = Arc::new(MockProbe::new("dependent_service"));
        flaky.enqueue_error("transient");
        flaky.enqueue_error("transient");
        // Third attempt succeeds (empty script).

        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_millis(1),
            per_attempt_timeout: None,
        };

        let mut sup = supervisor();
        sup.register_with_retry(flaky.clone(), policy);

        let verdict = sup.run_checks().await;
        assert!(verdict.overall_ok);
        assert_eq!(flaky.calls(), 3);
    }

    struct HangingProbe;

    #[async_trait]
    impl Probe for HangingProbe {
        fn name(&self) -> &str {
            "network"
        }

        async fn check(&self) -> AppResult<bool> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_times_out_and_reports_unhealthy() {
        let mut sup = HealthSupervisor::new(Arc::new(SystemClock), Duration::from_millis(50));
        sup.register(Arc::new(HangingProbe));

        let verdict = sup.run_checks().await;
        assert!(!verdict.overall_ok);
        let error = verdict.probes["network"].error.as_deref().expect("error");
        assert!(error.contains("timed out"));
    }
}
