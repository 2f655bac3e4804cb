//! Health probe capability and built-in probes.

use crate::error::{AppResult, MonitorError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use sysinfo::{get_current_pid, ProcessesToUpdate, System};
use tracing::warn;

/// An independent boolean health check over one environmental dependency.
///
/// `Ok(true)` means healthy, `Ok(false)` means definitively unhealthy, and
/// `Err` means the check itself failed. The health supervisor isolates errors
/// per probe; an error never aborts the other probes.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Stable probe name used as the key in the health verdict.
    fn name(&self) -> &str;

    /// Runs the check once.
    async fn check(&self) -> AppResult<bool>;
}

/// Checks the process resident set size against a configured threshold.
///
/// A high reading is reported immediately (this probe is registered without a
/// retry policy).
pub struct MemoryProbe {
    threshold_mb: u64,
    system: Mutex<System>,
}

impl MemoryProbe {
    /// Creates a memory probe failing above `threshold_mb` megabytes of RSS.
    pub fn new(threshold_mb: u64) -> Self {
        Self {
            threshold_mb,
            system: Mutex::new(System::new()),
        }
    }
}

#[async_trait]
impl Probe for MemoryProbe {
    fn name(&self) -> &str {
        "memory"
    }

    async fn check(&self) -> AppResult<bool> {
        let pid = get_current_pid()
            .map_err(|e| MonitorError::Probe(format!("cannot resolve own pid: {e}")))?;

        let memory_mb = {
            let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            let process = system
                .process(pid)
                .ok_or_else(|| MonitorError::Probe("own process not visible".to_string()))?;
            process.memory() / 1024 / 1024
        };

        if memory_mb > self.threshold_mb {
            warn!(
                memory_mb,
                threshold_mb = self.threshold_mb,
                "memory usage above threshold"
            );
            return Ok(false);
        }
        Ok(true)
    }
}

/// A scriptable probe for wiring and tests.
///
/// Responses are consumed front to back; with an empty script the probe
/// reports healthy.
pub struct MockProbe {
    name: String,
    script: Mutex<VecDeque<Result<bool, String>>>,
    calls: AtomicU32,
}

impl MockProbe {
    /// Creates a mock probe with the given name and an empty script.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
        }
    }

    /// Queues a healthy/unhealthy response.
    pub fn enqueue_result(&self, healthy: bool) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(healthy));
    }

    /// Queues a check-level failure.
    pub fn enqueue_error(&self, message: impl Into<String>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(message.into()));
    }

    /// Number of times `check` has been invoked.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for MockProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> AppResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match scripted {
            Some(Ok(healthy)) => Ok(healthy),
            Some(Err(message)) => Err(MonitorError::Probe(message)),
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_probe_passes_with_generous_threshold() {
        // The test process will not be using a terabyte of RSS.
        let probe = MemoryProbe::new(1024 * 1024);
        assert_eq!(probe.name(), "memory");
        let healthy = probe.check().await.expect("probe should run");
        assert!(healthy);
    }

    #[tokio::test]
    async fn memory_probe_fails_above_zero_threshold() {
        // Any live process exceeds a 0 MB budget.
        let probe = MemoryProbe::new(0);
        let healthy = probe.check().await.expect("probe should run");
        assert!(!healthy);
    }

    #[tokio::test]
    async fn mock_probe_plays_script_then_defaults_healthy() {
        let probe = MockProbe::new("dependent_service");
        probe.enqueue_result(false);
        probe.enqueue_error("connection refused");

        assert_eq!(probe.check().await.expect("scripted"), false);
        assert!(probe.check().await.is_err());
        assert_eq!(probe.check().await.expect("default"), true);
        assert_eq!(probe.calls(), 3);
    }
}
