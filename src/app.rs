//! Application root: wires the recorder, health loop, and emitter together.
//!
//! Everything is explicitly constructed and injected; there are no global
//! singletons. The [`Application`] owns the settings, clock, and notification
//! sink, spawns the three periodic loops under one [`TaskSupervisor`], and
//! applies the fail-together policy: if the primary work loop errors, a
//! best-effort crash notice is emitted and every sibling task is shut down.

use crate::clock::Clock;
use crate::config::{HealthSettings, Settings};
use crate::error::AppResult;
use crate::health::{HealthSupervisor, MemoryProbe, Probe};
use crate::monitor::events::HealthAlert;
use crate::monitor::{CycleRecorder, MonitorEvent};
use crate::notify::{Emitter, NotificationSink};
use crate::retry::RetryPolicy;
use crate::supervisor::{ShutdownSignal, TaskSupervisor};
use crate::worker::Worker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Fully wired monitor application.
pub struct Application {
    settings: Settings,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    extra_probes: Vec<Arc<dyn Probe>>,
}

impl Application {
    /// Creates an application from its injected collaborators.
    pub fn new(
        settings: Settings,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            settings,
            clock,
            sink,
            extra_probes: Vec::new(),
        }
    }

    /// Registers an additional health probe. Extra probes are assumed to be
    /// network-facing and run under the configured retry policy; the built-in
    /// memory probe is local and runs without retry.
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.extra_probes.push(probe);
        self
    }

    /// Runs the monitor until ctrl-c or a fatal task error.
    pub async fn run<W: Worker + 'static>(self, mut worker: W) -> AppResult<()> {
        let (events_tx, events_rx) = mpsc::unbounded_channel::<MonitorEvent>();

        let mut recorder = CycleRecorder::new(
            self.settings.monitor.clone(),
            self.clock.clone(),
            events_tx.clone(),
        );
        let report_flag = recorder.report_flag();

        let mut health = HealthSupervisor::new(self.clock.clone(), self.settings.health.probe_timeout);
        health.register(Arc::new(MemoryProbe::new(self.settings.health.memory_threshold_mb)));
        let retry_policy = RetryPolicy::from_settings(&self.settings.retry);
        for probe in self.extra_probes {
            health.register_with_retry(probe, retry_policy.clone());
        }
        let health = Arc::new(health);

        let emitter = Emitter::new(
            self.sink,
            self.settings.notification.recipients.clone(),
            self.settings.notification.send_timeout,
            report_flag,
        );

        let mut supervisor = TaskSupervisor::new();

        supervisor.spawn("emitter", move |signal| emitter.run(events_rx, signal));

        let health_settings = self.settings.health.clone();
        let health_tx = events_tx.clone();
        supervisor.spawn("health", move |signal| {
            health_loop(health, health_settings, health_tx, signal)
        });

        let cycle_interval = self.settings.monitor.cycle_interval;
        supervisor.spawn("worker", move |mut signal| async move {
            let mut cycle: u64 = 0;
            while !signal.is_shutdown() {
                cycle += 1;
                let outcome = worker.run_cycle(cycle).await?;
                recorder.record_cycle(cycle, outcome.success, outcome.duration);
                if !signal.sleep(cycle_interval).await {
                    break;
                }
            }
            let snapshot = recorder.snapshot();
            info!(
                total_cycles = snapshot.stats.total_cycles,
                success_rate = snapshot.success_rate,
                "work loop stopped"
            );
            Ok(())
        });

        info!("monitor started");
        let mut fatal = None;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
            }
            joined = supervisor.join_next() => match joined {
                None => {}
                Some((name, Ok(()))) => {
                    info!(task = %name, "task finished");
                }
                Some((name, Err(err))) => {
                    error!(task = %name, %err, "task failed, shutting down siblings");
                    // Best-effort crash notice; the emitter drains pending
                    // events before it exits.
                    let _ = events_tx.send(MonitorEvent::Fatal {
                        task: name,
                        message: err.to_string(),
                    });
                    fatal = Some(err);
                }
            }
        }

        drop(events_tx);
        for (name, result) in supervisor.shutdown(SHUTDOWN_TIMEOUT).await {
            if let Err(err) = result {
                error!(task = %name, %err, "task failed during shutdown");
                if fatal.is_none() {
                    fatal = Some(err);
                }
            }
        }

        match fatal {
            Some(err) => Err(err),
            None => {
                info!("monitor stopped cleanly");
                Ok(())
            }
        }
    }
}

/// Periodic health loop: sleep, run a probe pass, forward an edge-triggered
/// alert once the consecutive-failure threshold is crossed.
async fn health_loop(
    health: Arc<HealthSupervisor>,
    settings: HealthSettings,
    events: mpsc::UnboundedSender<MonitorEvent>,
    mut signal: ShutdownSignal,
) -> AppResult<()> {
    let mut alerted = false;
    loop {
        if !signal.sleep(settings.check_interval).await {
            break;
        }
        // A pass over a retried probe can sit in per-attempt timeouts and
        // backoff sleeps for many seconds; shutdown must interrupt the pass,
        // not wait it out.
        let verdict = tokio::select! {
            verdict = health.run_checks() => verdict,
            _ = signal.cancelled() => break,
        };
        if verdict.overall_ok {
            alerted = false;
            continue;
        }
        let failures = health.consecutive_failures();
        if failures >= settings.alert_after_consecutive_failures && !alerted {
            alerted = true;
            let event = MonitorEvent::HealthAlert(HealthAlert {
                consecutive_failures: failures,
                failed_probes: verdict
                    .failed_probes()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                checked_at: verdict.checked_at,
            });
            if events.send(event).is_err() {
                warn!("event channel closed; dropping health alert");
            }
        }
    }
    info!("health loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::MonitorError;
    use crate::notify::MockSink;
    use crate::worker::CycleOutcome;
    use async_trait::async_trait;

    struct FailAfter {
        cycles: u64,
    }

    #[async_trait]
    impl Worker for FailAfter {
        async fn run_cycle(&mut self, cycle: u64) -> AppResult<CycleOutcome> {
            if cycle > self.cycles {
                return Err(MonitorError::NonRetryable("workload gone".to_string()));
            }
            Ok(CycleOutcome {
                success: true,
                duration: Some(Duration::from_millis(10)),
            })
        }
    }

    fn fast_settings() -> Settings {
        let mut settings = Settings::default();
        settings.monitor.cycle_interval = Duration::from_millis(1);
        // Keep the health loop quiet for the duration of the test.
        settings.health.check_interval = Duration::from_secs(3600);
        settings
    }

    #[tokio::test(start_paused = true)]
    async fn worker_error_triggers_fail_together_with_crash_notice() {
        let sink = Arc::new(MockSink::new());
        let app = Application::new(fast_settings(), Arc::new(SystemClock), sink.clone());

        let result = app.run(FailAfter { cycles: 3 }).await;
        assert!(matches!(result, Err(MonitorError::NonRetryable(_))));

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("Application crashed"));
        assert!(sent[0].1.contains("workload gone"));
    }

    struct HangingProbe;

    #[async_trait]
    impl Probe for HangingProbe {
        fn name(&self) -> &str {
            "dependent_service"
        }

        async fn check(&self) -> AppResult<bool> {
            tokio::time::sleep(Duration::from_secs(36_000)).await;
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_health_pass_stuck_in_retries() {
        // A retried probe that never answers: the pass sits in a 20s
        // per-attempt timeout followed by backoff sleeps.
        let mut health = HealthSupervisor::new(Arc::new(SystemClock), Duration::from_secs(20));
        health.register_with_retry(
            Arc::new(HangingProbe),
            RetryPolicy::from_settings(&Settings::default().retry),
        );
        let health = Arc::new(health);

        let settings = HealthSettings {
            check_interval: Duration::from_secs(1),
            ..HealthSettings::default()
        };
        let (events_tx, _events_rx) = mpsc::unbounded_channel();

        let mut supervisor = TaskSupervisor::new();
        supervisor.spawn("health", move |signal| {
            health_loop(health, settings, events_tx, signal)
        });

        // Past the first interval, the loop is inside the probe pass.
        tokio::time::sleep(Duration::from_millis(1500)).await;

        supervisor.request_shutdown();
        let started = tokio::time::Instant::now();
        let outcomes = supervisor.shutdown(Duration::from_secs(5)).await;

        // The pass was cancelled, not aborted at the deadline.
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].1.is_ok());
    }
}
