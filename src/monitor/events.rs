//! Alert and report event values produced by the recorder.
//!
//! Events are plain data; rendering to a subject/body pair happens here so the
//! notification layer stays a dumb transport. Duration statistics are
//! enrichment only and never feed threshold decisions.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Average cycle durations over retained history and over the recent window.
#[derive(Debug, Clone, Copy, Default)]
pub struct DurationStats {
    /// Mean duration in seconds across all retained records with a duration.
    pub average_secs: Option<f64>,
    /// Mean duration in seconds across the recent window.
    pub recent_average_secs: Option<f64>,
}

/// Payload of a P1 (cumulative failure) alert.
#[derive(Debug, Clone)]
pub struct P1Alert {
    pub total_cycles: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    /// Timestamps of the most recent failures, newest first (at most 5).
    pub recent_failure_times: Vec<DateTime<Utc>>,
    pub durations: DurationStats,
}

/// Payload of a P2 (success rate) alert.
#[derive(Debug, Clone)]
pub struct P2Alert {
    pub total_cycles: u64,
    pub success_rate: f64,
    /// Success rate over the recent window only.
    pub recent_success_rate: f64,
    pub failure_count: u64,
    pub durations: DurationStats,
}

/// Payload of the periodic performance report.
#[derive(Debug, Clone)]
pub struct PeriodicReport {
    pub total_cycles: u64,
    pub cumulative_success: u64,
    pub cumulative_failure: u64,
    pub success_rate: f64,
    pub durations: DurationStats,
    pub uptime: Duration,
    /// Whether the P1 condition is currently armed.
    pub p1_armed: bool,
    /// Whether the P2 condition is currently armed.
    pub p2_armed: bool,
}

/// Payload of a persistent-health-failure alert.
#[derive(Debug, Clone)]
pub struct HealthAlert {
    pub consecutive_failures: u32,
    pub failed_probes: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// An event produced by the alerting state machine or the health loop.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    P1Alert(P1Alert),
    P2Alert(P2Alert),
    PeriodicReport(PeriodicReport),
    HealthAlert(HealthAlert),
    /// Best-effort crash notice emitted during fail-together shutdown.
    Fatal { task: String, message: String },
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

fn duration_lines(durations: &DurationStats) -> String {
    match (durations.average_secs, durations.recent_average_secs) {
        (Some(avg), Some(recent)) => {
            format!("Average duration: {avg:.1}s (recent window: {recent:.1}s)\n")
        }
        (Some(avg), None) => format!("Average duration: {avg:.1}s\n"),
        _ => String::new(),
    }
}

impl MonitorEvent {
    /// Whether this event is a periodic report (gates the in-flight handshake).
    pub fn is_periodic_report(&self) -> bool {
        matches!(self, MonitorEvent::PeriodicReport(_))
    }

    /// One-line notification subject.
    pub fn subject(&self) -> String {
        match self {
            MonitorEvent::P1Alert(alert) => format!(
                "P1 alert: cumulative failures reached {} (cycle {})",
                alert.failure_count, alert.total_cycles
            ),
            MonitorEvent::P2Alert(alert) => format!(
                "P2 alert: success rate down to {} (cycle {})",
                percent(alert.success_rate),
                alert.total_cycles
            ),
            MonitorEvent::PeriodicReport(report) => {
                format!("Performance report - cycle {}", report.total_cycles)
            }
            MonitorEvent::HealthAlert(alert) => format!(
                "Health alert: {} consecutive failed checks",
                alert.consecutive_failures
            ),
            MonitorEvent::Fatal { task, .. } => {
                format!("Application crashed: task '{task}' failed")
            }
        }
    }

    /// Multi-line plain-text notification body.
    pub fn body(&self) -> String {
        match self {
            MonitorEvent::P1Alert(alert) => {
                let mut body = format!(
                    "Cumulative failures exceeded the safety threshold.\n\
                     Failure count: {}\n\
                     Total cycles: {}\n\
                     Success rate: {}\n",
                    alert.failure_count,
                    alert.total_cycles,
                    percent(alert.success_rate)
                );
                body.push_str(&duration_lines(&alert.durations));
                if !alert.recent_failure_times.is_empty() {
                    body.push_str("Recent failures:\n");
                    for time in &alert.recent_failure_times {
                        body.push_str(&format!("  - {}\n", time.format("%H:%M:%S")));
                    }
                }
                body
            }
            MonitorEvent::P2Alert(alert) => {
                let mut body = format!(
                    "Success rate dropped below the configured threshold.\n\
                     Overall success rate: {}\n\
                     Recent-window success rate: {}\n\
                     Failed cycles: {}\n\
                     Total cycles: {}\n",
                    percent(alert.success_rate),
                    percent(alert.recent_success_rate),
                    alert.failure_count,
                    alert.total_cycles
                );
                body.push_str(&duration_lines(&alert.durations));
                body
            }
            MonitorEvent::PeriodicReport(report) => {
                let uptime_hours = report.uptime.as_secs_f64() / 3600.0;
                let mut body = format!(
                    "Uptime: {uptime_hours:.1}h\n\
                     Total cycles: {}\n\
                     Successful: {}\n\
                     Failed: {}\n\
                     Success rate: {}\n",
                    report.total_cycles,
                    report.cumulative_success,
                    report.cumulative_failure,
                    percent(report.success_rate)
                );
                body.push_str(&duration_lines(&report.durations));
                body.push_str(&format!(
                    "P1 condition: {}\nP2 condition: {}\n",
                    if report.p1_armed { "TRIGGERED" } else { "normal" },
                    if report.p2_armed { "TRIGGERED" } else { "normal" },
                ));
                body
            }
            MonitorEvent::HealthAlert(alert) => format!(
                "Health checks have failed {} times in a row.\n\
                 Failing probes: {}\n\
                 Last checked: {}\n",
                alert.consecutive_failures,
                alert.failed_probes.join(", "),
                alert.checked_at.format("%Y-%m-%d %H:%M:%S"),
            ),
            MonitorEvent::Fatal { task, message } => format!(
                "The primary work loop terminated with an unrecoverable error.\n\
                 Task: {task}\n\
                 Error: {message}\n\
                 All monitor tasks are shutting down.\n"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p1_subject_and_body_carry_the_counts() {
        let event = MonitorEvent::P1Alert(P1Alert {
            total_cycles: 12,
            failure_count: 5,
            success_rate: 7.0 / 12.0,
            recent_failure_times: vec![Utc::now()],
            durations: DurationStats {
                average_secs: Some(3.2),
                recent_average_secs: Some(2.8),
            },
        });
        assert_eq!(
            event.subject(),
            "P1 alert: cumulative failures reached 5 (cycle 12)"
        );
        let body = event.body();
        assert!(body.contains("Failure count: 5"));
        assert!(body.contains("58.3%"));
        assert!(body.contains("Recent failures:"));
    }

    #[test]
    fn report_body_reflects_armed_state() {
        let event = MonitorEvent::PeriodicReport(PeriodicReport {
            total_cycles: 100,
            cumulative_success: 90,
            cumulative_failure: 10,
            success_rate: 0.9,
            durations: DurationStats::default(),
            uptime: Duration::from_secs(7200),
            p1_armed: true,
            p2_armed: false,
        });
        let body = event.body();
        assert!(body.contains("Uptime: 2.0h"));
        assert!(body.contains("P1 condition: TRIGGERED"));
        assert!(body.contains("P2 condition: normal"));
        assert!(event.is_periodic_report());
    }
}
