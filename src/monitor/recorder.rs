//! Cycle recorder and alerting state machine.
//!
//! [`CycleRecorder::record_cycle`] is the single mutation entrypoint: it
//! updates the cumulative statistics, appends a bounded history record, then
//! evaluates the three alert conditions in a fixed order (total failures,
//! success rate, periodic report). Each condition is edge-triggered: it emits
//! exactly once per continuous excursion past its threshold and rearms
//! silently when the metric recovers.
//!
//! Emission is fire-and-forget relative to the caller: events go into an
//! unbounded channel consumed by the emitter task, so a slow notification
//! transport can never block cycle accounting or corrupt alert state.
//!
//! The recorder is owned by the work-loop task; other tasks read state only
//! through [`CycleRecorder::snapshot`].

use crate::clock::Clock;
use crate::config::MonitorSettings;
use crate::monitor::events::{
    DurationStats, MonitorEvent, P1Alert, P2Alert, PeriodicReport,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// One recorded cycle outcome. Immutable once appended.
#[derive(Debug, Clone)]
pub struct CycleRecord {
    /// Caller-supplied cycle number (diagnostics only; see `CumulativeStats`).
    pub cycle: u64,
    pub success: bool,
    pub duration: Option<Duration>,
    pub timestamp: DateTime<Utc>,
}

/// Monotonic counters for the process lifetime.
///
/// `cumulative_success + cumulative_failure == total_cycles` holds after every
/// `record_cycle` call. The counters are never reset; only the armed flags of
/// the alert conditions reset when a metric recovers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CumulativeStats {
    pub total_cycles: u64,
    pub cumulative_success: u64,
    pub cumulative_failure: u64,
}

impl CumulativeStats {
    /// Overall success rate, defined as 1.0 before any data exists so the
    /// rate condition cannot fire on an empty monitor.
    pub fn success_rate(&self) -> f64 {
        if self.total_cycles == 0 {
            1.0
        } else {
            self.cumulative_success as f64 / self.total_cycles as f64
        }
    }
}

/// Read-only view of recorder state for reporting.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub stats: CumulativeStats,
    pub success_rate: f64,
    pub recent_success_rate: f64,
    pub durations: DurationStats,
    pub started_at: DateTime<Utc>,
    pub p1_armed: bool,
    pub p2_armed: bool,
}

/// Ingests per-cycle outcomes and drives the alert conditions.
pub struct CycleRecorder {
    settings: MonitorSettings,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    report_in_flight: Arc<AtomicBool>,
    stats: CumulativeStats,
    history: VecDeque<CycleRecord>,
    last_cycle_number: Option<u64>,
    p1_armed: bool,
    p2_armed: bool,
    last_report_cycle: u64,
    started_at: DateTime<Utc>,
}

impl CycleRecorder {
    /// Creates a recorder that emits events into `events`.
    pub fn new(
        settings: MonitorSettings,
        clock: Arc<dyn Clock>,
        events: mpsc::UnboundedSender<MonitorEvent>,
    ) -> Self {
        info!(
            p1_threshold = settings.p1_total_failure_threshold,
            p2_threshold = settings.p2_success_rate_threshold,
            report_interval = settings.report_cycle_interval,
            "cycle recorder initialized"
        );
        let started_at = clock.now();
        Self {
            settings,
            clock,
            events,
            report_in_flight: Arc::new(AtomicBool::new(false)),
            stats: CumulativeStats::default(),
            history: VecDeque::new(),
            last_cycle_number: None,
            p1_armed: false,
            p2_armed: false,
            last_report_cycle: 0,
            started_at,
        }
    }

    /// The fire-and-confirm lock for periodic reports.
    ///
    /// Set by the recorder when a report is emitted; the emitter clears it
    /// after the transport attempt resolves, success or failure alike, so a
    /// transient send failure cannot starve future reports.
    pub fn report_flag(&self) -> Arc<AtomicBool> {
        self.report_in_flight.clone()
    }

    /// Records one cycle outcome and evaluates all alert conditions.
    ///
    /// Never blocks on notification delivery; emission failures are logged
    /// and leave the armed flags exactly as if the emission had been
    /// attempted.
    pub fn record_cycle(&mut self, cycle_number: u64, success: bool, duration: Option<Duration>) {
        if let Some(last) = self.last_cycle_number {
            if cycle_number < last {
                warn!(
                    cycle_number,
                    last, "cycle number regressed; recording anyway"
                );
            }
        }
        self.last_cycle_number = Some(self.last_cycle_number.unwrap_or(0).max(cycle_number));

        self.stats.total_cycles += 1;
        if success {
            self.stats.cumulative_success += 1;
        } else {
            self.stats.cumulative_failure += 1;
        }

        self.history.push_back(CycleRecord {
            cycle: cycle_number,
            success,
            duration,
            timestamp: self.clock.now(),
        });
        while self.history.len() > self.settings.retained_cycles {
            self.history.pop_front();
        }

        debug!(
            total = self.stats.total_cycles,
            success = self.stats.cumulative_success,
            failure = self.stats.cumulative_failure,
            rate = self.stats.success_rate(),
            "cycle recorded"
        );

        self.evaluate_total_failures();
        self.evaluate_success_rate();
        self.evaluate_periodic_report();
    }

    /// Current cumulative counters.
    pub fn stats(&self) -> CumulativeStats {
        self.stats
    }

    /// Read-only snapshot for reporting.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            stats: self.stats,
            success_rate: self.stats.success_rate(),
            recent_success_rate: self.recent_success_rate(),
            durations: self.duration_stats(),
            started_at: self.started_at,
            p1_armed: self.p1_armed,
            p2_armed: self.p2_armed,
        }
    }

    fn evaluate_total_failures(&mut self) {
        let failures = self.stats.cumulative_failure;
        let threshold = self.settings.p1_total_failure_threshold;

        if failures >= threshold && !self.p1_armed {
            error!(failures, threshold, "P1 alert condition met");
            self.p1_armed = true;
            let recent_failure_times = self
                .history
                .iter()
                .rev()
                .filter(|record| !record.success)
                .take(5)
                .map(|record| record.timestamp)
                .collect();
            self.emit(MonitorEvent::P1Alert(P1Alert {
                total_cycles: self.stats.total_cycles,
                failure_count: failures,
                success_rate: self.stats.success_rate(),
                recent_failure_times,
                durations: self.duration_stats(),
            }));
        } else if failures < threshold && self.p1_armed {
            info!(failures, threshold, "P1 condition cleared, rearming");
            self.p1_armed = false;
        }
    }

    fn evaluate_success_rate(&mut self) {
        let rate = self.stats.success_rate();
        let threshold = self.settings.p2_success_rate_threshold;

        if rate < threshold && !self.p2_armed {
            error!(rate, threshold, "P2 alert condition met");
            self.p2_armed = true;
            self.emit(MonitorEvent::P2Alert(P2Alert {
                total_cycles: self.stats.total_cycles,
                success_rate: rate,
                recent_success_rate: self.recent_success_rate(),
                failure_count: self.stats.cumulative_failure,
                durations: self.duration_stats(),
            }));
        } else if rate >= threshold && self.p2_armed {
            info!(rate, threshold, "P2 condition cleared, rearming");
            self.p2_armed = false;
        }
    }

    fn evaluate_periodic_report(&mut self) {
        let due = self.stats.total_cycles - self.last_report_cycle
            >= self.settings.report_cycle_interval;
        if due && !self.report_in_flight.load(Ordering::SeqCst) {
            self.report_in_flight.store(true, Ordering::SeqCst);
            self.last_report_cycle = self.stats.total_cycles;
            info!(cycle = self.stats.total_cycles, "periodic report due");
            let uptime = (self.clock.now() - self.started_at)
                .to_std()
                .unwrap_or_default();
            self.emit(MonitorEvent::PeriodicReport(PeriodicReport {
                total_cycles: self.stats.total_cycles,
                cumulative_success: self.stats.cumulative_success,
                cumulative_failure: self.stats.cumulative_failure,
                success_rate: self.stats.success_rate(),
                durations: self.duration_stats(),
                uptime,
                p1_armed: self.p1_armed,
                p2_armed: self.p2_armed,
            }));
        }
    }

    fn recent_records(&self) -> impl Iterator<Item = &CycleRecord> {
        let skip = self.history.len().saturating_sub(self.settings.recent_window);
        self.history.iter().skip(skip)
    }

    fn recent_success_rate(&self) -> f64 {
        let (total, successes) = self
            .recent_records()
            .fold((0u64, 0u64), |(total, successes), record| {
                (total + 1, successes + u64::from(record.success))
            });
        if total == 0 {
            1.0
        } else {
            successes as f64 / total as f64
        }
    }

    fn duration_stats(&self) -> DurationStats {
        fn mean_secs<'a>(records: impl Iterator<Item = &'a CycleRecord>) -> Option<f64> {
            let (sum, count) = records
                .filter_map(|record| record.duration)
                .fold((0.0f64, 0u32), |(sum, count), duration| {
                    (sum + duration.as_secs_f64(), count + 1)
                });
            (count > 0).then(|| sum / f64::from(count))
        }

        DurationStats {
            average_secs: mean_secs(self.history.iter()),
            recent_average_secs: mean_secs(self.recent_records()),
        }
    }

    fn emit(&self, event: MonitorEvent) {
        if self.events.send(event).is_err() {
            warn!("event channel closed; dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn settings(f: u64, r: f64, c: u64) -> MonitorSettings {
        MonitorSettings {
            p1_total_failure_threshold: f,
            p2_success_rate_threshold: r,
            report_cycle_interval: c,
            recent_window: 10,
            retained_cycles: 256,
            cycle_interval: Duration::from_secs(1),
        }
    }

    fn recorder(f: u64, r: f64, c: u64) -> (CycleRecorder, UnboundedReceiver<MonitorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = CycleRecorder::new(settings(f, r, c), Arc::new(SystemClock), tx);
        (recorder, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<MonitorEvent>) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn count_p1(events: &[MonitorEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, MonitorEvent::P1Alert(_)))
            .count()
    }

    fn count_p2(events: &[MonitorEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, MonitorEvent::P2Alert(_)))
            .count()
    }

    fn count_reports(events: &[MonitorEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, MonitorEvent::PeriodicReport(_)))
            .count()
    }

    #[test]
    fn cumulative_invariant_holds_after_every_call() {
        let (mut rec, _rx) = recorder(5, 0.9, 100);
        let outcomes = [true, false, true, true, false, false, true];
        for (i, &success) in outcomes.iter().enumerate() {
            rec.record_cycle(i as u64 + 1, success, Some(Duration::from_secs(1)));
            let stats = rec.stats();
            assert_eq!(
                stats.cumulative_success + stats.cumulative_failure,
                stats.total_cycles
            );
            let rate = stats.success_rate();
            assert!((0.0..=1.0).contains(&rate));
        }
    }

    #[test]
    fn success_rate_is_one_before_any_data() {
        let (rec, _rx) = recorder(5, 0.9, 100);
        assert_eq!(rec.stats().success_rate(), 1.0);
    }

    #[test]
    fn p1_fires_exactly_once_at_threshold_and_never_again() {
        // Scenario: F=5. Four failures stay silent; the fifth fires exactly
        // one P1. The counter is monotonic, so continued failures can never
        // re-fire the condition.
        let (mut rec, mut rx) = recorder(5, 0.9, 1000);

        for cycle in 1..=4u64 {
            rec.record_cycle(cycle, false, None);
        }
        assert_eq!(count_p1(&drain(&mut rx)), 0);

        rec.record_cycle(5, false, None);
        let events = drain(&mut rx);
        assert_eq!(count_p1(&events), 1);
        let alert = events
            .iter()
            .find_map(|e| match e {
                MonitorEvent::P1Alert(a) => Some(a),
                _ => None,
            })
            .expect("P1 alert present");
        assert_eq!(alert.failure_count, 5);
        assert_eq!(alert.recent_failure_times.len(), 5);

        for cycle in 6..=20u64 {
            rec.record_cycle(cycle, false, None);
        }
        assert_eq!(count_p1(&drain(&mut rx)), 0);
    }

    #[test]
    fn p2_fires_once_and_does_not_duplicate_while_armed() {
        // Scenario: R=0.9. Eight successes then two failures bring the rate
        // to 0.8; exactly one P2 fires. A following success leaves the rate
        // below threshold, so no duplicate.
        let (mut rec, mut rx) = recorder(1000, 0.9, 1000);

        for cycle in 1..=8u64 {
            rec.record_cycle(cycle, true, None);
        }
        rec.record_cycle(9, false, None);
        rec.record_cycle(10, false, None);
        let events = drain(&mut rx);
        assert_eq!(count_p2(&events), 1);

        rec.record_cycle(11, true, None);
        assert_eq!(count_p2(&drain(&mut rx)), 0);
    }

    #[test]
    fn report_fires_exactly_once_per_boundary() {
        // Scenario: C=100. Nothing through cycle 99, one report at 100,
        // nothing through 199, one report at 200.
        let (mut rec, mut rx) = recorder(1000, 0.9, 100);
        let flag = rec.report_flag();

        for cycle in 1..=99u64 {
            rec.record_cycle(cycle, true, None);
        }
        assert_eq!(count_reports(&drain(&mut rx)), 0);

        rec.record_cycle(100, true, None);
        assert_eq!(count_reports(&drain(&mut rx)), 1);
        // Emitter finished delivering; the in-flight lock is released.
        flag.store(false, Ordering::SeqCst);

        for cycle in 101..=199u64 {
            rec.record_cycle(cycle, true, None);
        }
        assert_eq!(count_reports(&drain(&mut rx)), 0);

        rec.record_cycle(200, true, None);
        assert_eq!(count_reports(&drain(&mut rx)), 1);
    }

    #[test]
    fn in_flight_report_blocks_the_next_boundary_until_released() {
        let (mut rec, mut rx) = recorder(1000, 0.9, 10);
        let flag = rec.report_flag();

        for cycle in 1..=10u64 {
            rec.record_cycle(cycle, true, None);
        }
        assert_eq!(count_reports(&drain(&mut rx)), 1);

        // Delivery has not resolved yet: the next boundary must not fire.
        for cycle in 11..=20u64 {
            rec.record_cycle(cycle, true, None);
        }
        assert_eq!(count_reports(&drain(&mut rx)), 0);

        // Once the emitter releases the lock the overdue boundary fires.
        flag.store(false, Ordering::SeqCst);
        rec.record_cycle(21, true, None);
        assert_eq!(count_reports(&drain(&mut rx)), 1);
    }

    #[test]
    fn history_is_bounded_but_stats_are_not() {
        let mut settings = settings(1000, 0.5, 10_000);
        settings.retained_cycles = 20;
        settings.recent_window = 10;
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut rec = CycleRecorder::new(settings, Arc::new(SystemClock), tx);

        for cycle in 1..=500u64 {
            rec.record_cycle(cycle, true, Some(Duration::from_secs(2)));
        }
        assert_eq!(rec.history.len(), 20);
        assert_eq!(rec.stats().total_cycles, 500);
        assert_eq!(rec.stats().cumulative_success, 500);
    }

    #[test]
    fn snapshot_reports_recent_window_statistics() {
        let (mut rec, _rx) = recorder(1000, 0.1, 10_000);

        // 20 slow successes, then 10 fast failures: the recent window (10)
        // covers only the failures.
        for cycle in 1..=20u64 {
            rec.record_cycle(cycle, true, Some(Duration::from_secs(4)));
        }
        for cycle in 21..=30u64 {
            rec.record_cycle(cycle, false, Some(Duration::from_secs(1)));
        }

        let snapshot = rec.snapshot();
        assert_eq!(snapshot.stats.total_cycles, 30);
        assert_eq!(snapshot.recent_success_rate, 0.0);
        assert_eq!(snapshot.durations.recent_average_secs, Some(1.0));
        let overall = snapshot.durations.average_secs.expect("average present");
        assert!(overall > 1.0 && overall < 4.0);
    }

    #[test]
    fn report_uptime_reflects_the_injected_clock() {
        use crate::clock::MockClock;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let clock = Arc::new(MockClock::new(Utc::now()));
        let mut rec = CycleRecorder::new(settings(1000, 0.5, 10), clock.clone(), tx);

        clock.advance(chrono::Duration::hours(2));
        for cycle in 1..=10u64 {
            rec.record_cycle(cycle, true, None);
        }

        let events = drain(&mut rx);
        let report = events
            .iter()
            .find_map(|e| match e {
                MonitorEvent::PeriodicReport(report) => Some(report),
                _ => None,
            })
            .expect("report at the boundary");
        assert_eq!(report.uptime, Duration::from_secs(7200));
    }

    #[test]
    fn regressed_cycle_number_is_still_accounted() {
        let (mut rec, _rx) = recorder(1000, 0.1, 10_000);
        rec.record_cycle(5, true, None);
        rec.record_cycle(3, true, None);
        assert_eq!(rec.stats().total_cycles, 2);
    }
}
