//! Unit-of-work abstraction driven by the work loop.
//!
//! The monitor is agnostic to what a cycle actually does. A [`Worker`]
//! distinguishes two failure shapes: `Ok` with `success = false` is a recorded
//! failure (the monitor keeps running and the alerting state machine sees it),
//! while `Err` is unrecoverable and triggers fail-together shutdown.

use crate::error::AppResult;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Result of one executed cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleOutcome {
    /// Whether the cycle's work succeeded.
    pub success: bool,
    /// How long the work took, when the worker measures it.
    pub duration: Option<Duration>,
}

/// One unit of monitored work, executed once per cycle.
#[async_trait]
pub trait Worker: Send {
    /// Executes cycle `cycle` and reports its outcome.
    async fn run_cycle(&mut self, cycle: u64) -> AppResult<CycleOutcome>;
}

/// Demo worker with randomized outcomes so the binary runs end to end
/// without a real workload attached.
pub struct SimulatedWorker {
    success_probability: f64,
}

impl SimulatedWorker {
    /// Creates a worker that succeeds with the given probability.
    pub fn new(success_probability: f64) -> Self {
        Self {
            success_probability: success_probability.clamp(0.0, 1.0),
        }
    }
}

impl Default for SimulatedWorker {
    fn default() -> Self {
        Self::new(0.95)
    }
}

#[async_trait]
impl Worker for SimulatedWorker {
    async fn run_cycle(&mut self, cycle: u64) -> AppResult<CycleOutcome> {
        // Thread-local RNG is not Send; sample before the await point.
        let (success, work) = {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            (
                rng.gen_bool(self.success_probability),
                Duration::from_millis(rng.gen_range(50..500)),
            )
        };

        tokio::time::sleep(work).await;
        debug!(cycle, success, duration_ms = work.as_millis() as u64, "simulated cycle");
        Ok(CycleOutcome {
            success,
            duration: Some(work),
        })
    }
}
