//! Task supervision and graceful shutdown.
//!
//! [`TaskSupervisor`] owns the monitor's periodic loops as independently
//! cancellable tasks in a [`JoinSet`], all watching one shutdown channel.
//! Every long-running wait in a supervised task goes through
//! [`ShutdownSignal::sleep`] or a `select!` against
//! [`ShutdownSignal::cancelled`], so cancellation is observed at each
//! suspension point.
//!
//! Shutdown is graceful-with-deadline: tasks get `timeout` to observe the
//! signal and return; stragglers are aborted. Cancellation-induced
//! termination is not re-raised as an application error; only panics surface,
//! as [`MonitorError::FatalSupervisor`].

use crate::error::{AppResult, MonitorError};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{info, warn};

/// A task's view of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. If the supervisor is gone without
    /// ever requesting shutdown, this pends forever.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleeps for `duration`, waking early on shutdown.
    ///
    /// Returns `true` if the full duration elapsed, `false` if interrupted.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }

    /// A signal detached from any supervisor, paired with its sender.
    ///
    /// Useful for driving a supervised component directly in tests.
    pub fn standalone() -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { rx }, tx)
    }
}

/// Owns N cancellable tasks under one shutdown scope.
pub struct TaskSupervisor {
    shutdown_tx: watch::Sender<bool>,
    tasks: JoinSet<AppResult<()>>,
    // Task names keyed by join-set id, so panicked and aborted tasks are
    // still reported under the name they were spawned with.
    names: HashMap<task::Id, String>,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisor {
    /// Creates a supervisor with no tasks.
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: JoinSet::new(),
            names: HashMap::new(),
        }
    }

    /// A fresh view of the shutdown channel.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    /// Spawns a named task under this supervisor's shutdown scope.
    pub fn spawn<F, Fut>(&mut self, name: &str, task: F)
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let signal = self.signal();
        let handle = self.tasks.spawn(task(signal));
        self.names.insert(handle.id(), name.to_string());
    }

    /// Requests shutdown of all owned tasks. Idempotent and safe to call
    /// concurrently with normal operation.
    pub fn request_shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        info!("shutdown requested");
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Waits for the next task to finish.
    ///
    /// Returns `None` when no tasks remain. Panicked tasks surface as
    /// [`MonitorError::FatalSupervisor`]; aborted tasks are reported as
    /// clean exits (cancellation is not an application error).
    pub async fn join_next(&mut self) -> Option<(String, AppResult<()>)> {
        let joined = self.tasks.join_next_with_id().await?;
        Some(self.map_joined(joined))
    }

    /// Requests shutdown and joins all tasks within `timeout`, aborting any
    /// that do not stop in time.
    pub async fn shutdown(mut self, timeout: Duration) -> Vec<(String, AppResult<()>)> {
        self.request_shutdown();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut outcomes = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, self.tasks.join_next_with_id()).await {
                Ok(Some(joined)) => {
                    let outcome = self.map_joined(joined);
                    outcomes.push(outcome);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(?timeout, "tasks did not stop in time, aborting the rest");
                    self.tasks.abort_all();
                    while let Some(joined) = self.tasks.join_next_with_id().await {
                        let outcome = self.map_joined(joined);
                        outcomes.push(outcome);
                    }
                    break;
                }
            }
        }

        for (name, result) in &outcomes {
            match result {
                Ok(()) => info!(task = %name, "task stopped"),
                Err(err) => warn!(task = %name, %err, "task failed during shutdown"),
            }
        }
        outcomes
    }

    fn map_joined(
        &mut self,
        joined: Result<(task::Id, AppResult<()>), JoinError>,
    ) -> (String, AppResult<()>) {
        match joined {
            Ok((id, result)) => (self.take_name(id), result),
            Err(err) if err.is_cancelled() => (self.take_name(err.id()), Ok(())),
            Err(err) => {
                let name = self.take_name(err.id());
                let result = Err(MonitorError::FatalSupervisor {
                    task: name.clone(),
                    message: err.to_string(),
                });
                (name, result)
            }
        }
    }

    fn take_name(&mut self, id: task::Id) -> String {
        self.names
            .remove(&id)
            .unwrap_or_else(|| "unknown".to_string())
    }
}
