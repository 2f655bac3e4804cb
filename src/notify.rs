//! Notification delivery, off the recorder's critical path.
//!
//! The recorder produces [`MonitorEvent`] values into a channel; the emitter
//! task spawned here renders and delivers them through a [`NotificationSink`].
//! Delivery failures are logged as [`MonitorError::NotificationDelivery`] and
//! never propagate into alerting state. After every periodic-report attempt,
//! success or failure, the emitter releases the recorder's in-flight lock so
//! the next report boundary can fire.

use crate::error::{AppResult, MonitorError};
use crate::monitor::events::MonitorEvent;
use crate::supervisor::ShutdownSignal;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Transport capability for alert and report notifications.
///
/// Returning `Ok(false)` or `Err` is a delivery failure; both are logged by
/// the emitter and neither is fatal.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers one notification to the given recipients.
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> AppResult<bool>;
}

/// Sink that writes notifications to the log. Used by the binary when no real
/// transport is wired in.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> AppResult<bool> {
        info!(subject, recipients = ?recipients, "notification:\n{body}");
        Ok(true)
    }
}

/// Sink that records calls for tests and wiring.
#[derive(Default)]
pub struct MockSink {
    sent: Mutex<Vec<(String, String)>>,
    fail_next: AtomicBool,
}

impl MockSink {
    /// Creates an empty mock sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent send report delivery failure.
    pub fn set_failing(&self, failing: bool) {
        self.fail_next.store(failing, Ordering::SeqCst);
    }

    /// Subjects and bodies of all sends observed so far.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl NotificationSink for MockSink {
    async fn send(&self, subject: &str, body: &str, _recipients: &[String]) -> AppResult<bool> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((subject.to_string(), body.to_string()));
        Ok(!self.fail_next.load(Ordering::SeqCst))
    }
}

/// Consumes monitor events and delivers them through the sink.
pub struct Emitter {
    sink: Arc<dyn NotificationSink>,
    recipients: Vec<String>,
    send_timeout: Duration,
    report_flag: Arc<AtomicBool>,
}

impl Emitter {
    /// Creates an emitter. `report_flag` is the recorder's in-flight lock.
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        recipients: Vec<String>,
        send_timeout: Duration,
        report_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            sink,
            recipients,
            send_timeout,
            report_flag,
        }
    }

    /// Runs the delivery loop until shutdown is requested or all event
    /// producers are gone. Pending events are drained before exiting so a
    /// best-effort crash notice still goes out during shutdown.
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<MonitorEvent>,
        mut shutdown: ShutdownSignal,
    ) -> AppResult<()> {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.deliver(event).await,
                    None => break,
                },
                _ = shutdown.cancelled() => {
                    while let Ok(event) = events.try_recv() {
                        self.deliver(event).await;
                    }
                    break;
                }
            }
        }
        info!("emitter stopped");
        Ok(())
    }

    async fn deliver(&self, event: MonitorEvent) {
        let is_report = event.is_periodic_report();
        let subject = event.subject();
        let body = event.body();

        info!(%subject, "sending notification");
        let outcome = tokio::time::timeout(
            self.send_timeout,
            self.sink.send(&subject, &body, &self.recipients),
        )
        .await;

        let result: AppResult<bool> = match outcome {
            Ok(result) => result,
            Err(_) => Err(MonitorError::Timeout(self.send_timeout)),
        };

        match result {
            Ok(true) => info!(%subject, "notification delivered"),
            Ok(false) => {
                let err = MonitorError::NotificationDelivery(format!(
                    "sink declined delivery of '{subject}'"
                ));
                error!(%err, "notification not delivered");
            }
            Err(err) => {
                error!(%err, %subject, "notification send failed");
            }
        }

        // Fire-and-confirm: the report boundary reopens regardless of outcome,
        // but a failed send is not retried here (re-sending on a false
        // negative would duplicate the report).
        if is_report {
            self.report_flag.store(false, Ordering::SeqCst);
        }
    }
}

/// Convenience: emitter stopping only when the channel closes (no shutdown
/// signal). Used by tests that drive the channel directly.
pub async fn drain_events(emitter: Emitter, events: mpsc::UnboundedReceiver<MonitorEvent>) {
    let (signal, _guard) = ShutdownSignal::standalone();
    if let Err(err) = emitter.run(events, signal).await {
        warn!(%err, "emitter terminated with error");
    }
}
