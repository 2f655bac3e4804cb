//! Long-running cycle monitor with threshold alerting and supervised health
//! checks.
//!
//! The crate is organized around three cooperating loops:
//!
//! - a work loop that executes a [`worker::Worker`] once per cycle and feeds
//!   outcomes into the [`monitor::CycleRecorder`] state machine, which raises
//!   deduplicated, edge-triggered alerts and periodic reports;
//! - a health loop that runs registered [`health::Probe`]s concurrently under
//!   the [`health::HealthSupervisor`], with per-probe retry and timeout
//!   policy;
//! - an emitter loop that delivers [`monitor::MonitorEvent`]s through a
//!   [`notify::NotificationSink`] without ever blocking cycle accounting.
//!
//! All three run as cancellable tasks under one [`supervisor::TaskSupervisor`]
//! and are wired together by [`app::Application`].

pub mod app;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod monitor;
pub mod notify;
pub mod retry;
pub mod supervisor;
pub mod worker;

pub use app::Application;
pub use config::Settings;
pub use error::{AppResult, MonitorError};
