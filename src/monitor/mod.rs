//! Cycle accounting and threshold alerting.
//!
//! The `recorder` module owns all mutable alerting state and converts a stream
//! of per-cycle outcomes into edge-triggered [`events::MonitorEvent`] values.
//! The `events` module defines those values and their plain-text rendering;
//! actual delivery happens in [`crate::notify`], off the recorder's critical
//! path.

pub mod events;
pub mod recorder;

pub use events::MonitorEvent;
pub use recorder::{CumulativeStats, CycleRecord, CycleRecorder, StatsSnapshot};
