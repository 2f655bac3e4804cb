//! Environment health monitoring.
//!
//! The `probe` module defines the [`Probe`] capability and the in-tree memory
//! probe; browser and network probes are supplied by the embedding
//! application. The `supervisor` module runs all registered probes
//! concurrently, isolates per-probe failures, and aggregates a
//! [`HealthVerdict`].

pub mod probe;
pub mod supervisor;

pub use probe::{MemoryProbe, MockProbe, Probe};
pub use supervisor::{HealthSupervisor, HealthVerdict, ProbeOutcome};
