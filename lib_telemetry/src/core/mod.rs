//! # Core Engine Module
//!
//! The reconciliation engine proper. Components, leaf first:
//!
//! - **`readings`**: latest reading per `(device, receiver)` pair.
//! - **`arbitration`**: pure selection of the best reading for one device.
//! - **`devices`**: live records, offline archive and per-device history.
//! - **`receivers`**: receiver liveness and counters.
//! - **`lifecycle`**: the shared liveness thresholds and the periodic sweep.
//! - **`stats`**: totals recomputed from registry state, rolling snapshots.
//! - **`engine`**: [`TelemetryEngine`], the one object that owns all of the above.
//! - **`views`**: read-only projections served by the dashboard API.

/// Pure best-reading selection.
pub mod arbitration;
/// Live records, offline archive and device history.
pub mod devices;
/// The state owner exposing ingestion, sweep, statistics and history operations.
pub mod engine;
/// Liveness thresholds and the lifecycle sweep.
pub mod lifecycle;
/// Per-device, per-receiver reading store.
pub mod readings;
/// Receiver liveness registry.
pub mod receivers;
/// System totals and the rolling snapshot history.
pub mod stats;
/// Read models for the HTTP API.
pub mod views;

pub use arbitration::{select_best, ScoringPolicy, Selection};
pub use devices::{DeviceRegistry, LiveDevice, Placement};
pub use engine::{EngineSettings, IngestSummary, TelemetryEngine};
pub use lifecycle::{Liveness, SweepReport};
pub use readings::ReadingStore;
pub use receivers::ReceiverRegistry;
pub use stats::SnapshotHistory;
