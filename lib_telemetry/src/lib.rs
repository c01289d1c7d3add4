//! # lib_telemetry
//!
//! The reconciliation engine behind the StepMesh aggregator. Receivers overhear
//! step-counting devices over a lossy broadcast link and post what they saw in
//! batches; this crate turns those overlapping, partially stale reports into one
//! authoritative record per device, tracks device and receiver liveness, and
//! keeps per-device history across disconnects and restarts.
//!
//! ## Modules
//!
//! - **`model`**: the plain data records shared by every layer.
//! - **`core`**: the reading store, arbitration, registries, lifecycle sweep,
//!   statistics and the [`core::TelemetryEngine`] that owns them all.
//! - **`ingest`**: parsing and validation of receiver batch reports.
//! - **`persistence`**: the three on-disk documents and their atomic writes.
//! - **`http`** *(feature `server`)*: axum routes over a shared engine.
//! - **`tasks`** *(feature `server`)*: the independent periodic timers.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod core;
pub mod ingest;
pub mod model;
pub mod persistence;

#[cfg(feature = "server")]
pub mod http;
#[cfg(feature = "server")]
pub mod tasks;

pub use crate::core::{EngineSettings, TelemetryEngine};
pub use crate::ingest::{parse_batch, BatchReport, IngestError};
pub use crate::persistence::{PersistError, PersistedState, StateStore};
