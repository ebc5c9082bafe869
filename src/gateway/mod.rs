//! Gateway service orchestrator.
//!
//! - `core`: Gateway struct and construction
//! - `tasks`: ingestion, batch processing and the spawned background tasks
//! - `tests`: unit tests for the `*_once` helpers

pub mod core;
pub mod tasks;

pub use core::{BatchStatus, Gateway, ShutdownReport, TelemetryAck};
