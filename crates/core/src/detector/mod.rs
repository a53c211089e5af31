//! Printer job detection.
//!
//! [`PrinterObservationTracker`] remembers the last status of each printer and
//! reports `idle -> printing` and `printing -> idle` edges. [`AutoDetector`]
//! feeds it from pushed events and a periodic poll, and turns job-start edges
//! into download tasks.

mod config;
mod runner;
mod source;
mod tracker;
mod types;

pub use config::DetectorConfig;
pub use runner::AutoDetector;
pub use source::{PrinterSource, SourceError};
pub use tracker::PrinterObservationTracker;
pub use types::*;
