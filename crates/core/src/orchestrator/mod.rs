//! Composition root for automated job detection and scheduling.
//!
//! The orchestrator wires the engine together:
//! - **Detection**: printer status (push and poll) -> download tasks
//! - **Downloads**: bounded concurrency, retried with backoff
//! - **Thumbnails**: queued for every download that arrives without a preview

mod runner;
mod types;

pub use runner::Orchestrator;
pub use types::{Collaborators, OrchestratorError, OrchestratorStats, ShutdownReport};
