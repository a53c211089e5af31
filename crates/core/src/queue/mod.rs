//! Priority task queue with bounded concurrency and retry backoff.
//!
//! The same [`TaskQueue`] type backs the download queue and the thumbnail
//! queue; only the executor and configuration differ.

mod config;
mod runner;
mod state;

pub use config::{DedupPolicy, QueueConfig, RetryPolicy};
pub use runner::{DrainReport, SuccessHook, TaskQueue};
