//! Queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry and backoff settings shared by both queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts given to newly created tasks.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds). Doubles on each further failure.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound on the retry delay (milliseconds).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    5_000 // 5 seconds
}

fn default_max_delay() -> u64 {
    60_000 // 1 minute
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Delay before re-queueing a task that has failed `attempts` times:
    /// `min(base * 2^(attempts - 1), max)`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// How strictly `enqueue` rejects duplicates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Reject a task whose id is queued, processing or retrying, or which
    /// completed or failed within the retention window. Cancelled ids may be reused.
    #[default]
    ExactId,
    /// Additionally reject a task when the same printer already has an active
    /// task of the same kind.
    OneActivePerPrinter,
}

/// Configuration for one queue instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum tasks executing at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// How often the scheduler tick runs (milliseconds).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// How often finished tasks are swept (milliseconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// How long completed, failed and cancelled tasks are kept (hours).
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub dedup: DedupPolicy,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_tick_interval() -> u64 {
    1_000 // 1 second
}

fn default_sweep_interval() -> u64 {
    3_600_000 // hourly
}

fn default_retention_hours() -> u32 {
    24
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            tick_interval_ms: default_tick_interval(),
            sweep_interval_ms: default_sweep_interval(),
            retention_hours: default_retention_hours(),
            retry: RetryPolicy::default(),
            dedup: DedupPolicy::default(),
        }
    }
}
