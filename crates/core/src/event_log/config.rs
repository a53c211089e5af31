//! Event log configuration.

use serde::{Deserialize, Serialize};

use super::LogLevel;

/// Configuration for the structured event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Entries below this level are dropped at write time.
    #[serde(default = "default_min_level")]
    pub min_level: LogLevel,

    /// Maximum entries kept in memory. Oldest are evicted first.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Entries older than this are removed by the retention sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// How often debug/info entries are batch-flushed to the sink (milliseconds).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// How often the retention sweep runs (milliseconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

fn default_min_level() -> LogLevel {
    LogLevel::Info
}

fn default_max_entries() -> usize {
    10_000
}

fn default_retention_days() -> u32 {
    30
}

fn default_flush_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_sweep_interval() -> u64 {
    86_400_000 // daily
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            min_level: default_min_level(),
            max_entries: default_max_entries(),
            retention_days: default_retention_days(),
            flush_interval_ms: default_flush_interval(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}
