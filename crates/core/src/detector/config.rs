//! Detector configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the auto-detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Create download tasks on job-start edges.
    /// When disabled, edges are still tracked and logged.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How often to poll the printer source (milliseconds).
    /// A fallback for missed push events.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    30_000 // 30 seconds
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}
