use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;

use crate::detector::DetectorConfig;
use crate::event_log::EventLogConfig;
use crate::queue::{DedupPolicy, QueueConfig, RetryPolicy};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub thumbnails: ThumbnailsConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub log: EventLogConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Download queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadsConfig {
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent: usize,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent_downloads(),
        }
    }
}

fn default_max_concurrent_downloads() -> usize {
    2
}

/// Thumbnail queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThumbnailsConfig {
    #[serde(default = "default_max_concurrent_thumbnails")]
    pub max_concurrent: usize,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent_thumbnails(),
        }
    }
}

fn default_max_concurrent_thumbnails() -> usize {
    1
}

/// Scheduling settings shared by both queues
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TasksConfig {
    /// How long finished tasks are kept (hours).
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,

    /// Scheduler tick (milliseconds).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Retention sweep interval (milliseconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// How long shutdown waits for running tasks (milliseconds).
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,

    /// Reject a download when the same printer already has one of the same kind active.
    #[serde(default)]
    pub one_active_per_printer: bool,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            tick_interval_ms: default_tick_interval(),
            sweep_interval_ms: default_sweep_interval(),
            shutdown_grace_ms: default_shutdown_grace(),
            one_active_per_printer: false,
        }
    }
}

fn default_retention_hours() -> u32 {
    24
}

fn default_tick_interval() -> u64 {
    1_000
}

fn default_sweep_interval() -> u64 {
    3_600_000
}

fn default_shutdown_grace() -> u64 {
    30_000
}

/// Database configuration
///
/// Without a path, the event log is kept in memory only.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    fn queue_config(&self, max_concurrent: usize) -> QueueConfig {
        QueueConfig {
            max_concurrent,
            tick_interval_ms: self.tasks.tick_interval_ms,
            sweep_interval_ms: self.tasks.sweep_interval_ms,
            retention_hours: self.tasks.retention_hours,
            retry: self.retry.clone(),
            dedup: if self.tasks.one_active_per_printer {
                DedupPolicy::OneActivePerPrinter
            } else {
                DedupPolicy::ExactId
            },
        }
    }

    /// Settings for the download queue.
    pub fn download_queue(&self) -> QueueConfig {
        self.queue_config(self.downloads.max_concurrent)
    }

    /// Settings for the thumbnail queue.
    pub fn thumbnail_queue(&self) -> QueueConfig {
        // Thumbnails carry no printer id, so the dedup policy never applies.
        QueueConfig {
            dedup: DedupPolicy::ExactId,
            ..self.queue_config(self.thumbnails.max_concurrent)
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.tasks.shutdown_grace_ms)
    }

    /// Short SHA-256 fingerprint of the effective configuration, for startup logs.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        let digest = format!("{:x}", Sha256::digest(&encoded));
        digest[..16].to_string()
    }
}
