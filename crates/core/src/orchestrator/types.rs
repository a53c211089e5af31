//! Types for the orchestrator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detector::PrinterSource;
use crate::event_log::LogSink;
use crate::queue::DrainReport;
use crate::task::{Executor, QueueStats};

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No queue knows the task.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Queue rejected the operation.
    #[error(transparent)]
    Queue(#[from] crate::task::QueueError),

    /// Event log sink error.
    #[error("event log error: {0}")]
    Log(#[from] crate::event_log::LogError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("orchestrator already running")]
    AlreadyRunning,

    #[error("orchestrator not running")]
    NotRunning,

    /// The push channel was consumed by an earlier run.
    #[error("orchestrator was stopped and cannot be restarted")]
    Stopped,
}

/// External collaborators the orchestrator wires together.
#[derive(Clone)]
pub struct Collaborators {
    pub download_executor: Arc<dyn Executor>,
    pub thumbnail_executor: Arc<dyn Executor>,
    /// Poll fallback. Without one, only pushed status events are seen.
    pub printer_source: Option<Arc<dyn PrinterSource>>,
    /// Durable log storage. Overrides `database.path` when set.
    pub log_sink: Option<Arc<dyn LogSink>>,
}

impl Collaborators {
    pub fn new(download_executor: Arc<dyn Executor>, thumbnail_executor: Arc<dyn Executor>) -> Self {
        Self {
            download_executor,
            thumbnail_executor,
            printer_source: None,
            log_sink: None,
        }
    }

    pub fn with_printer_source(mut self, source: Arc<dyn PrinterSource>) -> Self {
        self.printer_source = Some(source);
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }
}

/// Aggregate statistics across both queues and the detector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStats {
    /// Whether the background loops are running.
    pub running: bool,
    pub auto_detection_enabled: bool,
    /// Printers observed at least once.
    pub tracked_printers: usize,
    pub downloads: QueueStats,
    pub thumbnails: QueueStats,
}

/// Outcome of a graceful shutdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub downloads: DrainReport,
    pub thumbnails: DrainReport,
    /// Entries written by the final log flush.
    pub log_entries_flushed: usize,
}
