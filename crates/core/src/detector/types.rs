//! Printer observation types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status the detector treats as "a job is running".
pub const PRINTING_STATUS: &str = "printing";

/// A printer status report, pushed by the printer integration or returned by a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterStatus {
    pub printer_id: String,
    /// Free-form status string. Only equality with `"printing"` is meaningful.
    pub status: String,
    #[serde(default)]
    pub current_job: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl PrinterStatus {
    pub fn new(printer_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            printer_id: printer_id.into(),
            status: status.into(),
            current_job: None,
            name: None,
        }
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.current_job = Some(job.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_printing(&self) -> bool {
        self.status == PRINTING_STATUS
    }

    /// Display name, falling back to the printer id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.printer_id)
    }
}

/// Last known state of one printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterObservation {
    pub printer_id: String,
    pub status: String,
    pub current_job: Option<String>,
    pub name: Option<String>,
    pub last_update: DateTime<Utc>,
}

/// Transition detected between two consecutive observations of a printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEdge {
    None,
    JobStarted,
    JobCompleted,
}

impl JobEdge {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEdge::None => "none",
            JobEdge::JobStarted => "job_started",
            JobEdge::JobCompleted => "job_completed",
        }
    }
}

impl std::fmt::Display for JobEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the detector did with one status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Detection {
    /// No edge; nothing to do.
    Unchanged,
    /// A job started and a download task was queued.
    DownloadQueued { task_id: String },
    /// A job started but auto-detection is disabled.
    DetectionDisabled,
    /// A job started but the download queue rejected the task.
    Rejected { reason: String },
    /// A job finished.
    JobCompleted,
}
