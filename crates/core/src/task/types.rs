//! Task model shared by the download and thumbnail queues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ExecutionError;

/// Attempts allowed when a task does not say otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Dispatch priority. Declaration order is dispatch order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Lower rank dispatches first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which queue instance serves a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Download,
    Thumbnail,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Download => "download",
            QueueKind::Thumbnail => "thumbnail",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific payload of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Fetch the file of the job a printer is currently running.
    CurrentJobDownload {
        printer_id: String,
        printer_name: String,
        #[serde(default)]
        job_name: Option<String>,
    },
    /// Fetch a named file stored on a printer.
    PrinterFileDownload {
        printer_id: String,
        printer_name: String,
        filename: String,
    },
    /// Download requested explicitly by a user.
    ManualDownload {
        printer_id: String,
        printer_name: String,
        filename: String,
    },
    /// Render a preview image for a downloaded file.
    ThumbnailGeneration {
        file_id: String,
        filename: String,
        #[serde(default)]
        download_task_id: Option<String>,
    },
}

impl TaskKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            TaskKind::CurrentJobDownload { .. } => "current_job_download",
            TaskKind::PrinterFileDownload { .. } => "printer_file_download",
            TaskKind::ManualDownload { .. } => "manual_download",
            TaskKind::ThumbnailGeneration { .. } => "thumbnail_generation",
        }
    }

    /// The queue this kind of task belongs to.
    pub fn queue(&self) -> QueueKind {
        match self {
            TaskKind::CurrentJobDownload { .. }
            | TaskKind::PrinterFileDownload { .. }
            | TaskKind::ManualDownload { .. } => QueueKind::Download,
            TaskKind::ThumbnailGeneration { .. } => QueueKind::Thumbnail,
        }
    }

    pub fn printer_id(&self) -> Option<&str> {
        match self {
            TaskKind::CurrentJobDownload { printer_id, .. }
            | TaskKind::PrinterFileDownload { printer_id, .. }
            | TaskKind::ManualDownload { printer_id, .. } => Some(printer_id),
            TaskKind::ThumbnailGeneration { .. } => None,
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            TaskKind::CurrentJobDownload { .. } => "job",
            TaskKind::PrinterFileDownload { .. } => "file",
            TaskKind::ManualDownload { .. } => "manual",
            TaskKind::ThumbnailGeneration { .. } => "thumb",
        }
    }
}

/// What a download executor produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub file_id: String,
    pub filename: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    /// Whether the file already carried an embedded preview.
    pub has_thumbnail: bool,
}

/// What a thumbnail executor produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailOutcome {
    pub file_id: String,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
}

/// Result payload stored on a completed task. Opaque to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskResult {
    Download(DownloadOutcome),
    Thumbnail(ThumbnailOutcome),
}

/// A unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub priority: Priority,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When a retrying task becomes eligible for dispatch again.
    #[serde(default)]
    pub retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<ExecutionError>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub auto_triggered: bool,
}

impl Task {
    /// Create a queued task with a fresh id.
    pub fn new(kind: TaskKind, priority: Priority) -> Self {
        let id = format!("{}_{}", kind.id_prefix(), uuid::Uuid::new_v4().simple());
        Self {
            id,
            kind,
            priority,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            last_attempt_at: None,
            retry_at: None,
            last_error: None,
            result: None,
            auto_triggered: false,
        }
    }

    pub fn current_job_download(
        printer_id: impl Into<String>,
        printer_name: impl Into<String>,
        job_name: Option<String>,
        priority: Priority,
    ) -> Self {
        Self::new(
            TaskKind::CurrentJobDownload {
                printer_id: printer_id.into(),
                printer_name: printer_name.into(),
                job_name,
            },
            priority,
        )
    }

    pub fn printer_file_download(
        printer_id: impl Into<String>,
        printer_name: impl Into<String>,
        filename: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self::new(
            TaskKind::PrinterFileDownload {
                printer_id: printer_id.into(),
                printer_name: printer_name.into(),
                filename: filename.into(),
            },
            priority,
        )
    }

    pub fn manual_download(
        printer_id: impl Into<String>,
        printer_name: impl Into<String>,
        filename: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self::new(
            TaskKind::ManualDownload {
                printer_id: printer_id.into(),
                printer_name: printer_name.into(),
                filename: filename.into(),
            },
            priority,
        )
    }

    /// Companion thumbnail task for a finished download.
    ///
    /// Inherits priority and the auto-trigger flag, and points back at the download.
    pub fn thumbnail_for(download: &Task, outcome: &DownloadOutcome) -> Self {
        let mut task = Self::new(
            TaskKind::ThumbnailGeneration {
                file_id: outcome.file_id.clone(),
                filename: outcome.filename.clone(),
                download_task_id: Some(download.id.clone()),
            },
            download.priority,
        );
        task.auto_triggered = download.auto_triggered;
        task
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn auto_triggered(mut self) -> Self {
        self.auto_triggered = true;
        self
    }

    pub fn queue(&self) -> QueueKind {
        self.kind.queue()
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// Point-in-time counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub retrying: usize,
    /// Completed within the retention window.
    pub completed: usize,
    /// Failed within the retention window.
    pub failed: usize,
    /// Cancelled within the retention window.
    pub cancelled: usize,
    pub max_concurrent: usize,
}

/// Notification published on every task transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub queue: QueueKind,
    pub task: Task,
    pub queue_stats: QueueStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let mut priorities = vec![Priority::Low, Priority::Urgent, Priority::Normal, Priority::High];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::Urgent, Priority::High, Priority::Normal, Priority::Low]
        );
        assert!(Priority::Urgent.rank() < Priority::Low.rank());
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_new_task_defaults() {
        let task = Task::current_job_download("p1", "Prusa", None, Priority::High);
        assert!(task.id.starts_with("job_"));
        assert_eq!(task.attempts, 0);
        assert_eq!(task.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(!task.auto_triggered);
        assert_eq!(task.queue(), QueueKind::Download);
        assert_eq!(task.kind.printer_id(), Some("p1"));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Task::manual_download("p1", "Prusa", "a.gcode", Priority::Normal);
        let b = Task::manual_download("p1", "Prusa", "a.gcode", Priority::Normal);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_thumbnail_for_inherits_from_download() {
        let download =
            Task::current_job_download("p1", "Prusa", Some("benchy".to_string()), Priority::Urgent)
                .auto_triggered();
        let outcome = DownloadOutcome {
            file_id: "f-1".to_string(),
            filename: "benchy.gcode".to_string(),
            size_bytes: Some(1024),
            has_thumbnail: false,
        };

        let thumb = Task::thumbnail_for(&download, &outcome);
        assert_eq!(thumb.priority, Priority::Urgent);
        assert!(thumb.auto_triggered);
        assert_eq!(thumb.queue(), QueueKind::Thumbnail);
        assert!(thumb.id.starts_with("thumb_"));
        match &thumb.kind {
            TaskKind::ThumbnailGeneration {
                file_id,
                filename,
                download_task_id,
            } => {
                assert_eq!(file_id, "f-1");
                assert_eq!(filename, "benchy.gcode");
                assert_eq!(download_task_id.as_deref(), Some(download.id.as_str()));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(!TaskStatus::Retrying.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_task_serialization() {
        let task = Task::printer_file_download("p2", "Bambu", "part.3mf", Priority::Low)
            .with_id("file_fixed");
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["id"], "file_fixed");
        assert_eq!(json["kind"]["type"], "printer_file_download");
        assert_eq!(json["priority"], "low");
        assert_eq!(json["status"], "queued");

        let parsed: Task = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, task);
    }
}
