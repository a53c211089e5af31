//! Error types for task submission and execution.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{QueueKind, TaskStatus};

/// Reasons a task is rejected at enqueue time.
///
/// These never count against a task's attempts; nothing is queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("task id must not be empty")]
    MissingId,

    #[error("task {id} is missing required field: {field}")]
    MissingField { id: String, field: &'static str },

    #[error("task {id} has no attempts left ({attempts}/{max_attempts})")]
    NoAttemptsLeft {
        id: String,
        attempts: u32,
        max_attempts: u32,
    },

    #[error("task {id} must be queued to be submitted, found {status}")]
    InvalidStatus { id: String, status: TaskStatus },

    #[error("{kind} task {id} cannot be submitted to the {queue} queue")]
    WrongQueue {
        id: String,
        kind: &'static str,
        queue: QueueKind,
    },

    #[error("task {0} already exists in the queue")]
    Duplicate(String),

    #[error("printer {printer_id} already has an active {kind} task: {existing_id}")]
    PrinterBusy {
        printer_id: String,
        kind: &'static str,
        existing_id: String,
    },
}

/// Errors returned by queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task {id} already finished with status {status}")]
    AlreadyFinished { id: String, status: TaskStatus },

    #[error("{0} queue is shutting down")]
    Closed(QueueKind),
}

/// Closed vocabulary of execution failure kinds reported by executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    NotPrinting,
    NoFile,
    NoActiveJob,
    Timeout,
    ConnectionError,
    FileNotFound,
    AccessDenied,
    Error,
    Failed,
    Unknown,
}

/// How a failure kind is expected to behave on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network-level trouble, expected to clear up.
    Transient,
    /// Printer-side condition that may change before the next attempt.
    Domain,
    /// Executor reported a generic failure.
    Generic,
    /// Status outside the known vocabulary.
    Unknown,
}

impl ExecutionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionErrorKind::NotPrinting => "not_printing",
            ExecutionErrorKind::NoFile => "no_file",
            ExecutionErrorKind::NoActiveJob => "no_active_job",
            ExecutionErrorKind::Timeout => "timeout",
            ExecutionErrorKind::ConnectionError => "connection_error",
            ExecutionErrorKind::FileNotFound => "file_not_found",
            ExecutionErrorKind::AccessDenied => "access_denied",
            ExecutionErrorKind::Error => "error",
            ExecutionErrorKind::Failed => "failed",
            ExecutionErrorKind::Unknown => "unknown",
        }
    }

    /// Map a raw executor status onto the vocabulary. Anything unrecognized is `Unknown`.
    pub fn from_status(status: &str) -> Self {
        match status {
            "not_printing" => ExecutionErrorKind::NotPrinting,
            "no_file" => ExecutionErrorKind::NoFile,
            "no_active_job" => ExecutionErrorKind::NoActiveJob,
            "timeout" => ExecutionErrorKind::Timeout,
            "connection_error" => ExecutionErrorKind::ConnectionError,
            "file_not_found" => ExecutionErrorKind::FileNotFound,
            "access_denied" => ExecutionErrorKind::AccessDenied,
            "error" => ExecutionErrorKind::Error,
            "failed" => ExecutionErrorKind::Failed,
            _ => ExecutionErrorKind::Unknown,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ExecutionErrorKind::Timeout | ExecutionErrorKind::ConnectionError => {
                ErrorClass::Transient
            }
            ExecutionErrorKind::NotPrinting
            | ExecutionErrorKind::NoFile
            | ExecutionErrorKind::NoActiveJob
            | ExecutionErrorKind::FileNotFound
            | ExecutionErrorKind::AccessDenied => ErrorClass::Domain,
            ExecutionErrorKind::Error | ExecutionErrorKind::Failed => ErrorClass::Generic,
            ExecutionErrorKind::Unknown => ErrorClass::Unknown,
        }
    }
}

impl std::fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by an executor. Always folded into task state, never
/// surfaced to queue callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
    /// Raw status string, kept when it did not map onto a known kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_status: Option<String>,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw_status: None,
        }
    }

    /// Build from a raw executor status, keeping the raw text when it is not recognized.
    pub fn from_status(status: &str, message: impl Into<String>) -> Self {
        let kind = ExecutionErrorKind::from_status(status);
        Self {
            kind,
            message: message.into(),
            raw_status: (kind == ExecutionErrorKind::Unknown).then(|| status.to_string()),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::ConnectionError, message)
    }

    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_known_kinds() {
        assert_eq!(
            ExecutionErrorKind::from_status("not_printing"),
            ExecutionErrorKind::NotPrinting
        );
        assert_eq!(
            ExecutionErrorKind::from_status("connection_error"),
            ExecutionErrorKind::ConnectionError
        );
        assert_eq!(
            ExecutionErrorKind::from_status("failed"),
            ExecutionErrorKind::Failed
        );
    }

    #[test]
    fn test_unknown_status_keeps_raw_text() {
        let err = ExecutionError::from_status("printer_on_fire", "weird");
        assert_eq!(err.kind, ExecutionErrorKind::Unknown);
        assert_eq!(err.raw_status.as_deref(), Some("printer_on_fire"));
        assert_eq!(err.class(), ErrorClass::Unknown);

        let known = ExecutionError::from_status("timeout", "slow");
        assert!(known.raw_status.is_none());
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(ExecutionErrorKind::Timeout.class(), ErrorClass::Transient);
        assert_eq!(
            ExecutionErrorKind::ConnectionError.class(),
            ErrorClass::Transient
        );
        assert_eq!(ExecutionErrorKind::NoActiveJob.class(), ErrorClass::Domain);
        assert_eq!(ExecutionErrorKind::AccessDenied.class(), ErrorClass::Domain);
        assert_eq!(ExecutionErrorKind::Error.class(), ErrorClass::Generic);
    }

    #[test]
    fn test_error_display() {
        let err = ExecutionError::timeout("printer did not answer");
        assert_eq!(err.to_string(), "timeout: printer did not answer");

        let err = QueueError::from(ValidationError::Duplicate("task-1".to_string()));
        assert_eq!(err.to_string(), "task task-1 already exists in the queue");

        let err = QueueError::AlreadyFinished {
            id: "task-2".to_string(),
            status: TaskStatus::Completed,
        };
        assert_eq!(
            err.to_string(),
            "task task-2 already finished with status completed"
        );
    }

    #[test]
    fn test_execution_error_serialization() {
        let err = ExecutionError::new(ExecutionErrorKind::FileNotFound, "gone");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "file_not_found");
        assert!(json.get("raw_status").is_none());
    }
}
