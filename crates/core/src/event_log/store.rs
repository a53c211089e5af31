use chrono::{DateTime, Utc};
use thiserror::Error;

use super::LogEntry;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Durable destination for flushed log entries.
pub trait LogSink: Send + Sync {
    /// Persist a batch of entries, oldest first.
    fn persist(&self, entries: &[LogEntry]) -> Result<(), LogError>;

    /// Delete persisted entries older than `cutoff`, returns how many were removed.
    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, LogError>;
}
