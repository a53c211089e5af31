//! In-memory log sink for testing.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::event_log::{LogEntry, LogError, LogSink};

/// Log sink that keeps persisted entries in a vector.
///
/// Can be switched into a failing mode to exercise flush retries.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
    failing: AtomicBool,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every persist and purge fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Get all persisted entries.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), LogError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LogError::Database("memory sink set to fail".to_string()));
        }
        Ok(())
    }
}

impl LogSink for MemoryLogSink {
    fn persist(&self, entries: &[LogEntry]) -> Result<(), LogError> {
        self.check()?;
        self.entries.lock().unwrap().extend_from_slice(entries);
        Ok(())
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, LogError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        Ok(before - entries.len())
    }
}
