use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a log entry. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    /// Parse a stored level name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "critical" => Some(LogLevel::Critical),
            _ => None,
        }
    }

    /// Whether writing at this level asks the flush loop to run right away.
    pub fn flushes_immediately(&self) -> bool {
        *self >= LogLevel::Warn
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subsystem a log entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    System,
    Detector,
    Download,
    Thumbnail,
    Orchestrator,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::System => "system",
            LogCategory::Detector => "detector",
            LogCategory::Download => "download",
            LogCategory::Thumbnail => "thumbnail",
            LogCategory::Orchestrator => "orchestrator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(LogCategory::System),
            "detector" => Some(LogCategory::Detector),
            "download" => Some(LogCategory::Download),
            "thumbnail" => Some(LogCategory::Thumbnail),
            "orchestrator" => Some(LogCategory::Orchestrator),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single immutable record in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub category: LogCategory,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Filter for querying the in-memory log buffer.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub category: Option<LogCategory>,
    pub level: Option<LogLevel>,
    pub min_level: Option<LogLevel>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Keep only the newest `limit` matches. `None` returns every match.
    pub limit: Option<usize>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category: LogCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = Some(level);
        self
    }

    pub fn with_time_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(category) = self.category {
            if entry.category != category {
                return false;
            }
        }
        if let Some(level) = self.level {
            if entry.level != level {
                return false;
            }
        }
        if let Some(min) = self.min_level {
            if entry.level < min {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        true
    }
}

/// Time window covered by an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportPeriod {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub days: u32,
}

/// Bundle produced by [`EventLog::export`](super::EventLog::export).
///
/// Writing it anywhere is the caller's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogExport {
    pub exported_at: DateTime<Utc>,
    pub period: ExportPeriod,
    pub count: usize,
    pub entries: Vec<LogEntry>,
}
