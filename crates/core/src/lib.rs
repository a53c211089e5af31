pub mod clock;
pub mod config;
pub mod detector;
pub mod event_log;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod task;
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    DownloadsConfig, TasksConfig, ThumbnailsConfig,
};
pub use detector::{
    AutoDetector, Detection, DetectorConfig, JobEdge, PrinterObservation,
    PrinterObservationTracker, PrinterSource, PrinterStatus, SourceError,
};
pub use event_log::{
    EventLog, EventLogConfig, LogCategory, LogEntry, LogError, LogExport, LogFilter, LogLevel,
    LogSink, SqliteLogSink,
};
pub use orchestrator::{
    Collaborators, Orchestrator, OrchestratorError, OrchestratorStats, ShutdownReport,
};
pub use queue::{DedupPolicy, DrainReport, QueueConfig, RetryPolicy, SuccessHook, TaskQueue};
pub use task::{
    DownloadOutcome, ErrorClass, ExecutionError, ExecutionErrorKind, Executor, Priority,
    QueueError, QueueKind, QueueStats, Task, TaskKind, TaskResult, TaskStatus, TaskUpdate,
    ThumbnailOutcome, ValidationError,
};
