//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Task queues (enqueues, outcomes, retries, execution time)
//! - Auto-detection (job edges, auto-created tasks, poll failures)
//! - Event log (accepted entries, sink failures)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Task Queues
// =============================================================================

/// Tasks accepted by a queue.
pub static TASKS_ENQUEUED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("printwatch_tasks_enqueued_total", "Total tasks accepted"),
        &["queue"], // "download", "thumbnail"
    )
    .unwrap()
});

/// Tasks rejected at enqueue time.
pub static TASKS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("printwatch_tasks_rejected_total", "Total tasks rejected at enqueue"),
        &["queue"],
    )
    .unwrap()
});

/// Tasks that reached a terminal state, by outcome.
pub static TASKS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("printwatch_tasks_finished_total", "Total tasks finished"),
        &["queue", "status"], // "completed", "failed", "cancelled"
    )
    .unwrap()
});

/// Retries scheduled, by failure class.
pub static TASK_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("printwatch_task_retries_total", "Total retries scheduled"),
        &["queue", "class"], // "transient", "domain", "generic", "unknown"
    )
    .unwrap()
});

/// Executor call duration in seconds.
pub static TASK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "printwatch_task_duration_seconds",
            "Duration of a single executor call",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["queue", "result"], // "ok", "error"
    )
    .unwrap()
});

// =============================================================================
// Auto-detection
// =============================================================================

/// Printer status edges observed.
pub static JOB_EDGES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("printwatch_job_edges_total", "Total job edges detected"),
        &["edge"], // "job_started", "job_completed"
    )
    .unwrap()
});

/// Download tasks created by the detector.
pub static AUTO_TASKS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "printwatch_auto_tasks_created_total",
        "Total download tasks created by auto-detection",
    )
    .unwrap()
});

/// Failed printer polls.
pub static POLL_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "printwatch_poll_failures_total",
        "Total failed printer polls",
    )
    .unwrap()
});

// =============================================================================
// Event Log
// =============================================================================

/// Entries accepted by the event log.
pub static LOG_ENTRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("printwatch_log_entries_total", "Total event log entries"),
        &["category", "level"],
    )
    .unwrap()
});

/// Failed flushes to the log sink.
pub static LOG_FLUSH_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "printwatch_log_flush_failures_total",
        "Total failed event log flushes",
    )
    .unwrap()
});

/// Returns all metrics for registration with a Prometheus registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Queues
        Box::new(TASKS_ENQUEUED.clone()),
        Box::new(TASKS_REJECTED.clone()),
        Box::new(TASKS_FINISHED.clone()),
        Box::new(TASK_RETRIES.clone()),
        Box::new(TASK_DURATION.clone()),
        // Detection
        Box::new(JOB_EDGES.clone()),
        Box::new(AUTO_TASKS_CREATED.clone()),
        Box::new(POLL_FAILURES.clone()),
        // Event log
        Box::new(LOG_ENTRIES.clone()),
        Box::new(LOG_FLUSH_FAILURES.clone()),
    ]
}
