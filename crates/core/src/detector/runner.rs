//! Auto-detector implementation.
//!
//! Turns printer status reports into job edges, and job-start edges into
//! high-priority download tasks. Reports arrive two ways:
//! - Push: status events over an mpsc channel
//! - Poll: periodic listing from a `PrinterSource`, as a fallback
//!
//! Both paths go through `handle_status`, so their effects are identical.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::event_log::{EventLog, LogCategory};
use crate::metrics;
use crate::queue::TaskQueue;
use crate::task::{Priority, Task};

use super::config::DetectorConfig;
use super::source::{PrinterSource, SourceError};
use super::tracker::PrinterObservationTracker;
use super::types::{Detection, JobEdge, PrinterObservation, PrinterStatus};

struct DetectorInner {
    config: DetectorConfig,
    enabled: AtomicBool,
    tracker: Mutex<PrinterObservationTracker>,
    downloads: TaskQueue,
    source: Option<Arc<dyn PrinterSource>>,
    log: EventLog,
    clock: Arc<dyn Clock>,
}

/// Watches printer status and queues a download whenever a job starts.
#[derive(Clone)]
pub struct AutoDetector {
    inner: Arc<DetectorInner>,
}

impl std::fmt::Debug for AutoDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoDetector")
            .field("enabled", &self.is_enabled())
            .field("poll_interval_ms", &self.inner.config.poll_interval_ms)
            .field("has_source", &self.inner.source.is_some())
            .finish()
    }
}

impl AutoDetector {
    /// Create a detector feeding `downloads`. Without a source, only pushed
    /// status events are observed.
    pub fn new(
        config: DetectorConfig,
        downloads: TaskQueue,
        source: Option<Arc<dyn PrinterSource>>,
        log: EventLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(DetectorInner {
                enabled: AtomicBool::new(config.enabled),
                config,
                tracker: Mutex::new(PrinterObservationTracker::new()),
                downloads,
                source,
                log,
                clock,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Turn task creation on or off. Edges keep being tracked either way.
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.inner.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            self.inner.log.info(
                LogCategory::Detector,
                if enabled {
                    "Auto-detection enabled"
                } else {
                    "Auto-detection disabled"
                },
                json!({ "enabled": enabled }),
            );
        }
    }

    /// Snapshot of every tracked printer.
    pub fn observations(&self) -> Vec<PrinterObservation> {
        self.inner.tracker.lock().unwrap().snapshot()
    }

    pub fn observation(&self, printer_id: &str) -> Option<PrinterObservation> {
        self.inner.tracker.lock().unwrap().get(printer_id).cloned()
    }

    /// Observe one status report and act on the resulting edge.
    pub fn handle_status(&self, status: &PrinterStatus) -> Detection {
        let now = self.inner.clock.now();
        let edge = self.inner.tracker.lock().unwrap().observe(status, now);

        let data = json!({
            "printer_id": status.printer_id,
            "printer_name": status.display_name(),
            "status": status.status,
            "current_job": status.current_job,
        });

        match edge {
            JobEdge::None => {
                debug!(
                    "Printer {} status {} (no edge)",
                    status.printer_id, status.status
                );
                Detection::Unchanged
            }
            JobEdge::JobStarted => {
                metrics::JOB_EDGES.with_label_values(&[edge.as_str()]).inc();

                if !self.is_enabled() {
                    self.inner.log.info(
                        LogCategory::Detector,
                        format!(
                            "Job started on {}, auto-detection disabled",
                            status.display_name()
                        ),
                        data,
                    );
                    return Detection::DetectionDisabled;
                }

                self.queue_current_job(status, data)
            }
            JobEdge::JobCompleted => {
                metrics::JOB_EDGES.with_label_values(&[edge.as_str()]).inc();
                self.inner.log.info(
                    LogCategory::Detector,
                    format!("Job completed on {}", status.display_name()),
                    data,
                );
                Detection::JobCompleted
            }
        }
    }

    fn queue_current_job(&self, status: &PrinterStatus, mut data: serde_json::Value) -> Detection {
        let max_attempts = self.inner.downloads.config().retry.max_attempts;
        let task = Task::current_job_download(
            status.printer_id.clone(),
            status.display_name(),
            status.current_job.clone(),
            Priority::High,
        )
        .with_max_attempts(max_attempts)
        .auto_triggered();

        match self.inner.downloads.enqueue(task) {
            Ok(task_id) => {
                metrics::AUTO_TASKS_CREATED.inc();
                data["task_id"] = json!(task_id);
                self.inner.log.info(
                    LogCategory::Detector,
                    format!(
                        "Job started on {}, queued download {}",
                        status.display_name(),
                        task_id
                    ),
                    data,
                );
                Detection::DownloadQueued { task_id }
            }
            Err(e) => {
                data["error"] = json!(e.to_string());
                self.inner.log.warn(
                    LogCategory::Detector,
                    format!(
                        "Job started on {}, download not queued: {}",
                        status.display_name(),
                        e
                    ),
                    data,
                );
                Detection::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Poll the source once and observe every printer it returns.
    ///
    /// Returns the number of printers observed. Failures are logged at error level.
    pub async fn poll_once(&self) -> Result<usize, SourceError> {
        let Some(source) = &self.inner.source else {
            return Ok(0);
        };

        match source.active_printers().await {
            Ok(printers) => {
                for status in &printers {
                    self.handle_status(status);
                }
                Ok(printers.len())
            }
            Err(e) => {
                metrics::POLL_FAILURES.inc();
                self.inner.log.error(
                    LogCategory::Detector,
                    format!("Printer poll via {} failed: {}", source.name(), e),
                    json!({ "source": source.name(), "error": e.to_string() }),
                );
                Err(e)
            }
        }
    }

    /// Spawn the detector loop: pushed status events plus the periodic poll.
    ///
    /// The first poll runs immediately. A closed push channel leaves the poll running.
    pub fn start(
        &self,
        shutdown: &broadcast::Sender<()>,
        mut statuses: mpsc::Receiver<PrinterStatus>,
    ) -> JoinHandle<()> {
        let detector = self.clone();
        let mut shutdown_rx = shutdown.subscribe();
        let poll_interval = Duration::from_millis(self.inner.config.poll_interval_ms);
        let polling = self.inner.source.is_some();

        tokio::spawn(async move {
            info!("Auto-detector loop started");
            let mut poll = tokio::time::interval(poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut push_open = true;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Auto-detector loop received shutdown signal");
                        break;
                    }
                    event = statuses.recv(), if push_open => match event {
                        Some(status) => {
                            detector.handle_status(&status);
                        }
                        None => {
                            warn!("Printer status channel closed, continuing with polling only");
                            push_open = false;
                        }
                    },
                    _ = poll.tick(), if polling => {
                        // Shutdown preempts a hung poll. Poll errors are already logged.
                        let stopped = tokio::select! {
                            _ = shutdown_rx.recv() => true,
                            _ = detector.poll_once() => false,
                        };
                        if stopped {
                            info!("Auto-detector loop received shutdown signal during poll");
                            break;
                        }
                    }
                }
            }
            info!("Auto-detector loop stopped");
        })
    }
}
