//! Orchestrator implementation.
//!
//! Owns one instance of every engine component and wires them together:
//! - Detector: push events and poll fallback, feeding the download queue
//! - Download queue: on success without an embedded preview, feeds the thumbnail queue
//! - Event log: shared by all of the above

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{validate_config, Config};
use crate::detector::{AutoDetector, Detection, PrinterStatus};
use crate::event_log::{EventLog, LogCategory, LogExport, LogSink, SqliteLogSink};
use crate::queue::TaskQueue;
use crate::task::{QueueError, QueueKind, Task, TaskResult, TaskUpdate};

use super::types::{Collaborators, OrchestratorError, OrchestratorStats, ShutdownReport};

/// Capacity of the printer status push channel.
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Composition root for the detection and scheduling engine.
pub struct Orchestrator {
    config: Config,
    log: EventLog,
    downloads: TaskQueue,
    thumbnails: TaskQueue,
    detector: AutoDetector,

    // Runtime state
    status_tx: mpsc::Sender<PrinterStatus>,
    status_rx: Mutex<Option<mpsc::Receiver<PrinterStatus>>>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("running", &self.is_running())
            .field("downloads", &self.downloads)
            .field("thumbnails", &self.thumbnails)
            .field("detector", &self.detector)
            .finish()
    }
}

impl Orchestrator {
    /// Create an orchestrator on the system clock.
    pub fn new(config: Config, collaborators: Collaborators) -> Result<Self, OrchestratorError> {
        Self::with_clock(config, collaborators, Arc::new(SystemClock))
    }

    /// Create an orchestrator on an explicit clock.
    pub fn with_clock(
        config: Config,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, OrchestratorError> {
        validate_config(&config)?;

        let sink: Option<Arc<dyn LogSink>> = match (collaborators.log_sink, &config.database.path) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => {
                info!("Persisting event log to {}", path.display());
                let sink: Arc<dyn LogSink> = Arc::new(SqliteLogSink::new(path)?);
                Some(sink)
            }
            (None, None) => None,
        };

        let log = EventLog::new(config.log.clone(), clock.clone(), sink);

        let downloads = TaskQueue::new(
            QueueKind::Download,
            config.download_queue(),
            collaborators.download_executor,
            log.clone(),
            clock.clone(),
        );
        let thumbnails = TaskQueue::new(
            QueueKind::Thumbnail,
            config.thumbnail_queue(),
            collaborators.thumbnail_executor,
            log.clone(),
            clock.clone(),
        );
        Self::couple_thumbnails(&downloads, &thumbnails);

        let detector = AutoDetector::new(
            config.detector.clone(),
            downloads.clone(),
            collaborators.printer_source,
            log.clone(),
            clock,
        );

        let (status_tx, status_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            log,
            downloads,
            thumbnails,
            detector,
            status_tx,
            status_rx: Mutex::new(Some(status_rx)),
            running: AtomicBool::new(false),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// A completed download without an embedded preview gets exactly one thumbnail task.
    fn couple_thumbnails(downloads: &TaskQueue, thumbnails: &TaskQueue) {
        let thumbnails = thumbnails.clone();
        let max_attempts = thumbnails.config().retry.max_attempts;

        downloads.set_success_hook(Arc::new(move |task: &Task| {
            let Some(TaskResult::Download(outcome)) = &task.result else {
                return;
            };
            if outcome.has_thumbnail {
                debug!("Download {} already has a thumbnail", task.id);
                return;
            }

            let thumbnail = Task::thumbnail_for(task, outcome).with_max_attempts(max_attempts);
            // Rejections are logged by the thumbnail queue.
            if let Err(e) = thumbnails.enqueue(thumbnail) {
                warn!("Thumbnail for download {} not queued: {}", task.id, e);
            }
        }));
    }

    /// Start the orchestrator (spawns background tasks).
    pub fn start(&self) -> Result<(), OrchestratorError> {
        let Some(status_rx) = self.status_rx.lock().unwrap().take() else {
            return Err(if self.is_running() {
                OrchestratorError::AlreadyRunning
            } else {
                OrchestratorError::Stopped
            });
        };
        self.running.store(true, Ordering::SeqCst);

        info!("Starting orchestrator");

        let fingerprint = self.config.fingerprint();
        self.log.info(
            LogCategory::System,
            "Service started",
            json!({
                "session_id": self.log.session_id(),
                "config_fingerprint": fingerprint,
                "max_concurrent_downloads": self.config.downloads.max_concurrent,
                "max_concurrent_thumbnails": self.config.thumbnails.max_concurrent,
                "auto_detection": self.detector.is_enabled(),
                "poll_interval_ms": self.config.detector.poll_interval_ms,
            }),
        );

        let mut handles = self.log.start(&self.shutdown_tx);
        handles.extend(self.downloads.start(&self.shutdown_tx));
        handles.extend(self.thumbnails.start(&self.shutdown_tx));
        handles.push(self.detector.start(&self.shutdown_tx, status_rx));
        self.handles.lock().unwrap().extend(handles);

        info!("Orchestrator started (config {})", fingerprint);
        Ok(())
    }

    /// Stop the orchestrator gracefully.
    ///
    /// Stops every loop, drains both queues concurrently within the shutdown
    /// grace period, and flushes the event log.
    pub async fn stop(&self) -> Result<ShutdownReport, OrchestratorError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return Err(OrchestratorError::NotRunning);
        }

        info!("Stopping orchestrator");

        // Signal shutdown to all loops
        let _ = self.shutdown_tx.send(());

        let grace = self.config.shutdown_grace();
        let (downloads, thumbnails) =
            tokio::join!(self.downloads.drain(grace), self.thumbnails.drain(grace));

        self.log.info(
            LogCategory::System,
            "Service stopped",
            json!({
                "downloads_discarded": downloads.discarded.len(),
                "thumbnails_discarded": thumbnails.discarded.len(),
                "still_processing": downloads.still_processing + thumbnails.still_processing,
            }),
        );

        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("Background task ended abnormally: {}", e);
                    }
                }
            }
            Err(_) => {
                warn!(
                    "Background tasks still running after {:?}, aborting them",
                    grace
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        let log_entries_flushed = match self.log.flush_in_background().await {
            Ok(n) => n,
            Err(e) => {
                error!("Final event log flush failed: {}", e);
                0
            }
        };

        info!("Orchestrator stopped");
        Ok(ShutdownReport {
            downloads,
            thumbnails,
            log_entries_flushed,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sender for pushed printer status events. Events are handled once the
    /// orchestrator is started.
    pub fn status_sender(&self) -> mpsc::Sender<PrinterStatus> {
        self.status_tx.clone()
    }

    /// Handle a printer status event immediately, bypassing the push channel.
    pub fn handle_printer_status(&self, status: &PrinterStatus) -> Detection {
        self.detector.handle_status(status)
    }

    /// Submit a task to the queue that serves its kind. Returns the task id.
    pub fn submit(&self, task: Task) -> Result<String, OrchestratorError> {
        let id = match task.queue() {
            QueueKind::Download => self.downloads.enqueue(task)?,
            QueueKind::Thumbnail => self.thumbnails.enqueue(task)?,
        };
        Ok(id)
    }

    /// Cancel a task in whichever queue holds it.
    pub fn cancel(&self, id: &str) -> Result<Task, OrchestratorError> {
        match self.downloads.cancel(id) {
            Err(QueueError::NotFound(_)) => {}
            other => return Ok(other?),
        }
        match self.thumbnails.cancel(id) {
            Err(QueueError::NotFound(_)) => Err(OrchestratorError::TaskNotFound(id.to_string())),
            other => Ok(other?),
        }
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.downloads.get(id).or_else(|| self.thumbnails.get(id))
    }

    pub fn set_auto_detection(&self, enabled: bool) {
        self.detector.set_enabled(enabled);
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            running: self.is_running(),
            auto_detection_enabled: self.detector.is_enabled(),
            tracked_printers: self.detector.observations().len(),
            downloads: self.downloads.stats(),
            thumbnails: self.thumbnails.stats(),
        }
    }

    pub fn subscribe_downloads(&self) -> broadcast::Receiver<TaskUpdate> {
        self.downloads.subscribe()
    }

    pub fn subscribe_thumbnails(&self) -> broadcast::Receiver<TaskUpdate> {
        self.thumbnails.subscribe()
    }

    /// Bundle the last `days` days of log entries.
    pub fn export_logs(&self, days: u32) -> LogExport {
        self.log.export(days)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn downloads(&self) -> &TaskQueue {
        &self.downloads
    }

    pub fn thumbnails(&self) -> &TaskQueue {
        &self.thumbnails
    }

    pub fn detector(&self) -> &AutoDetector {
        &self.detector
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }
}
