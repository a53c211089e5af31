//! Task queue runner.
//!
//! Drives tasks through the state machine:
//! - Tick: promote due retries, then dispatch up to `max_concurrent`
//! - Execution: spawned per task, result folded back into state
//! - Sweep: drop finished tasks past the retention window

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{window_start, Clock};
use crate::event_log::{EventLog, LogCategory, LogLevel};
use crate::metrics;
use crate::task::{
    ErrorClass, ExecutionError, Executor, QueueError, QueueKind, QueueStats, Task, TaskResult,
    TaskStatus, TaskUpdate,
};

use super::config::QueueConfig;
use super::state::QueueState;

/// Called synchronously after a task completes successfully.
pub type SuccessHook = Arc<dyn Fn(&Task) + Send + Sync>;

/// Capacity of the update channel. Slow subscribers see `Lagged`.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// What `drain` did with the tasks it found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Ids of queued and retrying tasks that were discarded.
    pub discarded: Vec<String>,
    /// Tasks still executing when the grace period ran out.
    pub still_processing: usize,
    pub timed_out: bool,
}

struct QueueInner {
    kind: QueueKind,
    config: QueueConfig,
    executor: Arc<dyn Executor>,
    log: EventLog,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
    accepting: AtomicBool,
    updates: broadcast::Sender<TaskUpdate>,
    /// Signalled whenever a task leaves processing.
    settled: Notify,
    on_success: Mutex<Option<SuccessHook>>,
}

/// Priority queue with bounded concurrency and exponential-backoff retries.
///
/// Cheap to clone; clones share state. One instance serves downloads, another
/// serves thumbnails.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("kind", &self.inner.kind)
            .field("executor", &self.inner.executor.name())
            .field("max_concurrent", &self.inner.config.max_concurrent)
            .finish()
    }
}

impl TaskQueue {
    pub fn new(
        kind: QueueKind,
        config: QueueConfig,
        executor: Arc<dyn Executor>,
        log: EventLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(QueueInner {
                kind,
                config,
                executor,
                log,
                clock,
                state: Mutex::new(QueueState::new(kind)),
                accepting: AtomicBool::new(true),
                updates,
                settled: Notify::new(),
                on_success: Mutex::new(None),
            }),
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.inner.kind
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Register the hook run after every successful completion. Replaces any previous hook.
    pub fn set_success_hook(&self, hook: SuccessHook) {
        *self.inner.on_success.lock().unwrap() = Some(hook);
    }

    /// Receive a [`TaskUpdate`] for every transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    fn category(&self) -> LogCategory {
        match self.inner.kind {
            QueueKind::Download => LogCategory::Download,
            QueueKind::Thumbnail => LogCategory::Thumbnail,
        }
    }

    fn retention_cutoff(&self) -> chrono::DateTime<chrono::Utc> {
        window_start(
            self.inner.clock.now(),
            ChronoDuration::try_hours(i64::from(self.inner.config.retention_hours)),
        )
    }

    fn task_data(task: &Task) -> Value {
        let mut data = json!({
            "task_id": task.id,
            "type": task.type_name(),
            "priority": task.priority,
            "attempts": task.attempts,
            "max_attempts": task.max_attempts,
            "auto_triggered": task.auto_triggered,
        });
        if let Some(printer_id) = task.kind.printer_id() {
            data["printer_id"] = json!(printer_id);
        }
        data
    }

    fn publish(&self, task: Task) {
        let update = TaskUpdate {
            queue: self.inner.kind,
            task,
            queue_stats: self.stats(),
        };
        // No subscribers is fine.
        let _ = self.inner.updates.send(update);
    }

    /// Validate and insert a task by priority. Returns the task id.
    pub fn enqueue(&self, task: Task) -> Result<String, QueueError> {
        let kind = self.inner.kind.as_str();

        if !self.is_accepting() {
            metrics::TASKS_REJECTED.with_label_values(&[kind]).inc();
            self.inner.log.warn(
                self.category(),
                format!("Rejected task {}: queue is shutting down", task.id),
                Self::task_data(&task),
            );
            return Err(QueueError::Closed(self.inner.kind));
        }

        let cutoff = self.retention_cutoff();
        let result = {
            let mut state = self.inner.state.lock().unwrap();
            state.enqueue(task.clone(), self.inner.config.dedup, cutoff)
        };

        match result {
            Ok(queued) => {
                metrics::TASKS_ENQUEUED.with_label_values(&[kind]).inc();
                self.inner.log.info(
                    self.category(),
                    format!("Queued {} task {}", queued.type_name(), queued.id),
                    Self::task_data(&queued),
                );
                let id = queued.id.clone();
                self.publish(queued);
                Ok(id)
            }
            Err(e) => {
                metrics::TASKS_REJECTED.with_label_values(&[kind]).inc();
                let mut data = Self::task_data(&task);
                data["error"] = json!(e.to_string());
                self.inner
                    .log
                    .warn(self.category(), format!("Rejected task {}: {}", task.id, e), data);
                Err(e.into())
            }
        }
    }

    /// Run one scheduler step: promote due retries, then dispatch while slots are free.
    ///
    /// Never waits on an executor. Returns the number of tasks dispatched.
    pub fn tick(&self) -> usize {
        if !self.is_accepting() {
            return 0;
        }

        let now = self.inner.clock.now();
        let promoted = self.inner.state.lock().unwrap().promote_due_retries(now);

        // Subscribers see the re-queue before the dispatch that may follow it.
        for task in promoted {
            self.inner.log.info(
                self.category(),
                format!("Retry due for task {}, re-queued", task.id),
                Self::task_data(&task),
            );
            self.publish(task);
        }

        let dispatched = self
            .inner
            .state
            .lock()
            .unwrap()
            .dispatch(self.inner.config.max_concurrent, now);

        let count = dispatched.len();
        for (run, task) in dispatched {
            self.inner.log.info(
                self.category(),
                format!("Started task {} (attempt {})", task.id, task.attempts + 1),
                Self::task_data(&task),
            );
            self.publish(task.clone());
            self.spawn_execution(run, task);
        }
        count
    }

    fn spawn_execution(&self, run: u64, task: Task) {
        let queue = self.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = queue.inner.executor.execute(&task).await;
            let result_label = if outcome.is_ok() { "ok" } else { "error" };
            metrics::TASK_DURATION
                .with_label_values(&[queue.inner.kind.as_str(), result_label])
                .observe(started.elapsed().as_secs_f64());

            match outcome {
                Ok(result) => queue.handle_success(&task.id, run, result),
                Err(e) => queue.handle_failure(&task.id, run, e),
            }
        });
    }

    fn handle_success(&self, id: &str, run: u64, result: TaskResult) {
        let now = self.inner.clock.now();
        let completed = self.inner.state.lock().unwrap().complete(id, run, result, now);
        self.inner.settled.notify_waiters();

        let Some(task) = completed else {
            debug!("Discarding result for task {}: run {} is no longer active", id, run);
            return;
        };

        metrics::TASKS_FINISHED
            .with_label_values(&[self.inner.kind.as_str(), "completed"])
            .inc();
        self.inner.log.info(
            self.category(),
            format!("Completed task {}", task.id),
            Self::task_data(&task),
        );
        self.publish(task.clone());

        let hook = self.inner.on_success.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(&task);
        }
    }

    fn handle_failure(&self, id: &str, run: u64, error: ExecutionError) {
        let now = self.inner.clock.now();
        let class = error.class();
        let failed = self.inner.state.lock().unwrap().fail(
            id,
            run,
            error,
            now,
            &self.inner.config.retry,
        );
        self.inner.settled.notify_waiters();

        let Some(task) = failed else {
            debug!("Discarding failure for task {}: run {} is no longer active", id, run);
            return;
        };

        let kind = self.inner.kind.as_str();
        let mut data = Self::task_data(&task);
        if let Some(err) = &task.last_error {
            data["error_kind"] = json!(err.kind);
            data["error"] = json!(err.message);
            if let Some(raw) = &err.raw_status {
                data["raw_status"] = json!(raw);
            }
        }

        let (level, message) = if task.status == TaskStatus::Retrying {
            let delay = self.inner.config.retry.delay_for(task.attempts);
            data["delay_ms"] = json!(delay.as_millis() as u64);
            data["retry_at"] = json!(task.retry_at);
            metrics::TASK_RETRIES
                .with_label_values(&[kind, Self::class_label(class)])
                .inc();
            (
                LogLevel::Warn,
                format!(
                    "Task {} failed (attempt {}/{}), retrying in {}ms",
                    task.id,
                    task.attempts,
                    task.max_attempts,
                    delay.as_millis()
                ),
            )
        } else {
            metrics::TASKS_FINISHED.with_label_values(&[kind, "failed"]).inc();
            (
                LogLevel::Error,
                format!(
                    "Task {} failed permanently after {} attempts",
                    task.id, task.attempts
                ),
            )
        };

        // Unrecognized statuses always surface at error level.
        let level = if class == ErrorClass::Unknown {
            LogLevel::Error
        } else {
            level
        };

        self.inner.log.log(self.category(), message, data, level);
        self.publish(task);
    }

    fn class_label(class: ErrorClass) -> &'static str {
        match class {
            ErrorClass::Transient => "transient",
            ErrorClass::Domain => "domain",
            ErrorClass::Generic => "generic",
            ErrorClass::Unknown => "unknown",
        }
    }

    /// Cancel a queued, processing or retrying task.
    ///
    /// Cancelling a processing task does not interrupt its executor; the
    /// eventual result is discarded.
    pub fn cancel(&self, id: &str) -> Result<Task, QueueError> {
        let now = self.inner.clock.now();
        let (task, previous) = self.inner.state.lock().unwrap().cancel(id, now)?;

        if previous == TaskStatus::Processing {
            self.inner.settled.notify_waiters();
        }

        metrics::TASKS_FINISHED
            .with_label_values(&[self.inner.kind.as_str(), "cancelled"])
            .inc();
        let mut data = Self::task_data(&task);
        data["previous_status"] = json!(previous);
        self.inner.log.info(
            self.category(),
            format!("Cancelled task {} ({})", task.id, previous),
            data,
        );
        self.publish(task.clone());
        Ok(task)
    }

    /// Drop finished tasks older than the retention window. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let cutoff = self.retention_cutoff();
        let removed = self.inner.state.lock().unwrap().sweep(cutoff);
        if removed > 0 {
            info!(
                "{} queue sweep removed {} finished tasks",
                self.inner.kind, removed
            );
        }
        removed
    }

    pub fn stats(&self) -> QueueStats {
        let cutoff = self.retention_cutoff();
        self.inner
            .state
            .lock()
            .unwrap()
            .stats(cutoff, self.inner.config.max_concurrent)
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.inner.state.lock().unwrap().get(id)
    }

    /// Every known task: queued in dispatch order, then processing, retrying and finished.
    pub fn snapshot(&self) -> Vec<Task> {
        self.inner.state.lock().unwrap().snapshot()
    }

    /// Queued tasks in dispatch order.
    pub fn queued(&self) -> Vec<Task> {
        self.inner.state.lock().unwrap().queued()
    }

    /// Stop accepting work, wait up to `grace` for running tasks to settle, then
    /// discard everything still queued or retrying.
    pub async fn drain(&self, grace: Duration) -> DrainReport {
        if self.inner.accepting.swap(false, Ordering::SeqCst) {
            info!("Draining {} queue", self.inner.kind);
        }

        let deadline = tokio::time::Instant::now() + grace;
        let timed_out = loop {
            let settled = self.inner.settled.notified();
            if self.inner.state.lock().unwrap().processing_len() == 0 {
                break false;
            }
            if tokio::time::timeout_at(deadline, settled).await.is_err() {
                break true;
            }
        };

        let now = self.inner.clock.now();
        let (discarded, still_processing) = {
            let mut state = self.inner.state.lock().unwrap();
            (state.drain_pending(now), state.processing_len())
        };

        if timed_out {
            warn!(
                "{} queue drain timed out with {} tasks still processing",
                self.inner.kind, still_processing
            );
        }

        let ids: Vec<String> = discarded.iter().map(|t| t.id.clone()).collect();
        for task in discarded {
            self.publish(task);
        }

        self.inner.log.log(
            self.category(),
            format!(
                "{} queue drained: {} discarded, {} still processing",
                self.inner.kind,
                ids.len(),
                still_processing
            ),
            json!({
                "discarded": ids,
                "still_processing": still_processing,
                "timed_out": timed_out,
            }),
            if timed_out { LogLevel::Warn } else { LogLevel::Info },
        );

        DrainReport {
            discarded: ids,
            still_processing,
            timed_out,
        }
    }

    /// Spawn the scheduler tick and retention sweep loops.
    pub fn start(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let tick_queue = self.clone();
        let mut tick_shutdown = shutdown.subscribe();
        let tick_interval = Duration::from_millis(self.inner.config.tick_interval_ms);

        let tick_handle = tokio::spawn(async move {
            info!("{} queue scheduler started", tick_queue.inner.kind);
            loop {
                tokio::select! {
                    _ = tick_shutdown.recv() => {
                        info!("{} queue scheduler received shutdown signal", tick_queue.inner.kind);
                        break;
                    }
                    _ = tokio::time::sleep(tick_interval) => {
                        tick_queue.tick();
                    }
                }
            }
        });

        let sweep_queue = self.clone();
        let mut sweep_shutdown = shutdown.subscribe();
        let sweep_interval = Duration::from_millis(self.inner.config.sweep_interval_ms);

        let sweep_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sweep_shutdown.recv() => break,
                    _ = tokio::time::sleep(sweep_interval) => {
                        sweep_queue.sweep();
                    }
                }
            }
        });

        vec![tick_handle, sweep_handle]
    }
}
