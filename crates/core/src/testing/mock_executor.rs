//! Mock executor for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use crate::task::{
    DownloadOutcome, ExecutionError, Executor, Task, TaskKind, TaskResult, ThumbnailOutcome,
};

/// Mock implementation of the Executor trait.
///
/// Provides controllable behavior for testing:
/// - Record every task it is asked to run
/// - Script results per call, or fail every call
/// - Hold calls open until released, to keep tasks in processing
/// - Track how many calls run at once
///
/// # Example
///
/// ```rust,ignore
/// use printwatch_core::testing::MockExecutor;
///
/// let executor = MockExecutor::new("downloads");
/// executor.push_error(ExecutionError::timeout("slow printer"));
///
/// // First call fails, later calls succeed.
/// assert_eq!(executor.call_count(), 0);
/// ```
#[derive(Debug)]
pub struct MockExecutor {
    name: String,
    /// Every task passed to `execute`, in call order.
    calls: Mutex<Vec<Task>>,
    /// Results returned before falling back to the default behavior.
    scripted: Mutex<VecDeque<Result<TaskResult, ExecutionError>>>,
    /// If set, every unscripted call fails with this error.
    default_error: Mutex<Option<ExecutionError>>,
    /// Value of `has_thumbnail` in default download results.
    has_thumbnail: AtomicBool,
    /// Simulated execution time in milliseconds.
    delay_ms: AtomicU64,
    /// Calls wait here while the gate is closed.
    gate: watch::Sender<bool>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new("mock")
    }
}

impl MockExecutor {
    /// Create a mock executor that succeeds on every call.
    pub fn new(name: impl Into<String>) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            name: name.into(),
            calls: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            default_error: Mutex::new(None),
            has_thumbnail: AtomicBool::new(true),
            delay_ms: AtomicU64::new(0),
            gate,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Queue a result for the next unscripted call.
    pub fn push_result(&self, result: Result<TaskResult, ExecutionError>) {
        self.scripted.lock().unwrap().push_back(result);
    }

    /// Queue a failure for the next unscripted call.
    pub fn push_error(&self, error: ExecutionError) {
        self.push_result(Err(error));
    }

    /// Fail every call that has no scripted result.
    pub fn fail_always(&self, error: ExecutionError) {
        *self.default_error.lock().unwrap() = Some(error);
    }

    /// Go back to succeeding by default.
    pub fn succeed(&self) {
        *self.default_error.lock().unwrap() = None;
    }

    /// Set `has_thumbnail` on default download results.
    pub fn set_has_thumbnail(&self, has_thumbnail: bool) {
        self.has_thumbnail.store(has_thumbnail, Ordering::SeqCst);
    }

    /// Set the simulated execution time.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Block new and running calls until `release` is called.
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Let held calls finish.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Get every task passed to `execute`.
    pub fn calls(&self) -> Vec<Task> {
        self.calls.lock().unwrap().clone()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Calls currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were executing at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn default_result(&self, task: &Task) -> TaskResult {
        let file_id = format!("file-{}", task.id);
        match &task.kind {
            TaskKind::CurrentJobDownload { job_name, .. } => TaskResult::Download(DownloadOutcome {
                file_id,
                filename: job_name
                    .clone()
                    .unwrap_or_else(|| "current_job.gcode".to_string()),
                size_bytes: Some(1024),
                has_thumbnail: self.has_thumbnail.load(Ordering::SeqCst),
            }),
            TaskKind::PrinterFileDownload { filename, .. }
            | TaskKind::ManualDownload { filename, .. } => TaskResult::Download(DownloadOutcome {
                file_id,
                filename: filename.clone(),
                size_bytes: Some(1024),
                has_thumbnail: self.has_thumbnail.load(Ordering::SeqCst),
            }),
            TaskKind::ThumbnailGeneration { file_id, .. } => {
                TaskResult::Thumbnail(ThumbnailOutcome {
                    file_id: file_id.clone(),
                    thumbnail_path: Some(format!("thumbnails/{}.png", file_id)),
                })
            }
        }
    }
}

#[async_trait]
impl Executor for MockExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, task: &Task) -> Result<TaskResult, ExecutionError> {
        self.calls.lock().unwrap().push(task.clone());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let scripted = self.scripted.lock().unwrap().pop_front();
        let result = match scripted {
            Some(result) => result,
            None => match self.default_error.lock().unwrap().clone() {
                Some(error) => Err(error),
                None => Ok(self.default_result(task)),
            },
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
