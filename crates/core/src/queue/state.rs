//! Synchronous queue bookkeeping.
//!
//! `QueueState` owns every task a queue knows about and implements the state
//! machine. It never spawns, sleeps or logs; [`TaskQueue`](super::TaskQueue)
//! wraps it with the clock, executor, notifications and event log.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::clock::saturating_after;
use crate::task::{
    ExecutionError, QueueError, QueueKind, QueueStats, Task, TaskKind, TaskResult, TaskStatus,
    ValidationError,
};

use super::config::{DedupPolicy, RetryPolicy};

/// A dispatched task, tagged with the run it belongs to.
#[derive(Debug, Clone)]
struct Running {
    run: u64,
    task: Task,
}

pub(crate) struct QueueState {
    kind: QueueKind,
    queued: VecDeque<Task>,
    processing: HashMap<String, Running>,
    /// Waiting out a backoff delay, in the order they failed.
    retrying: Vec<Task>,
    /// Completed, failed and cancelled tasks until swept, in the order they
    /// finished. A cancelled id may be submitted again, so an id can appear twice.
    finished: Vec<Task>,
    next_run: u64,
}

impl QueueState {
    pub(crate) fn new(kind: QueueKind) -> Self {
        Self {
            kind,
            queued: VecDeque::new(),
            processing: HashMap::new(),
            retrying: Vec::new(),
            finished: Vec::new(),
            next_run: 1,
        }
    }

    fn active(&self) -> impl Iterator<Item = &Task> {
        self.queued
            .iter()
            .chain(self.processing.values().map(|r| &r.task))
            .chain(self.retrying.iter())
    }

    fn is_active(&self, id: &str) -> bool {
        self.processing.contains_key(id) || self.active().any(|t| t.id == id)
    }

    /// Whether `id` completed or failed at or after `cutoff`.
    fn finished_since(&self, id: &str, cutoff: DateTime<Utc>) -> bool {
        self.finished.iter().any(|t| {
            t.id == id
                && matches!(t.status, TaskStatus::Completed | TaskStatus::Failed)
                && Self::finished_at(t).is_some_and(|at| at >= cutoff)
        })
    }

    /// Check `task` against the queue. Ids that completed or failed at or after
    /// `cutoff` count as duplicates.
    pub(crate) fn validate(
        &self,
        task: &Task,
        dedup: DedupPolicy,
        cutoff: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        if task.id.trim().is_empty() {
            return Err(ValidationError::MissingId);
        }

        let missing = |field: &'static str| ValidationError::MissingField {
            id: task.id.clone(),
            field,
        };

        match &task.kind {
            TaskKind::CurrentJobDownload { printer_id, .. } => {
                if printer_id.is_empty() {
                    return Err(missing("printer_id"));
                }
            }
            TaskKind::PrinterFileDownload {
                printer_id,
                filename,
                ..
            }
            | TaskKind::ManualDownload {
                printer_id,
                filename,
                ..
            } => {
                if printer_id.is_empty() {
                    return Err(missing("printer_id"));
                }
                if filename.is_empty() {
                    return Err(missing("filename"));
                }
            }
            TaskKind::ThumbnailGeneration {
                file_id, filename, ..
            } => {
                if file_id.is_empty() {
                    return Err(missing("file_id"));
                }
                if filename.is_empty() {
                    return Err(missing("filename"));
                }
            }
        }

        if task.queue() != self.kind {
            return Err(ValidationError::WrongQueue {
                id: task.id.clone(),
                kind: task.type_name(),
                queue: self.kind,
            });
        }

        if task.status != TaskStatus::Queued {
            return Err(ValidationError::InvalidStatus {
                id: task.id.clone(),
                status: task.status,
            });
        }

        if task.max_attempts == 0 || task.attempts >= task.max_attempts {
            return Err(ValidationError::NoAttemptsLeft {
                id: task.id.clone(),
                attempts: task.attempts,
                max_attempts: task.max_attempts,
            });
        }

        if self.is_active(&task.id) || self.finished_since(&task.id, cutoff) {
            return Err(ValidationError::Duplicate(task.id.clone()));
        }

        if dedup == DedupPolicy::OneActivePerPrinter {
            if let Some(printer_id) = task.kind.printer_id() {
                let existing = self.active().find(|t| {
                    t.type_name() == task.type_name() && t.kind.printer_id() == Some(printer_id)
                });
                if let Some(existing) = existing {
                    return Err(ValidationError::PrinterBusy {
                        printer_id: printer_id.to_string(),
                        kind: task.type_name(),
                        existing_id: existing.id.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Stable priority insertion: before the first task of strictly lower priority.
    fn insert_by_priority(&mut self, task: Task) {
        let rank = task.priority.rank();
        match self.queued.iter().position(|t| t.priority.rank() > rank) {
            Some(idx) => self.queued.insert(idx, task),
            None => self.queued.push_back(task),
        }
    }

    pub(crate) fn enqueue(
        &mut self,
        mut task: Task,
        dedup: DedupPolicy,
        cutoff: DateTime<Utc>,
    ) -> Result<Task, ValidationError> {
        self.validate(&task, dedup, cutoff)?;
        task.status = TaskStatus::Queued;
        let snapshot = task.clone();
        self.insert_by_priority(task);
        Ok(snapshot)
    }

    /// Move retrying tasks whose delay has elapsed back into the queue.
    pub(crate) fn promote_due_retries(&mut self, now: DateTime<Utc>) -> Vec<Task> {
        let (mut due, waiting): (Vec<Task>, Vec<Task>) = self
            .retrying
            .drain(..)
            .partition(|t| t.retry_at.is_none_or(|at| at <= now));
        self.retrying = waiting;

        due.sort_by_key(|t| t.retry_at);

        let mut promoted = Vec::with_capacity(due.len());
        for mut task in due {
            task.status = TaskStatus::Queued;
            task.retry_at = None;
            promoted.push(task.clone());
            self.insert_by_priority(task);
        }
        promoted
    }

    /// Pop tasks off the head of the queue until `max_concurrent` are running.
    pub(crate) fn dispatch(&mut self, max_concurrent: usize, now: DateTime<Utc>) -> Vec<(u64, Task)> {
        let mut dispatched = Vec::new();
        while self.processing.len() < max_concurrent {
            let Some(mut task) = self.queued.pop_front() else {
                break;
            };
            task.status = TaskStatus::Processing;
            task.started_at = Some(now);

            let run = self.next_run;
            self.next_run += 1;

            dispatched.push((run, task.clone()));
            self.processing.insert(task.id.clone(), Running { run, task });
        }
        dispatched
    }

    /// Take a task out of processing if `run` is still the live run for it.
    fn take_running(&mut self, id: &str, run: u64) -> Option<Task> {
        match self.processing.get(id) {
            Some(r) if r.run == run => self.processing.remove(id).map(|r| r.task),
            _ => None,
        }
    }

    /// Record a successful run. `None` means the result arrived for a run that
    /// is no longer live (cancelled) and was discarded.
    pub(crate) fn complete(
        &mut self,
        id: &str,
        run: u64,
        result: TaskResult,
        now: DateTime<Utc>,
    ) -> Option<Task> {
        let mut task = self.take_running(id, run)?;
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        task.result = Some(result);
        self.finished.push(task.clone());
        Some(task)
    }

    /// Record a failed run: schedule a retry or fail permanently.
    pub(crate) fn fail(
        &mut self,
        id: &str,
        run: u64,
        error: ExecutionError,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Option<Task> {
        let mut task = self.take_running(id, run)?;
        task.attempts += 1;
        task.last_error = Some(error);
        task.last_attempt_at = Some(now);

        if task.attempts < task.max_attempts {
            let delay = policy.delay_for(task.attempts);
            task.status = TaskStatus::Retrying;
            task.retry_at = Some(saturating_after(now, delay));
            self.retrying.push(task.clone());
        } else {
            task.status = TaskStatus::Failed;
            task.failed_at = Some(now);
            self.finished.push(task.clone());
        }
        Some(task)
    }

    /// Cancel a task. Returns the cancelled snapshot and the status it had.
    pub(crate) fn cancel(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Task, TaskStatus), QueueError> {
        let (mut task, previous) = if let Some(idx) = self.queued.iter().position(|t| t.id == id) {
            let task = self.queued.remove(idx).ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            (task, TaskStatus::Queued)
        } else if let Some(running) = self.processing.remove(id) {
            (running.task, TaskStatus::Processing)
        } else if let Some(idx) = self.retrying.iter().position(|t| t.id == id) {
            (self.retrying.remove(idx), TaskStatus::Retrying)
        } else if let Some(done) = self.finished.iter().rev().find(|t| t.id == id) {
            return Err(QueueError::AlreadyFinished {
                id: id.to_string(),
                status: done.status,
            });
        } else {
            return Err(QueueError::NotFound(id.to_string()));
        };

        task.status = TaskStatus::Cancelled;
        task.cancelled_at = Some(now);
        task.retry_at = None;
        self.finished.push(task.clone());
        Ok((task, previous))
    }

    fn finished_at(task: &Task) -> Option<DateTime<Utc>> {
        match task.status {
            TaskStatus::Completed => task.completed_at,
            TaskStatus::Failed => task.failed_at,
            TaskStatus::Cancelled => task.cancelled_at,
            _ => None,
        }
    }

    /// Drop finished tasks that ended before `cutoff`. Returns how many were removed.
    pub(crate) fn sweep(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.finished.len();
        self.finished
            .retain(|t| Self::finished_at(t).is_none_or(|at| at >= cutoff));
        before - self.finished.len()
    }

    pub(crate) fn stats(&self, cutoff: DateTime<Utc>, max_concurrent: usize) -> QueueStats {
        let mut stats = QueueStats {
            queued: self.queued.len(),
            processing: self.processing.len(),
            retrying: self.retrying.len(),
            max_concurrent,
            ..Default::default()
        };
        for task in &self.finished {
            if Self::finished_at(task).is_some_and(|at| at >= cutoff) {
                match task.status {
                    TaskStatus::Completed => stats.completed += 1,
                    TaskStatus::Failed => stats.failed += 1,
                    TaskStatus::Cancelled => stats.cancelled += 1,
                    _ => {}
                }
            }
        }
        stats
    }

    pub(crate) fn get(&self, id: &str) -> Option<Task> {
        self.active()
            .find(|t| t.id == id)
            .or_else(|| self.finished.iter().rev().find(|t| t.id == id))
            .cloned()
    }

    /// Queued tasks in dispatch order.
    pub(crate) fn queued(&self) -> Vec<Task> {
        self.queued.iter().cloned().collect()
    }

    /// Every known task: queued (dispatch order), processing, retrying, then finished.
    pub(crate) fn snapshot(&self) -> Vec<Task> {
        let mut processing: Vec<Task> = self.processing.values().map(|r| r.task.clone()).collect();
        processing.sort_by_key(|t| t.started_at);
        let mut finished = self.finished.clone();
        finished.sort_by_key(Self::finished_at);

        self.queued
            .iter()
            .cloned()
            .chain(processing)
            .chain(self.retrying.iter().cloned())
            .chain(finished)
            .collect()
    }

    pub(crate) fn processing_len(&self) -> usize {
        self.processing.len()
    }

    /// Remove everything that has not started yet (queued and retrying).
    pub(crate) fn drain_pending(&mut self, now: DateTime<Utc>) -> Vec<Task> {
        self.queued
            .drain(..)
            .chain(self.retrying.drain(..))
            .map(|mut task| {
                task.status = TaskStatus::Cancelled;
                task.cancelled_at = Some(now);
                task.retry_at = None;
                task
            })
            .collect()
    }
}
