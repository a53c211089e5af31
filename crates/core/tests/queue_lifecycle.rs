//! Integration tests for the task queue lifecycle.
//!
//! These drive a queue with a manual clock and a scripted executor, calling
//! `tick()` directly so every dispatch is deterministic.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use printwatch_core::testing::{fixtures, wait_for, MockExecutor};
use printwatch_core::{
    Clock, DedupPolicy, EventLog, EventLogConfig, ExecutionError, LogCategory, LogLevel,
    ManualClock, Priority, QueueConfig, QueueError, QueueKind, RetryPolicy, Task, TaskQueue,
    TaskStatus, TaskUpdate, ValidationError,
};

const WAIT: Duration = Duration::from_secs(2);

struct TestHarness {
    queue: TaskQueue,
    executor: Arc<MockExecutor>,
    clock: Arc<ManualClock>,
    log: EventLog,
}

impl TestHarness {
    fn new(config: QueueConfig) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let log = EventLog::new(EventLogConfig::default(), clock.clone(), None);
        let executor = Arc::new(MockExecutor::new("downloads"));
        let queue = TaskQueue::new(
            QueueKind::Download,
            config,
            executor.clone(),
            log.clone(),
            clock.clone(),
        );

        Self {
            queue,
            executor,
            clock,
            log,
        }
    }

    fn with_concurrency(max_concurrent: usize) -> Self {
        Self::new(QueueConfig {
            max_concurrent,
            ..Default::default()
        })
    }

    async fn wait_until(&self, condition: impl Fn(&TaskQueue) -> bool) -> bool {
        let queue = self.queue.clone();
        wait_for(move || condition(&queue), WAIT).await
    }

    async fn wait_for_status(&self, id: &str, status: TaskStatus) -> bool {
        let id = id.to_string();
        self.wait_until(move |q| q.get(&id).map(|t| t.status) == Some(status))
            .await
    }
}

fn drain_updates(rx: &mut tokio::sync::broadcast::Receiver<TaskUpdate>) -> Vec<TaskUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

#[tokio::test]
async fn test_dispatch_follows_priority_then_arrival() {
    let harness = TestHarness::with_concurrency(1);

    harness
        .queue
        .enqueue(fixtures::manual_download("low", Priority::Low))
        .unwrap();
    harness
        .queue
        .enqueue(fixtures::manual_download("normal", Priority::Normal))
        .unwrap();
    harness
        .queue
        .enqueue(fixtures::manual_download("high", Priority::High))
        .unwrap();

    for expected in 1..=3 {
        assert_eq!(harness.queue.tick(), 1);
        assert!(harness.wait_until(move |q| q.stats().completed == expected).await);
    }

    let order: Vec<String> = harness.executor.calls().into_iter().map(|t| t.id).collect();
    assert_eq!(order, vec!["high", "normal", "low"]);
}

#[tokio::test]
async fn test_equal_priority_is_first_in_first_out() {
    let harness = TestHarness::with_concurrency(1);
    for id in ["a", "b", "c"] {
        harness
            .queue
            .enqueue(fixtures::manual_download(id, Priority::Normal))
            .unwrap();
    }

    let queued: Vec<String> = harness.queue.queued().into_iter().map(|t| t.id).collect();
    assert_eq!(queued, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_retries_back_off_then_fail_permanently() {
    let harness = TestHarness::new(QueueConfig {
        max_concurrent: 1,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
        },
        ..Default::default()
    });
    harness
        .executor
        .fail_always(ExecutionError::timeout("printer did not answer"));
    let task = fixtures::manual_download("job", Priority::Normal).with_max_attempts(3);
    harness.queue.enqueue(task).unwrap();

    // Attempt 1 fails, retry in 5s.
    harness.queue.tick();
    assert!(harness.wait_for_status("job", TaskStatus::Retrying).await);
    let first = harness.queue.get("job").unwrap();
    assert_eq!(first.attempts, 1);
    assert_eq!(
        first.retry_at,
        Some(harness.clock.now() + ChronoDuration::milliseconds(5_000))
    );

    // Attempt 2 fails, retry in 10s.
    harness.clock.advance_ms(5_000);
    assert_eq!(harness.queue.tick(), 1);
    assert!(
        harness
            .wait_until(|q| q.get("job").map(|t| t.attempts) == Some(2)
                && q.stats().retrying == 1)
            .await
    );
    let second = harness.queue.get("job").unwrap();
    assert_eq!(
        second.retry_at,
        Some(harness.clock.now() + ChronoDuration::milliseconds(10_000))
    );

    // Attempt 3 exhausts the budget.
    harness.clock.advance_ms(10_000);
    assert_eq!(harness.queue.tick(), 1);
    assert!(harness.wait_for_status("job", TaskStatus::Failed).await);

    let failed = harness.queue.get("job").unwrap();
    assert_eq!(failed.attempts, 3);
    assert_eq!(failed.attempts, failed.max_attempts);
    assert!(failed.failed_at.is_some());
    assert!(failed.last_error.is_some());
    assert_eq!(harness.executor.call_count(), 3);

    let warnings = harness.log.by_level(LogLevel::Warn);
    let delays: Vec<u64> = warnings
        .iter()
        .filter_map(|e| e.data["delay_ms"].as_u64())
        .collect();
    assert_eq!(delays, vec![5_000, 10_000]);
    assert_eq!(harness.log.by_level(LogLevel::Error).len(), 1);
}

#[tokio::test]
async fn test_attempts_never_exceed_max_in_update_stream() {
    let harness = TestHarness::with_concurrency(1);
    let mut updates = harness.queue.subscribe();
    harness
        .executor
        .fail_always(ExecutionError::connection("refused"));
    harness
        .queue
        .enqueue(fixtures::manual_download("job", Priority::Normal).with_max_attempts(2))
        .unwrap();

    harness.queue.tick();
    assert!(harness.wait_for_status("job", TaskStatus::Retrying).await);
    harness.clock.advance_ms(60_000);
    harness.queue.tick();
    assert!(harness.wait_for_status("job", TaskStatus::Failed).await);

    let updates = drain_updates(&mut updates);
    assert!(!updates.is_empty());
    for update in &updates {
        assert!(update.task.attempts <= update.task.max_attempts);
        if update.task.status == TaskStatus::Failed {
            assert_eq!(update.task.attempts, update.task.max_attempts);
        }
    }
    assert_eq!(
        updates.last().map(|u| u.task.status),
        Some(TaskStatus::Failed)
    );
}

#[tokio::test]
async fn test_concurrency_cap_is_never_exceeded() {
    let harness = TestHarness::with_concurrency(2);
    harness.executor.hold();

    for i in 0..5 {
        harness
            .queue
            .enqueue(fixtures::manual_download(&format!("t{}", i), Priority::Normal))
            .unwrap();
    }

    assert_eq!(harness.queue.tick(), 2);
    // Slots are full: further ticks dispatch nothing.
    assert_eq!(harness.queue.tick(), 0);

    let executor = harness.executor.clone();
    assert!(wait_for(|| executor.in_flight() == 2, WAIT).await);
    let stats = harness.queue.stats();
    assert_eq!(stats.processing, 2);
    assert_eq!(stats.queued, 3);

    harness.executor.release();
    for _ in 0..20 {
        harness.queue.tick();
        if harness.queue.stats().completed == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(harness.wait_until(|q| q.stats().completed == 5).await);
    assert_eq!(harness.executor.peak_concurrency(), 2);
}

#[tokio::test]
async fn test_cancel_queued_task_is_final() {
    let harness = TestHarness::with_concurrency(1);
    harness
        .queue
        .enqueue(fixtures::manual_download("a", Priority::Normal))
        .unwrap();

    let cancelled = harness.queue.cancel("a").unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    assert_eq!(harness.queue.tick(), 0);
    assert_eq!(harness.executor.call_count(), 0);
    assert_eq!(
        harness.queue.get("a").map(|t| t.status),
        Some(TaskStatus::Cancelled)
    );
}

#[tokio::test]
async fn test_cancel_during_retry_window_is_honored() {
    let harness = TestHarness::with_concurrency(1);
    harness
        .executor
        .push_error(ExecutionError::connection("refused"));
    harness
        .queue
        .enqueue(fixtures::manual_download("a", Priority::Normal))
        .unwrap();

    harness.queue.tick();
    assert!(harness.wait_for_status("a", TaskStatus::Retrying).await);

    let cancelled = harness.queue.cancel("a").unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    // The retry delay elapses, but the task is never reinserted.
    harness.clock.advance_ms(120_000);
    assert_eq!(harness.queue.tick(), 0);
    assert_eq!(harness.executor.call_count(), 1);

    let stats = harness.queue.stats();
    assert_eq!(stats.retrying, 0);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.cancelled, 1);
}

#[tokio::test]
async fn test_late_result_after_cancel_is_discarded() {
    let harness = TestHarness::with_concurrency(1);
    harness.executor.hold();
    harness
        .queue
        .enqueue(fixtures::manual_download("a", Priority::Normal))
        .unwrap();
    harness.queue.tick();

    let executor = harness.executor.clone();
    assert!(wait_for(|| executor.in_flight() == 1, WAIT).await);
    harness.queue.cancel("a").unwrap();

    // The slot is free again as soon as the task is cancelled.
    harness
        .queue
        .enqueue(fixtures::manual_download("b", Priority::Normal))
        .unwrap();
    assert_eq!(harness.queue.tick(), 1);

    harness.executor.release();
    assert!(harness.wait_for_status("b", TaskStatus::Completed).await);
    assert!(wait_for(|| executor.in_flight() == 0, WAIT).await);

    let a = harness.queue.get("a").unwrap();
    assert_eq!(a.status, TaskStatus::Cancelled);
    assert!(a.result.is_none());
    assert_eq!(harness.queue.stats().completed, 1);
}

#[tokio::test]
async fn test_duplicate_active_id_is_rejected() {
    let harness = TestHarness::with_concurrency(1);
    harness
        .queue
        .enqueue(fixtures::manual_download("a", Priority::Normal))
        .unwrap();

    let err = harness
        .queue
        .enqueue(fixtures::manual_download("a", Priority::High))
        .unwrap_err();
    assert_eq!(
        err,
        QueueError::Validation(ValidationError::Duplicate("a".to_string()))
    );
    assert_eq!(harness.queue.stats().queued, 1);
    assert_eq!(harness.queue.get("a").unwrap().priority, Priority::Normal);
}

#[tokio::test]
async fn test_finished_id_is_reserved_for_retention_window() {
    let harness = TestHarness::with_concurrency(1);
    harness
        .queue
        .enqueue(fixtures::manual_download("a", Priority::Normal))
        .unwrap();
    harness.queue.tick();
    assert!(harness.wait_for_status("a", TaskStatus::Completed).await);

    let err = harness
        .queue
        .enqueue(fixtures::manual_download("a", Priority::Normal))
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::Validation(ValidationError::Duplicate(_))
    ));
    assert_eq!(harness.queue.stats().completed, 1);

    // Past the 24 hour window the old record no longer counts, swept or not.
    harness.clock.advance(ChronoDuration::hours(25));
    harness
        .queue
        .enqueue(fixtures::manual_download("a", Priority::Normal))
        .unwrap();
    assert_eq!(
        harness.queue.get("a").map(|t| t.status),
        Some(TaskStatus::Queued)
    );
}

#[tokio::test]
async fn test_cancelled_id_can_be_enqueued_again() {
    let harness = TestHarness::with_concurrency(1);
    harness
        .queue
        .enqueue(fixtures::manual_download("a", Priority::Normal))
        .unwrap();
    harness.queue.cancel("a").unwrap();

    harness
        .queue
        .enqueue(fixtures::manual_download("a", Priority::Normal))
        .unwrap();
    let stats = harness.queue.stats();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.queued, 1);
}

#[tokio::test]
async fn test_one_active_per_printer_policy() {
    let harness = TestHarness::new(QueueConfig {
        dedup: DedupPolicy::OneActivePerPrinter,
        ..Default::default()
    });

    let first = Task::current_job_download("p1", "Prusa", None, Priority::High);
    let second = Task::current_job_download("p1", "Prusa", None, Priority::High);
    let other_printer = Task::current_job_download("p2", "Bambu", None, Priority::High);

    harness.queue.enqueue(first).unwrap();
    let err = harness.queue.enqueue(second).unwrap_err();
    assert!(matches!(
        err,
        QueueError::Validation(ValidationError::PrinterBusy { .. })
    ));
    harness.queue.enqueue(other_printer).unwrap();
    assert_eq!(harness.queue.stats().queued, 2);
}

#[tokio::test]
async fn test_invalid_tasks_never_count_attempts() {
    let harness = TestHarness::with_concurrency(1);

    let exhausted = {
        let mut task = fixtures::manual_download("spent", Priority::Normal);
        task.attempts = 3;
        task
    };
    assert!(matches!(
        harness.queue.enqueue(exhausted),
        Err(QueueError::Validation(ValidationError::NoAttemptsLeft { .. }))
    ));

    let unnamed = fixtures::manual_download("", Priority::Normal);
    assert_eq!(
        harness.queue.enqueue(unnamed).unwrap_err(),
        QueueError::Validation(ValidationError::MissingId)
    );

    assert!(harness.queue.snapshot().is_empty());
    assert_eq!(harness.log.by_level(LogLevel::Warn).len(), 2);
}

#[tokio::test]
async fn test_retention_sweep_removes_only_old_finished_tasks() {
    let harness = TestHarness::with_concurrency(1);
    harness
        .queue
        .enqueue(fixtures::manual_download("old", Priority::Normal))
        .unwrap();
    harness.queue.tick();
    assert!(harness.wait_for_status("old", TaskStatus::Completed).await);

    harness.clock.advance(ChronoDuration::hours(23));
    harness
        .queue
        .enqueue(fixtures::manual_download("fresh", Priority::Normal))
        .unwrap();
    harness.queue.tick();
    assert!(harness.wait_for_status("fresh", TaskStatus::Completed).await);
    harness
        .queue
        .enqueue(fixtures::manual_download("waiting", Priority::Low))
        .unwrap();

    harness.clock.advance(ChronoDuration::hours(2));
    assert_eq!(harness.queue.sweep(), 1);

    assert!(harness.queue.get("old").is_none());
    assert!(harness.queue.get("fresh").is_some());
    assert_eq!(
        harness.queue.get("waiting").map(|t| t.status),
        Some(TaskStatus::Queued)
    );
}

#[tokio::test]
async fn test_drain_rejects_new_work_and_reports_discarded() {
    let harness = TestHarness::with_concurrency(1);
    harness.executor.set_delay(Duration::from_millis(30));
    harness
        .queue
        .enqueue(fixtures::manual_download("running", Priority::Normal))
        .unwrap();
    harness
        .queue
        .enqueue(fixtures::manual_download("waiting", Priority::Normal))
        .unwrap();
    harness.queue.tick();

    let report = harness.queue.drain(Duration::from_secs(1)).await;
    assert_eq!(report.discarded, vec!["waiting".to_string()]);
    assert_eq!(report.still_processing, 0);
    assert!(!report.timed_out);
    assert_eq!(
        harness.queue.get("running").map(|t| t.status),
        Some(TaskStatus::Completed)
    );

    assert!(!harness.queue.is_accepting());
    assert_eq!(
        harness
            .queue
            .enqueue(fixtures::manual_download("late", Priority::Normal))
            .unwrap_err(),
        QueueError::Closed(QueueKind::Download)
    );

    let entries = harness.log.by_category(LogCategory::Download);
    let drained = entries
        .iter()
        .find(|e| e.message.contains("queue drained"))
        .expect("drain entry");
    assert_eq!(drained.data["discarded"][0], "waiting");
}
