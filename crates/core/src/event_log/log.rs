use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{window_start, Clock};
use crate::metrics;

use super::config::EventLogConfig;
use super::{ExportPeriod, LogCategory, LogEntry, LogError, LogExport, LogFilter, LogLevel, LogSink};

struct LogBuffer {
    entries: VecDeque<LogEntry>,
    /// Entries accepted but not yet handed to the sink.
    unflushed: Vec<LogEntry>,
}

struct LogInner {
    session_id: String,
    config: EventLogConfig,
    clock: Arc<dyn Clock>,
    sink: Option<Arc<dyn LogSink>>,
    buffer: Mutex<LogBuffer>,
    /// Serializes flushes so batches reach the sink in order.
    flush_lock: Mutex<()>,
    /// Wakes the flush loop early. Installed by `start`.
    flush_requests: Mutex<Option<mpsc::Sender<()>>>,
    next_id: AtomicU64,
}

/// Append-only, bounded, queryable record of what the engine did.
///
/// Cheap to clone; all clones share one buffer.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<LogInner>,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("session_id", &self.inner.session_id)
            .field("len", &self.len())
            .finish()
    }
}

impl EventLog {
    /// Create an event log. Without a sink, entries live only in memory.
    pub fn new(
        config: EventLogConfig,
        clock: Arc<dyn Clock>,
        sink: Option<Arc<dyn LogSink>>,
    ) -> Self {
        Self {
            inner: Arc::new(LogInner {
                session_id: uuid::Uuid::new_v4().to_string(),
                config,
                clock,
                sink,
                buffer: Mutex::new(LogBuffer {
                    entries: VecDeque::new(),
                    unflushed: Vec::new(),
                }),
                flush_lock: Mutex::new(()),
                flush_requests: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn config(&self) -> &EventLogConfig {
        &self.inner.config
    }

    /// Append an entry. Returns the entry id, or `None` if the level is below
    /// the configured minimum.
    ///
    /// Warn and above wake the flush loop; the sink write happens there, never
    /// on the caller. Until `start` runs they wait for an explicit `flush`.
    pub fn log(
        &self,
        category: LogCategory,
        message: impl Into<String>,
        data: Value,
        level: LogLevel,
    ) -> Option<u64> {
        if level < self.inner.config.min_level {
            return None;
        }

        let entry = LogEntry {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            session_id: self.inner.session_id.clone(),
            timestamp: self.inner.clock.now(),
            category,
            level,
            message: message.into(),
            data,
        };
        let id = entry.id;

        Self::mirror(&entry);
        metrics::LOG_ENTRIES
            .with_label_values(&[category.as_str(), level.as_str()])
            .inc();

        {
            let mut buffer = self.inner.buffer.lock().unwrap();
            if self.inner.sink.is_some() {
                buffer.unflushed.push(entry.clone());
            }
            buffer.entries.push_back(entry);
            while buffer.entries.len() > self.inner.config.max_entries {
                buffer.entries.pop_front();
            }
        }

        if level.flushes_immediately() && self.inner.sink.is_some() {
            self.request_flush();
        }

        Some(id)
    }

    pub fn debug(&self, category: LogCategory, message: impl Into<String>, data: Value) -> Option<u64> {
        self.log(category, message, data, LogLevel::Debug)
    }

    pub fn info(&self, category: LogCategory, message: impl Into<String>, data: Value) -> Option<u64> {
        self.log(category, message, data, LogLevel::Info)
    }

    pub fn warn(&self, category: LogCategory, message: impl Into<String>, data: Value) -> Option<u64> {
        self.log(category, message, data, LogLevel::Warn)
    }

    pub fn error(&self, category: LogCategory, message: impl Into<String>, data: Value) -> Option<u64> {
        self.log(category, message, data, LogLevel::Error)
    }

    pub fn critical(
        &self,
        category: LogCategory,
        message: impl Into<String>,
        data: Value,
    ) -> Option<u64> {
        self.log(category, message, data, LogLevel::Critical)
    }

    fn mirror(entry: &LogEntry) {
        let category = entry.category.as_str();
        match entry.level {
            LogLevel::Debug => debug!(category, data = %entry.data, "{}", entry.message),
            LogLevel::Info => info!(category, data = %entry.data, "{}", entry.message),
            LogLevel::Warn => warn!(category, data = %entry.data, "{}", entry.message),
            LogLevel::Error => error!(category, data = %entry.data, "{}", entry.message),
            LogLevel::Critical => {
                error!(category, critical = true, data = %entry.data, "{}", entry.message)
            }
        }
    }

    fn request_flush(&self) {
        let requests = self.inner.flush_requests.lock().unwrap();
        if let Some(tx) = requests.as_ref() {
            // Full means a flush is already pending.
            if let Err(mpsc::error::TrySendError::Closed(())) = tx.try_send(()) {
                debug!("Event log flush loop has stopped, entry stays pending");
            }
        }
    }

    /// `flush` on the blocking pool, so sink I/O stays off the async workers.
    pub async fn flush_in_background(&self) -> Result<usize, LogError> {
        let log = self.clone();
        tokio::task::spawn_blocking(move || log.flush())
            .await
            .unwrap_or_else(|e| Err(LogError::Database(format!("flush task failed: {}", e))))
    }

    /// Hand every pending entry to the sink. Returns how many were written.
    ///
    /// On failure the batch stays pending and is retried on the next flush.
    pub fn flush(&self) -> Result<usize, LogError> {
        let Some(sink) = &self.inner.sink else {
            return Ok(0);
        };

        let _guard = self.inner.flush_lock.lock().unwrap();

        let batch = {
            let mut buffer = self.inner.buffer.lock().unwrap();
            std::mem::take(&mut buffer.unflushed)
        };
        if batch.is_empty() {
            return Ok(0);
        }

        match sink.persist(&batch) {
            Ok(()) => Ok(batch.len()),
            Err(e) => {
                metrics::LOG_FLUSH_FAILURES.inc();
                let mut buffer = self.inner.buffer.lock().unwrap();
                let mut pending = batch;
                pending.append(&mut buffer.unflushed);
                let overflow = pending.len().saturating_sub(self.inner.config.max_entries);
                if overflow > 0 {
                    pending.drain(..overflow);
                }
                buffer.unflushed = pending;
                Err(e)
            }
        }
    }

    /// Number of entries waiting for the next flush.
    pub fn pending_flush(&self) -> usize {
        self.inner.buffer.lock().unwrap().unflushed.len()
    }

    /// Number of entries currently buffered.
    pub fn len(&self) -> usize {
        self.inner.buffer.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries matching `filter`, oldest first.
    pub fn query(&self, filter: &LogFilter) -> Vec<LogEntry> {
        let buffer = self.inner.buffer.lock().unwrap();
        let mut matches: Vec<LogEntry> = buffer
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            let skip = matches.len().saturating_sub(limit);
            matches.drain(..skip);
        }
        matches
    }

    pub fn by_category(&self, category: LogCategory) -> Vec<LogEntry> {
        self.query(&LogFilter::new().with_category(category))
    }

    pub fn by_level(&self, level: LogLevel) -> Vec<LogEntry> {
        self.query(&LogFilter::new().with_level(level))
    }

    pub fn in_range(
        &self,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
    ) -> Vec<LogEntry> {
        self.query(&LogFilter::new().with_time_range(Some(from), Some(to)))
    }

    /// The newest `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        self.query(&LogFilter::new().with_limit(n))
    }

    /// Drop entries older than the retention window. Returns how many were removed
    /// from memory.
    pub fn sweep(&self) -> usize {
        let cutoff = window_start(
            self.inner.clock.now(),
            ChronoDuration::try_days(i64::from(self.inner.config.retention_days)),
        );

        let removed = {
            let mut buffer = self.inner.buffer.lock().unwrap();
            let before = buffer.entries.len();
            buffer.entries.retain(|e| e.timestamp >= cutoff);
            buffer.unflushed.retain(|e| e.timestamp >= cutoff);
            before - buffer.entries.len()
        };

        if let Some(sink) = &self.inner.sink {
            match sink.purge_before(cutoff) {
                Ok(purged) => debug!("Purged {} persisted log entries before {}", purged, cutoff),
                Err(e) => error!("Failed to purge persisted log entries: {}", e),
            }
        }

        if removed > 0 {
            info!("Log retention sweep removed {} entries", removed);
        }
        removed
    }

    /// Bundle the last `days` days of entries for external serialization.
    pub fn export(&self, days: u32) -> LogExport {
        let now = self.inner.clock.now();
        let from = window_start(now, ChronoDuration::try_days(i64::from(days)));
        let entries = self.in_range(from, now);

        LogExport {
            exported_at: now,
            period: ExportPeriod { from, to: now, days },
            count: entries.len(),
            entries,
        }
    }

    /// Spawn the periodic flush and retention loops.
    ///
    /// The flush loop writes on its interval and whenever a warn or worse entry
    /// arrives. Both stop when `shutdown` fires; the flush loop flushes once more
    /// on the way out.
    pub fn start(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let flush_log = self.clone();
        let mut flush_shutdown = shutdown.subscribe();
        let flush_interval = Duration::from_millis(self.inner.config.flush_interval_ms);
        let (flush_tx, mut flush_rx) = mpsc::channel(1);
        *self.inner.flush_requests.lock().unwrap() = Some(flush_tx);
        if self.pending_flush() > 0 {
            self.request_flush();
        }

        let flush_handle = tokio::spawn(async move {
            debug!("Event log flush loop started");
            loop {
                tokio::select! {
                    _ = flush_shutdown.recv() => break,
                    Some(()) = flush_rx.recv() => {
                        if let Err(e) = flush_log.flush_in_background().await {
                            error!("Event log flush failed: {}", e);
                        }
                    }
                    _ = tokio::time::sleep(flush_interval) => {
                        if let Err(e) = flush_log.flush_in_background().await {
                            warn!("Periodic event log flush failed: {}", e);
                        }
                    }
                }
            }
            flush_log.inner.flush_requests.lock().unwrap().take();
            if let Err(e) = flush_log.flush_in_background().await {
                error!("Final event log flush failed: {}", e);
            }
            debug!("Event log flush loop stopped");
        });

        let sweep_log = self.clone();
        let mut sweep_shutdown = shutdown.subscribe();
        let sweep_interval = Duration::from_millis(self.inner.config.sweep_interval_ms);

        let sweep_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sweep_shutdown.recv() => break,
                    _ = tokio::time::sleep(sweep_interval) => {
                        sweep_log.sweep();
                    }
                }
            }
        });

        vec![flush_handle, sweep_handle]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{wait_for, MemoryLogSink};
    use serde_json::json;

    fn log_with(
        config: EventLogConfig,
        sink: Option<Arc<MemoryLogSink>>,
    ) -> (EventLog, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let sink = sink.map(|s| s as Arc<dyn LogSink>);
        (EventLog::new(config, clock.clone(), sink), clock)
    }

    #[test]
    fn test_entries_below_min_level_are_dropped() {
        let (log, _) = log_with(EventLogConfig::default(), None);

        assert!(log.debug(LogCategory::System, "noise", json!({})).is_none());
        assert!(log.info(LogCategory::System, "hello", json!({})).is_some());
        assert_eq!(log.len(), 1);
        assert_eq!(log.recent(10)[0].message, "hello");
    }

    #[test]
    fn test_ids_are_monotonic_and_session_is_shared() {
        let (log, _) = log_with(EventLogConfig::default(), None);
        let a = log.info(LogCategory::System, "a", json!({})).unwrap();
        let b = log.info(LogCategory::System, "b", json!({})).unwrap();
        assert!(b > a);

        let entries = log.recent(2);
        assert_eq!(entries[0].session_id, log.session_id());
        assert_eq!(entries[1].session_id, log.session_id());
    }

    #[test]
    fn test_oldest_entries_evicted_at_cap() {
        let config = EventLogConfig {
            max_entries: 3,
            ..Default::default()
        };
        let (log, _) = log_with(config, None);

        for i in 0..5 {
            log.info(LogCategory::System, format!("entry {}", i), json!({}));
        }

        let messages: Vec<_> = log.recent(10).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["entry 2", "entry 3", "entry 4"]);
    }

    #[tokio::test]
    async fn test_warn_wakes_flush_loop_info_waits() {
        let sink = Arc::new(MemoryLogSink::new());
        let config = EventLogConfig {
            flush_interval_ms: 60_000,
            ..Default::default()
        };
        let (log, _) = log_with(config, Some(sink.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);
        let handles = log.start(&shutdown_tx);

        log.info(LogCategory::Download, "queued", json!({}));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.len(), 0);
        assert_eq!(log.pending_flush(), 1);

        log.warn(LogCategory::Download, "retrying", json!({}));
        let written = sink.clone();
        assert!(wait_for(|| written.len() == 2, Duration::from_secs(2)).await);
        assert_eq!(log.pending_flush(), 0);

        log.info(LogCategory::Download, "done", json!({}));
        assert_eq!(log.flush().unwrap(), 1);
        assert_eq!(sink.len(), 3);

        shutdown_tx.send(()).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[test]
    fn test_warn_never_writes_on_the_calling_thread() {
        let sink = Arc::new(MemoryLogSink::new());
        let (log, _) = log_with(EventLogConfig::default(), Some(sink.clone()));

        log.warn(LogCategory::Download, "rejected", json!({}));
        log.critical(LogCategory::System, "disk full", json!({}));
        assert_eq!(sink.len(), 0);
        assert_eq!(log.pending_flush(), 2);

        assert_eq!(log.flush().unwrap(), 2);
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_start_flushes_entries_logged_before_it() {
        let sink = Arc::new(MemoryLogSink::new());
        let config = EventLogConfig {
            flush_interval_ms: 60_000,
            ..Default::default()
        };
        let (log, _) = log_with(config, Some(sink.clone()));
        log.error(LogCategory::System, "early", json!({}));

        let (shutdown_tx, _) = broadcast::channel(1);
        let handles = log.start(&shutdown_tx);
        let written = sink.clone();
        assert!(wait_for(|| written.len() == 1, Duration::from_secs(2)).await);

        shutdown_tx.send(()).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[test]
    fn test_failed_flush_keeps_entries_pending() {
        let sink = Arc::new(MemoryLogSink::new());
        sink.set_failing(true);
        let (log, _) = log_with(EventLogConfig::default(), Some(sink.clone()));

        log.error(LogCategory::Download, "boom", json!({}));
        assert_eq!(sink.len(), 0);
        assert_eq!(log.pending_flush(), 1);

        sink.set_failing(false);
        assert_eq!(log.flush().unwrap(), 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_query_operations() {
        let (log, clock) = log_with(EventLogConfig::default(), None);
        let start = clock.now();

        log.info(LogCategory::Download, "d1", json!({}));
        clock.advance_ms(1000);
        log.error(LogCategory::Thumbnail, "t1", json!({}));
        clock.advance_ms(1000);
        log.info(LogCategory::Download, "d2", json!({}));

        assert_eq!(log.by_category(LogCategory::Download).len(), 2);
        assert_eq!(log.by_level(LogLevel::Error).len(), 1);
        assert_eq!(log.by_level(LogLevel::Error)[0].message, "t1");

        let ranged = log.in_range(start, start + ChronoDuration::milliseconds(1500));
        assert_eq!(ranged.len(), 2);

        let filtered = log.query(
            &LogFilter::new()
                .with_category(LogCategory::Download)
                .with_limit(1),
        );
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].message, "d2");

        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_sweep_drops_entries_past_retention() {
        let sink = Arc::new(MemoryLogSink::new());
        let (log, clock) = log_with(EventLogConfig::default(), Some(sink.clone()));

        log.warn(LogCategory::System, "old", json!({}));
        clock.advance(ChronoDuration::days(31));
        log.warn(LogCategory::System, "new", json!({}));
        assert_eq!(log.flush().unwrap(), 2);

        assert_eq!(log.sweep(), 1);
        let remaining = log.recent(10);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "new");
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_export_bundle() {
        let (log, clock) = log_with(EventLogConfig::default(), None);

        log.info(LogCategory::System, "ancient", json!({}));
        clock.advance(ChronoDuration::days(10));
        log.info(LogCategory::System, "recent", json!({ "k": 1 }));

        let export = log.export(7);
        assert_eq!(export.count, 1);
        assert_eq!(export.entries[0].message, "recent");
        assert_eq!(export.period.days, 7);
        assert_eq!(export.period.to, clock.now());
        assert_eq!(export.exported_at, clock.now());

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["entries"][0]["data"]["k"], 1);
    }

    #[test]
    fn test_export_and_sweep_with_unbounded_windows() {
        let config = EventLogConfig {
            retention_days: u32::MAX,
            ..Default::default()
        };
        let (log, clock) = log_with(config, Some(Arc::new(MemoryLogSink::new())));

        log.info(LogCategory::System, "ancient", json!({}));
        clock.advance(ChronoDuration::days(3_650));
        log.info(LogCategory::System, "recent", json!({}));

        let export = log.export(u32::MAX);
        assert_eq!(export.count, 2);
        assert_eq!(export.period.from, chrono::DateTime::<chrono::Utc>::MIN_UTC);
        assert_eq!(export.period.days, u32::MAX);

        assert_eq!(log.sweep(), 0);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_flush_loop_flushes_on_shutdown() {
        let sink = Arc::new(MemoryLogSink::new());
        let config = EventLogConfig {
            flush_interval_ms: 60_000,
            ..Default::default()
        };
        let (log, _) = log_with(config, Some(sink.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);

        let handles = log.start(&shutdown_tx);
        log.info(LogCategory::System, "pending", json!({}));
        assert_eq!(sink.len(), 0);

        shutdown_tx.send(()).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(sink.len(), 1);
    }
}
