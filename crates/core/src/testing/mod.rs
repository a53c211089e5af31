//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of every collaborator trait,
//! allowing the queues, detector and orchestrator to be exercised without
//! real printers or storage.
//!
//! # Example
//!
//! ```rust,ignore
//! use printwatch_core::testing::{MockExecutor, MockPrinterSource};
//!
//! let downloads = MockExecutor::new("downloads");
//! let source = MockPrinterSource::new();
//!
//! // Configure mock behavior
//! downloads.set_has_thumbnail(false);
//! source.set_printers(vec![fixtures::printing("p1", "benchy.gcode")]);
//! ```

mod memory_log_sink;
mod mock_executor;
mod mock_printer_source;

pub use memory_log_sink::MemoryLogSink;
pub use mock_executor::MockExecutor;
pub use mock_printer_source::MockPrinterSource;

use std::time::Duration;

/// Poll `condition` until it holds or `timeout` elapses. Returns whether it held.
pub async fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = std::time::Instant::now();
    let poll_interval = Duration::from_millis(5);

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    condition()
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::detector::PrinterStatus;
    use crate::task::{DownloadOutcome, Priority, Task, TaskResult};

    /// A printer reporting `idle`.
    pub fn idle(printer_id: &str) -> PrinterStatus {
        PrinterStatus::new(printer_id, "idle").with_name(format!("Printer {}", printer_id))
    }

    /// A printer reporting `printing` with a current job.
    pub fn printing(printer_id: &str, job: &str) -> PrinterStatus {
        PrinterStatus::new(printer_id, "printing")
            .with_job(job)
            .with_name(format!("Printer {}", printer_id))
    }

    /// A manual download task with a fixed id.
    pub fn manual_download(id: &str, priority: Priority) -> Task {
        Task::manual_download("p1", "Printer p1", format!("{}.gcode", id), priority).with_id(id)
    }

    /// A successful download result.
    pub fn download_result(file_id: &str, filename: &str, has_thumbnail: bool) -> TaskResult {
        TaskResult::Download(DownloadOutcome {
            file_id: file_id.to_string(),
            filename: filename.to_string(),
            size_bytes: Some(2048),
            has_thumbnail,
        })
    }
}
