//! Mock printer source for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::detector::{PrinterSource, PrinterStatus, SourceError};

/// Mock implementation of the PrinterSource trait.
///
/// Returns whatever printer list was last set, and can be told to fail once,
/// fail on every poll, or never answer.
#[derive(Debug, Default)]
pub struct MockPrinterSource {
    printers: Mutex<Vec<PrinterStatus>>,
    /// If set, the next poll fails with this error.
    next_error: Mutex<Option<SourceError>>,
    /// If set, every poll fails with this error.
    always_error: Mutex<Option<SourceError>>,
    polls: AtomicUsize,
    /// If set, polls never complete.
    hanging: AtomicBool,
}

impl MockPrinterSource {
    /// Create a mock source with no printers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the printers returned by subsequent polls.
    pub fn set_printers(&self, printers: Vec<PrinterStatus>) {
        *self.printers.lock().unwrap() = printers;
    }

    /// Configure the next poll to fail with the given error.
    pub fn set_next_error(&self, error: SourceError) {
        *self.next_error.lock().unwrap() = Some(error);
    }

    /// Fail every poll until `clear_errors` is called.
    pub fn fail_always(&self, error: SourceError) {
        *self.always_error.lock().unwrap() = Some(error);
    }

    /// Clear any pending errors.
    pub fn clear_errors(&self) {
        *self.next_error.lock().unwrap() = None;
        *self.always_error.lock().unwrap() = None;
    }

    /// Make every subsequent poll hang forever.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Get the number of polls made.
    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrinterSource for MockPrinterSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn active_printers(&self) -> Result<Vec<PrinterStatus>, SourceError> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if let Some(error) = self.next_error.lock().unwrap().take() {
            return Err(error);
        }
        if let Some(error) = self.always_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.printers.lock().unwrap().clone())
    }
}
