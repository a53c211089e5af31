//! Per-printer observation tracking and edge detection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::types::{JobEdge, PrinterObservation, PrinterStatus, PRINTING_STATUS};

/// Last known status of every printer seen so far.
#[derive(Debug, Default)]
pub struct PrinterObservationTracker {
    printers: HashMap<String, PrinterObservation>,
}

impl PrinterObservationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status` and return the edge relative to the previous observation.
    ///
    /// The first observation of a printer never produces an edge.
    pub fn observe(&mut self, status: &PrinterStatus, now: DateTime<Utc>) -> JobEdge {
        let previous = self.printers.insert(
            status.printer_id.clone(),
            PrinterObservation {
                printer_id: status.printer_id.clone(),
                status: status.status.clone(),
                current_job: status.current_job.clone(),
                name: status.name.clone(),
                last_update: now,
            },
        );

        let Some(previous) = previous else {
            return JobEdge::None;
        };

        let was_printing = previous.status == PRINTING_STATUS;
        let is_printing = status.is_printing();

        match (was_printing, is_printing) {
            (false, true) => JobEdge::JobStarted,
            (true, false) => JobEdge::JobCompleted,
            _ => JobEdge::None,
        }
    }

    pub fn get(&self, printer_id: &str) -> Option<&PrinterObservation> {
        self.printers.get(printer_id)
    }

    /// All observations, ordered by printer id.
    pub fn snapshot(&self) -> Vec<PrinterObservation> {
        let mut all: Vec<_> = self.printers.values().cloned().collect();
        all.sort_by(|a, b| a.printer_id.cmp(&b.printer_id));
        all
    }

    pub fn len(&self) -> usize {
        self.printers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.printers.is_empty()
    }
}
