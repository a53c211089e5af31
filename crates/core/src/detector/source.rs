//! Poll collaborator: lists the printers the integration currently knows about.

use async_trait::async_trait;
use thiserror::Error;

use super::types::PrinterStatus;

/// Errors from a printer source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("printer source unavailable: {0}")]
    Unavailable(String),

    #[error("printer source timed out")]
    Timeout,

    #[error("invalid response from printer source: {0}")]
    InvalidResponse(String),
}

/// Lists active printers for the poll fallback.
#[async_trait]
pub trait PrinterSource: Send + Sync {
    /// Returns the name of this source implementation.
    fn name(&self) -> &str;

    /// Current status of every active printer.
    async fn active_printers(&self) -> Result<Vec<PrinterStatus>, SourceError>;
}
