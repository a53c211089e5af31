//! Structured, bounded event log.
//!
//! Every scheduler and detector transition is recorded here as a [`LogEntry`].
//! Entries are kept in a capped in-memory buffer for querying and export, and
//! handed to an optional [`LogSink`] for durable storage: warn and above
//! immediately, everything else on a periodic batch.

mod config;
mod log;
mod sqlite;
mod store;
mod types;

pub use config::EventLogConfig;
pub use log::EventLog;
pub use sqlite::SqliteLogSink;
pub use store::{LogError, LogSink};
pub use types::*;
