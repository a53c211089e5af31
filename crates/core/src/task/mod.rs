//! Task model, errors and the executor seam.

mod error;
mod executor;
mod types;

pub use error::{ErrorClass, ExecutionError, ExecutionErrorKind, QueueError, ValidationError};
pub use executor::Executor;
pub use types::*;
