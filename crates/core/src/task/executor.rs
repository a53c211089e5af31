//! Executor trait: the collaborator that performs a task's actual I/O.

use async_trait::async_trait;

use super::{ExecutionError, Task, TaskResult};

/// Performs the work behind a task.
///
/// The queue imposes no timeout on `execute`. An executor that never returns
/// holds its concurrency slot forever, so implementations must enforce their
/// own deadlines.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Returns the name of this executor implementation.
    fn name(&self) -> &str;

    /// Run the task once. Errors are retried by the queue until the task's
    /// attempts are exhausted.
    async fn execute(&self, task: &Task) -> Result<TaskResult, ExecutionError>;
}
