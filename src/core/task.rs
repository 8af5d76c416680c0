//! Task trait and error types.
//!
//! The `Task` trait is the opaque unit of work a periodic schedule runs.
//! Implement it to supply the body of a recurring task.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::context::TaskContext;

/// Errors a task body can report.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Task timed out.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    /// External command failed with exit code.
    #[error("command exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    /// The body panicked; caught at the executor boundary.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// The body of a periodic task.
///
/// # Example
///
/// ```ignore
/// use tend::{Task, TaskContext, TaskError};
/// use async_trait::async_trait;
///
/// struct Collect;
///
/// #[async_trait]
/// impl Task for Collect {
///     fn name(&self) -> &str {
///         "data_collection"
///     }
///
///     async fn execute(&self, ctx: &TaskContext) -> Result<(), TaskError> {
///         if ctx.is_retry() {
///             tracing::info!(attempt = ctx.attempt(), "retrying collection");
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync {
    /// Name of the periodic task this body belongs to.
    fn name(&self) -> &str;

    /// Run the body once.
    ///
    /// # Returns
    /// * `Ok(())` - Task completed successfully
    /// * `Err(TaskError)` - Task failed; the retry controller takes over
    async fn execute(&self, ctx: &TaskContext) -> Result<(), TaskError>;

    /// Time limit for one invocation. A timeout counts as a failure.
    ///
    /// Default implementation returns no limit.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Optional description for display/logging purposes.
    fn description(&self) -> Option<&str> {
        None
    }
}
