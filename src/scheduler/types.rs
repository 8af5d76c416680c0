//! Scheduler type definitions.
//!
//! This module contains error types, state enums, and command types for the scheduler.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::definition::{DefinitionError, ExistingPolicy, TaskDefinition};
use crate::core::run::TaskRun;
use crate::core::types::TaskName;
use crate::execution::ExecutorError;
use crate::storage::StorageError;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The requested schedule violates the platform minimums. Never retried.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(#[from] DefinitionError),

    /// The registry could not be read or written. No schedule was mutated.
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(#[from] StorageError),

    /// No registry entry exists for the task.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// An invocation could not be started or recorded.
    #[error(transparent)]
    Execution(#[from] ExecutorError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
    /// Scheduler is paused.
    Paused,
}

/// What `enqueue_periodic` did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new entry was written (or a cancelled one revived).
    Created,
    /// An entry already existed and was left untouched.
    Kept,
    /// The existing entry was rescheduled from now.
    Replaced,
}

/// Commands that can be sent to the scheduler.
pub(crate) enum SchedulerCommand {
    /// Register or re-register a periodic task.
    EnqueuePeriodic {
        definition: TaskDefinition,
        policy: ExistingPolicy,
        response: oneshot::Sender<Result<EnqueueOutcome, SchedulerError>>,
    },
    /// Run a task now, outside its schedule.
    Trigger {
        name: TaskName,
        response: oneshot::Sender<Result<TaskRun, SchedulerError>>,
    },
    /// Cancel a task's schedule.
    Cancel {
        name: TaskName,
        response: oneshot::Sender<Result<bool, SchedulerError>>,
    },
    /// Pause the scheduler.
    Pause { response: oneshot::Sender<()> },
    /// Resume the scheduler.
    Resume { response: oneshot::Sender<()> },
    /// Shutdown the scheduler.
    Shutdown { response: oneshot::Sender<()> },
}
