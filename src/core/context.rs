//! Execution context handed to task bodies.

use chrono::{DateTime, Utc};

use super::types::{RunId, TaskName};

/// Read-only view of the invocation a task body is running in.
///
/// Bodies receive nothing beyond this context; they must not assume any
/// foreground process or UI is available.
#[derive(Debug, Clone)]
pub struct TaskContext {
    run_id: RunId,
    task_name: TaskName,
    attempt: u32,
    scheduled_at: DateTime<Utc>,
}

impl TaskContext {
    /// Create a context for one invocation.
    pub fn new(
        run_id: RunId,
        task_name: TaskName,
        attempt: u32,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            task_name,
            attempt,
            scheduled_at,
        }
    }

    /// Identifier of this invocation.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Name of the task being run.
    pub fn task_name(&self) -> &TaskName {
        &self.task_name
    }

    /// Failures already recorded this period (0 on the first attempt).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether this invocation is a retry within the current period.
    pub fn is_retry(&self) -> bool {
        self.attempt > 0
    }

    /// The fire time this invocation was scheduled for.
    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.scheduled_at
    }
}
