//! Periodic task definitions and registration policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::retry::serde_duration;
use super::types::TaskName;

/// Smallest interval a periodic task may be registered with.
///
/// Shorter periods would defeat the batching that keeps background work cheap,
/// so they are rejected rather than rounded up.
pub const MIN_PERIODIC_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Reasons a definition cannot be scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// The task name is empty.
    #[error("task name must not be empty")]
    EmptyName,

    /// The interval is below [`MIN_PERIODIC_INTERVAL`].
    #[error("interval {interval:?} is below the minimum of {minimum:?}")]
    IntervalTooShort { interval: Duration, minimum: Duration },

    /// The flex window is wider than the period it sits in.
    #[error("flex window {flex:?} exceeds interval {interval:?}")]
    FlexExceedsInterval { flex: Duration, interval: Duration },
}

/// What to do when a task with the same name is already registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingPolicy {
    /// Leave the existing schedule, attempt count and next fire time untouched.
    #[default]
    #[serde(alias = "keep")]
    KeepExisting,
    /// Discard retry state and reschedule from now.
    Replace,
}

/// A recurring task: its name, nominal period and flex window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Identity key.
    pub name: TaskName,
    /// Nominal period between runs.
    #[serde(with = "serde_duration")]
    pub interval: Duration,
    /// Tolerance before the nominal fire time within which a run may start.
    #[serde(with = "serde_duration")]
    pub flex: Duration,
}

impl TaskDefinition {
    /// Create a definition with no flex window.
    pub fn new(name: impl Into<TaskName>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            flex: Duration::ZERO,
        }
    }

    /// Builder: set the flex window.
    pub fn with_flex(mut self, flex: Duration) -> Self {
        self.flex = flex;
        self
    }

    /// Check the definition against the platform minimums.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.is_blank() {
            return Err(DefinitionError::EmptyName);
        }
        if self.interval < MIN_PERIODIC_INTERVAL {
            return Err(DefinitionError::IntervalTooShort {
                interval: self.interval,
                minimum: MIN_PERIODIC_INTERVAL,
            });
        }
        if self.flex > self.interval {
            return Err(DefinitionError::FlexExceedsInterval {
                flex: self.flex,
                interval: self.interval,
            });
        }
        Ok(())
    }
}
