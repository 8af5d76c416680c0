//! Conversion from configuration into scheduler inputs.
//!
//! Turns [`TendConfig`] into task definitions, a retry policy and bound
//! command task bodies.

use std::sync::Arc;

use crate::core::definition::TaskDefinition;
use crate::core::retry::RetryPolicy;
use crate::core::task::Task;
use crate::execution::CommandTask;

use super::types::{RetryConfig, TaskConfig, TendConfig};

impl TaskConfig {
    /// The schedule half of this entry.
    pub fn definition(&self) -> TaskDefinition {
        TaskDefinition::new(self.name.as_str(), self.interval).with_flex(self.flex)
    }

    /// Build the command body, if one is configured.
    pub fn build_task(&self) -> Option<Arc<dyn Task>> {
        let command = self.command.as_ref()?;

        let mut builder = CommandTask::builder(&command.program)
            .name(&self.name)
            .args(command.args.iter().cloned())
            .envs(command.env.clone());
        if let Some(dir) = &command.working_dir {
            builder = builder.working_dir(dir);
        }
        if let Some(timeout) = command.timeout {
            builder = builder.timeout(timeout);
        }

        Some(Arc::new(builder.build()))
    }
}

impl RetryConfig {
    /// Convert to the runtime policy.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
        }
    }
}

impl TendConfig {
    /// Desired definitions, in file order.
    pub fn definitions(&self) -> Vec<TaskDefinition> {
        self.tasks.iter().map(TaskConfig::definition).collect()
    }

    /// Retry policy shared by all tasks.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.to_policy()
    }

    /// Command bodies for every task that configures one.
    pub fn build_tasks(&self) -> Vec<Arc<dyn Task>> {
        self.tasks.iter().filter_map(TaskConfig::build_task).collect()
    }

    /// Find a task entry by name.
    pub fn task(&self, name: &str) -> Option<&TaskConfig> {
        self.tasks.iter().find(|t| t.name == name)
    }
}
