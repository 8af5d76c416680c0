//! External command task implementation.
//!
//! [`CommandTask`] wraps an external executable as the opaque body of a
//! periodic task. This module provides a builder for configuring the command
//! with arguments, environment variables, a working directory and a timeout.
//!
//! # Quick Start
//!
//! ```rust
//! use tend::CommandTask;
//! use std::time::Duration;
//!
//! let task = CommandTask::builder("./collect.sh")
//!     .name("data_collection")
//!     .args(["--since", "6h"])
//!     .env("COLLECT_TARGET", "metrics")
//!     .timeout(Duration::from_secs(300))
//!     .build();
//! ```
//!
//! # Invocation Context
//!
//! Each run exports its context to the child process:
//!
//! - `TEND_TASK_NAME`: name of the periodic task
//! - `TEND_RUN_ID`: identifier of this invocation
//! - `TEND_ATTEMPT`: failures already recorded this period (0 on first attempt)
//!
//! # Error Handling
//!
//! - **Non-zero exit code**: [`TaskError::CommandFailed`] with the exit code
//!   and stderr output
//! - **Timeout**: [`TaskError::Timeout`]; the child is killed
//! - **Spawn failure**: [`TaskError::ExecutionFailed`] (e.g. program not found)
//!
//! All three count as a failed attempt for the retry controller.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::context::TaskContext;
use crate::core::task::{Task, TaskError};

/// A task that executes an external command.
#[derive(Debug, Clone)]
pub struct CommandTask {
    /// Task name (used for identification)
    name: String,
    /// Program to execute
    program: String,
    /// Command arguments
    args: Vec<String>,
    /// Environment variables
    env: HashMap<String, String>,
    /// Working directory
    working_dir: Option<PathBuf>,
    /// Execution timeout
    timeout: Option<Duration>,
}

impl CommandTask {
    /// Create a new builder for a command task.
    pub fn builder(program: impl Into<String>) -> CommandTaskBuilder {
        CommandTaskBuilder::new(program)
    }

    /// Get the program being executed.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the command arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Get the environment variables set on the child.
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Get the working directory.
    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }
}

#[async_trait]
impl Task for CommandTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        let mut cmd = Command::new(&self.program);

        cmd.args(&self.args);
        cmd.envs(&self.env);
        cmd.env("TEND_TASK_NAME", ctx.task_name().as_str());
        cmd.env("TEND_RUN_ID", ctx.run_id().to_string());
        cmd.env("TEND_ATTEMPT", ctx.attempt().to_string());

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let output = match self.timeout {
            Some(duration) => timeout(duration, cmd.output())
                .await
                .map_err(|_| TaskError::Timeout(duration))?
                .map_err(|e| TaskError::ExecutionFailed(e.to_string()))?,
            None => cmd
                .output()
                .await
                .map_err(|e| TaskError::ExecutionFailed(e.to_string()))?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let code = output.status.code().unwrap_or(-1);

        tracing::debug!(
            task = %self.name,
            run_id = %ctx.run_id(),
            exit_code = code,
            stdout = %stdout.trim(),
            "Command finished"
        );

        if output.status.success() {
            Ok(())
        } else {
            Err(TaskError::CommandFailed { code, stderr })
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Builder for creating `CommandTask` instances.
#[derive(Debug, Clone)]
pub struct CommandTaskBuilder {
    name: Option<String>,
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandTaskBuilder {
    /// Create a new builder with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            name: None,
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            timeout: None,
        }
    }

    /// Set the task name. Defaults to the program.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a single environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables.
    pub fn envs(mut self, vars: HashMap<String, String>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Build the `CommandTask`.
    pub fn build(self) -> CommandTask {
        let name = self.name.unwrap_or_else(|| self.program.clone());
        CommandTask {
            name,
            program: self.program,
            args: self.args,
            env: self.env,
            working_dir: self.working_dir,
            timeout: self.timeout,
        }
    }
}
