//! Boot listener: re-asserts desired schedules after a restart.
//!
//! Some restart paths wipe the durable registry. On every restart signal the
//! listener reconciles the desired definitions with `KeepExisting`, which is a
//! no-op for surviving entries and recreates lost ones. It never runs a task
//! body.

use std::fmt;

use crate::core::definition::TaskDefinition;
use crate::core::types::TaskName;
use crate::scheduler::{EnqueueOutcome, Registrar, SchedulerError};
use crate::storage::Registry;

/// Signals delivered by whatever observes system or process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartSignal {
    /// The device or host finished booting.
    BootCompleted,
    /// This process started (possibly after a crash).
    ProcessStarted,
    /// Any other broadcast; ignored.
    Other(String),
}

impl RestartSignal {
    /// Parse a signal name as used on the command line.
    pub fn parse(s: &str) -> Self {
        match s {
            "boot_completed" | "boot-completed" | "boot" => RestartSignal::BootCompleted,
            "process_started" | "process-started" | "start" => RestartSignal::ProcessStarted,
            other => RestartSignal::Other(other.to_string()),
        }
    }

    /// Whether the signal means durable scheduling state may have been reset.
    pub fn is_restart(&self) -> bool {
        matches!(
            self,
            RestartSignal::BootCompleted | RestartSignal::ProcessStarted
        )
    }
}

impl fmt::Display for RestartSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartSignal::BootCompleted => write!(f, "boot_completed"),
            RestartSignal::ProcessStarted => write!(f, "process_started"),
            RestartSignal::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Re-registers the desired periodic tasks on restart.
pub struct BootListener<S: Registry> {
    registrar: Registrar<S>,
    definitions: Vec<TaskDefinition>,
}

impl<S: Registry> BootListener<S> {
    /// Create a listener for the given desired definitions.
    pub fn new(registrar: Registrar<S>, definitions: Vec<TaskDefinition>) -> Self {
        Self {
            registrar,
            definitions,
        }
    }

    /// Desired definitions.
    pub fn definitions(&self) -> &[TaskDefinition] {
        &self.definitions
    }

    /// Handle a signal. Returns what was done per task, or an empty list if
    /// the signal is not a restart.
    pub async fn handle(
        &self,
        signal: &RestartSignal,
    ) -> Result<Vec<(TaskName, EnqueueOutcome)>, SchedulerError> {
        if !signal.is_restart() {
            tracing::debug!(signal = %signal, "Ignoring non-restart signal");
            return Ok(Vec::new());
        }

        tracing::info!(
            signal = %signal,
            tasks = self.definitions.len(),
            "Restart signal received, re-registering periodic tasks"
        );
        self.registrar.reconcile(&self.definitions).await
    }
}
