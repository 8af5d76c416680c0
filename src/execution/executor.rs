//! Periodic task executor.
//!
//! The `Executor` runs one invocation of a named task to completion:
//! - Single-flight per task name
//! - Retry controller applied to failures, panics and timeouts
//! - Atomic begin/complete updates of the registry entry
//! - Run history and lifecycle events

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::core::clock::add_duration;
use crate::core::context::TaskContext;
use crate::core::retry::{RetryController, RetryDecision, RetryPolicy, RetryState};
use crate::core::run::{Outcome, TaskRun};
use crate::core::task::{Task, TaskError};
use crate::core::types::{RunId, TaskName};
use crate::events::Event;
use crate::scheduler::Registrar;
use crate::scheduler::locks::InFlight;
use crate::storage::{EntryStatus, Registry, RegistryEntry, StorageError};

/// Reasons an invocation could not be started or recorded.
///
/// A failing task body is not an error here; it is reported through the
/// run's [`Outcome`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// No task body is bound to the name.
    #[error("no task body bound for: {0}")]
    NotBound(String),

    /// No registry entry exists for the name.
    #[error("task not registered: {0}")]
    NotRegistered(String),

    /// The task's schedule has been cancelled.
    #[error("task cancelled: {0}")]
    Cancelled(String),

    /// Another invocation of the task is executing.
    #[error("task already running: {0}")]
    AlreadyRunning(String),

    /// The retry budget for the current period is spent.
    #[error("retries exhausted for {name} until {next_window}")]
    Exhausted {
        name: String,
        next_window: chrono::DateTime<chrono::Utc>,
    },

    /// The registry failed while starting or recording the invocation.
    #[error("registry error: {0}")]
    Registry(#[from] StorageError),
}

/// Runs task bodies against registry entries.
pub struct Executor<S: Registry> {
    registrar: Registrar<S>,
    controller: RetryController,
    tasks: HashMap<TaskName, Arc<dyn Task>>,
    in_flight: InFlight,
}

/// Snapshot taken when an invocation begins.
struct Invocation {
    run_id: RunId,
    attempt: u32,
    generation: u64,
    scheduled_at: chrono::DateTime<chrono::Utc>,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl<S: Registry + 'static> Executor<S> {
    /// Create an executor with the default retry policy.
    pub fn new(registrar: Registrar<S>) -> Self {
        Self {
            registrar,
            controller: RetryController::default(),
            tasks: HashMap::new(),
            in_flight: InFlight::new(),
        }
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.controller = RetryController::new(policy);
        self
    }

    /// Builder: bind a task body.
    pub fn with_task(mut self, task: Arc<dyn Task>) -> Self {
        self.register(task);
        self
    }

    /// Bind a task body to the periodic task of the same name.
    pub fn register(&mut self, task: Arc<dyn Task>) {
        self.tasks.insert(TaskName::new(task.name()), task);
    }

    /// Whether a body is bound for `name`.
    pub fn has_task(&self, name: &TaskName) -> bool {
        self.tasks.contains_key(name)
    }

    /// Names with a bound body.
    pub fn task_names(&self) -> impl Iterator<Item = &TaskName> {
        self.tasks.keys()
    }

    /// Whether an invocation of `name` is executing.
    pub fn is_running(&self, name: &TaskName) -> bool {
        self.in_flight.contains(name)
    }

    /// The retry policy in effect.
    pub fn retry_policy(&self) -> &RetryPolicy {
        self.controller.policy()
    }

    /// The registrar this executor records into.
    pub fn registrar(&self) -> &Registrar<S> {
        &self.registrar
    }

    /// Run one invocation of `name` to completion.
    ///
    /// Returns the recorded run. A concurrent call for the same name fails
    /// with [`ExecutorError::AlreadyRunning`] without touching the registry.
    pub async fn run(&self, name: &TaskName) -> Result<TaskRun, ExecutorError> {
        let task = self
            .tasks
            .get(name)
            .cloned()
            .ok_or_else(|| ExecutorError::NotBound(name.to_string()))?;

        let _flight = self
            .in_flight
            .try_acquire(name)
            .ok_or_else(|| ExecutorError::AlreadyRunning(name.to_string()))?;

        let invocation = self.begin(name).await?;

        tracing::info!(
            task = %name,
            run_id = %invocation.run_id,
            attempt = invocation.attempt,
            "Starting task"
        );
        self.registrar
            .event_bus()
            .emit(Event::task_started(
                name.clone(),
                invocation.run_id.clone(),
                invocation.attempt,
            ))
            .await;

        let ctx = TaskContext::new(
            invocation.run_id.clone(),
            name.clone(),
            invocation.attempt,
            invocation.scheduled_at,
        );
        let timer = Instant::now();
        let result = invoke(task, ctx).await;
        let duration = timer.elapsed();

        self.complete(name, invocation, result, duration).await
    }

    /// Mark the entry running, starting a fresh cycle if a new period begins.
    async fn begin(&self, name: &TaskName) -> Result<Invocation, ExecutorError> {
        let storage = self.registrar.storage();
        let _guard = self.registrar.locks().lock(name).await;

        let mut entry = storage
            .get_entry(name)
            .await?
            .ok_or_else(|| ExecutorError::NotRegistered(name.to_string()))?;

        if entry.status == EntryStatus::Cancelled {
            return Err(ExecutorError::Cancelled(name.to_string()));
        }

        let now = self.registrar.clock().now();
        if entry.retry_state == RetryState::Exhausted && now < entry.window_opens_at() {
            return Err(ExecutorError::Exhausted {
                name: name.to_string(),
                next_window: entry.window_opens_at(),
            });
        }

        let (retry_state, attempt) = self
            .controller
            .begin_invocation(entry.retry_state, entry.attempt_count);

        let scheduled_at = entry.next_fire_at;
        entry.retry_state = retry_state;
        entry.attempt_count = attempt;
        entry.status = EntryStatus::Running;
        entry.updated_at = now;
        let generation = entry.generation;
        storage.update_entry(entry).await?;

        Ok(Invocation {
            run_id: RunId::new(),
            attempt,
            generation,
            scheduled_at,
            started_at: now,
        })
    }

    /// Apply the outcome to the entry and record the run.
    async fn complete(
        &self,
        name: &TaskName,
        invocation: Invocation,
        result: Result<(), TaskError>,
        duration: std::time::Duration,
    ) -> Result<TaskRun, ExecutorError> {
        let storage = self.registrar.storage();
        let _guard = self.registrar.locks().lock(name).await;
        let now = self.registrar.clock().now();

        let (outcome, decision, error) = match &result {
            Ok(()) => (Outcome::Success, None, None),
            Err(e) => {
                let decision = self.controller.on_failure(invocation.attempt);
                let outcome = match decision {
                    RetryDecision::Retry { .. } => Outcome::Retry,
                    RetryDecision::GiveUp { .. } => Outcome::Failure,
                };
                (outcome, Some(decision), Some(e.to_string()))
            }
        };

        if let Some(mut entry) = storage.get_entry(name).await? {
            entry.last_outcome = Some(outcome);
            entry.last_run_at = Some(now);
            if outcome == Outcome::Success {
                entry.last_success_at = Some(now);
            }

            if entry.generation == invocation.generation {
                apply_decision(&mut entry, decision, now);
            } else {
                tracing::debug!(
                    task = %name,
                    run_id = %invocation.run_id,
                    "Schedule changed during run, keeping new schedule"
                );
            }

            if entry.status == EntryStatus::Running {
                entry.status = EntryStatus::Enqueued;
            }
            entry.updated_at = now;
            storage.update_entry(entry).await?;
        }

        let run = TaskRun {
            id: invocation.run_id.clone(),
            name: name.clone(),
            attempt: invocation.attempt,
            outcome,
            started_at: invocation.started_at,
            finished_at: now,
            error: error.clone(),
        };
        storage.save_run(run.clone()).await?;

        self.report(name, invocation.run_id, decision, error, duration)
            .await;
        Ok(run)
    }

    /// Settle an entry left `Running` by an invocation whose completion
    /// could not be recorded.
    ///
    /// The lost invocation counts as a failed attempt. Returns `None` when
    /// the entry is not stale: it is not `Running`, or an invocation of the
    /// task is still executing in this process.
    pub async fn settle_stale(&self, name: &TaskName) -> Result<Option<TaskRun>, ExecutorError> {
        let Some(_flight) = self.in_flight.try_acquire(name) else {
            return Ok(None);
        };

        let storage = self.registrar.storage();
        let _guard = self.registrar.locks().lock(name).await;

        let Some(mut entry) = storage.get_entry(name).await? else {
            return Ok(None);
        };
        if entry.status != EntryStatus::Running {
            return Ok(None);
        }

        let now = self.registrar.clock().now();
        let decision = self.controller.on_failure(entry.attempt_count);
        let outcome = match decision {
            RetryDecision::Retry { .. } => Outcome::Retry,
            RetryDecision::GiveUp { .. } => Outcome::Failure,
        };
        let error = "invocation ended without being recorded".to_string();

        let run = TaskRun {
            id: RunId::new(),
            name: name.clone(),
            attempt: entry.attempt_count,
            outcome,
            started_at: entry.updated_at,
            finished_at: now,
            error: Some(error.clone()),
        };

        apply_decision(&mut entry, Some(decision), now);
        entry.status = EntryStatus::Enqueued;
        entry.last_outcome = Some(outcome);
        entry.last_run_at = Some(now);
        entry.updated_at = now;
        storage.update_entry(entry).await?;
        storage.save_run(run.clone()).await?;

        tracing::warn!(
            task = %name,
            attempt = run.attempt,
            "Settled invocation left running"
        );
        self.report(
            name,
            run.id.clone(),
            Some(decision),
            Some(error),
            std::time::Duration::ZERO,
        )
        .await;

        Ok(Some(run))
    }

    /// Log the outcome and emit the matching lifecycle event.
    async fn report(
        &self,
        name: &TaskName,
        run_id: RunId,
        decision: Option<RetryDecision>,
        error: Option<String>,
        duration: std::time::Duration,
    ) {
        let event_bus = self.registrar.event_bus();
        match decision {
            None => {
                tracing::info!(task = %name, run_id = %run_id, duration = ?duration, "Task succeeded");
                event_bus
                    .emit(Event::task_succeeded(name.clone(), run_id, duration))
                    .await;
            }
            Some(RetryDecision::Retry { attempt, delay }) => {
                let error = error.unwrap_or_default();
                tracing::warn!(
                    task = %name,
                    run_id = %run_id,
                    attempt,
                    max_attempts = self.controller.policy().max_attempts,
                    delay = ?delay,
                    error = %error,
                    "Task failed, will retry"
                );
                event_bus
                    .emit(Event::task_retrying(
                        name.clone(),
                        run_id,
                        attempt,
                        self.controller.policy().max_attempts,
                        delay,
                        error,
                    ))
                    .await;
            }
            Some(RetryDecision::GiveUp { attempt }) => {
                let error = error.unwrap_or_default();
                tracing::error!(
                    task = %name,
                    run_id = %run_id,
                    attempts = attempt,
                    error = %error,
                    "Task failed, retries exhausted for this period"
                );
                event_bus
                    .emit(Event::task_failed(name.clone(), run_id, attempt, error))
                    .await;
            }
        }
    }
}

/// Move the entry's schedule on according to the retry decision.
///
/// `None` is a success.
fn apply_decision(
    entry: &mut RegistryEntry,
    decision: Option<RetryDecision>,
    now: chrono::DateTime<chrono::Utc>,
) {
    match decision {
        None => {
            entry.retry_state = RetryState::Fresh;
            entry.attempt_count = 0;
            entry.next_fire_at = add_duration(now, entry.interval);
        }
        Some(RetryDecision::Retry { attempt, delay }) => {
            entry.retry_state = RetryState::Retrying;
            entry.attempt_count = attempt;
            entry.next_fire_at = add_duration(now, delay);
        }
        Some(RetryDecision::GiveUp { attempt }) => {
            entry.retry_state = RetryState::Exhausted;
            entry.attempt_count = attempt;
            entry.next_fire_at = add_duration(now, entry.interval);
        }
    }
}

/// Run the body on its own task so a panic or timeout cannot escape.
async fn invoke(task: Arc<dyn Task>, ctx: TaskContext) -> Result<(), TaskError> {
    let handle = tokio::spawn(async move {
        match task.timeout() {
            Some(limit) => tokio::time::timeout(limit, task.execute(&ctx))
                .await
                .unwrap_or(Err(TaskError::Timeout(limit))),
            None => task.execute(&ctx).await,
        }
    });

    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(TaskError::Panicked(message))
        }
        Err(e) => Err(TaskError::ExecutionFailed(e.to_string())),
    }
}
