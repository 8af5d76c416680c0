//! Scheduler engine implementation.
//!
//! The scheduler is responsible for:
//! - Starting due periodic tasks (inside their flex window, or after a retry delay)
//! - Manual triggers
//! - Pause and resume functionality
//! - Recovery from interrupted invocations
//! - Graceful shutdown

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::core::clock::Clock;
use crate::core::definition::{ExistingPolicy, TaskDefinition};
use crate::core::retry::RetryPolicy;
use crate::core::task::Task;
use crate::core::types::TaskName;
use crate::events::EventBus;
use crate::execution::{Executor, ExecutorError};
use crate::storage::{EntryStatus, Registry};

use super::handle::{COMMAND_CHANNEL_BUFFER, SchedulerHandle};
use super::registrar::Registrar;
use super::types::{EnqueueOutcome, SchedulerCommand, SchedulerError, SchedulerState};

/// Default interval between due-entry checks.
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Default time to wait for running invocations on shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Main scheduler for periodic tasks.
pub struct Scheduler<S: Registry> {
    /// Registry access shared with the executor.
    registrar: Registrar<S>,
    /// Bound task bodies.
    tasks: Vec<Arc<dyn Task>>,
    /// Retry policy applied to every task.
    retry_policy: RetryPolicy,
    /// Tick interval for checking due entries.
    tick_interval: Duration,
    /// Graceful shutdown timeout (default: 30 seconds).
    shutdown_timeout: Duration,
}

impl<S: Registry + 'static> Scheduler<S> {
    /// Create a new scheduler with the given storage.
    pub fn new(storage: S) -> Self {
        Self::with_storage(Arc::new(storage))
    }

    /// Create a new scheduler with shared storage.
    pub fn with_storage(storage: Arc<S>) -> Self {
        Self {
            registrar: Registrar::new(storage),
            tasks: Vec::new(),
            retry_policy: RetryPolicy::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.registrar = self.registrar.with_clock(clock);
        self
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.registrar = self.registrar.with_event_bus(event_bus);
        self
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Bind a task body. It runs whenever the entry of the same name is due.
    pub fn register(&mut self, task: Arc<dyn Task>) {
        self.tasks.push(task);
    }

    /// Get the registrar.
    pub fn registrar(&self) -> &Registrar<S> {
        &self.registrar
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &EventBus {
        self.registrar.event_bus()
    }

    /// Register a periodic task before the scheduler starts.
    pub async fn enqueue_periodic(
        &self,
        definition: &TaskDefinition,
        policy: ExistingPolicy,
    ) -> Result<EnqueueOutcome, SchedulerError> {
        self.registrar.enqueue_periodic(definition, policy).await
    }

    /// Recover invocations interrupted by a previous process.
    pub async fn recover(&self) -> Result<Vec<TaskName>, SchedulerError> {
        self.registrar.recover().await
    }

    /// Start the scheduler and return a handle for controlling it.
    pub async fn start(self) -> (SchedulerHandle, JoinHandle<()>) {
        let mut executor =
            Executor::new(self.registrar.clone()).with_retry_policy(self.retry_policy.clone());
        for task in &self.tasks {
            executor.register(Arc::clone(task));
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));

        let handle = SchedulerHandle {
            command_tx,
            state: Arc::clone(&state),
        };

        tracing::info!(
            tasks = self.tasks.len(),
            tick_interval = ?self.tick_interval,
            "Scheduler started"
        );

        let runtime = Runtime {
            registrar: self.registrar,
            executor: Arc::new(executor),
            tick_interval: self.tick_interval,
            shutdown_timeout: self.shutdown_timeout,
            running: Vec::new(),
        };

        let scheduler_task = tokio::spawn(async move {
            runtime.run(command_rx, state).await;
        });

        (handle, scheduler_task)
    }
}

/// State owned by the scheduler loop once started.
struct Runtime<S: Registry> {
    registrar: Registrar<S>,
    executor: Arc<Executor<S>>,
    tick_interval: Duration,
    shutdown_timeout: Duration,
    /// Spawned invocations, tracked for shutdown.
    running: Vec<(TaskName, JoinHandle<()>)>,
}

impl<S: Registry + 'static> Runtime<S> {
    /// Main scheduler loop.
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
    ) {
        let mut interval = tokio::time::interval(self.tick_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Clean up finished invocation handles
                    self.running.retain(|(_, handle)| !handle.is_finished());

                    let current_state = *state.read().await;
                    if current_state == SchedulerState::Running {
                        self.dispatch_due().await;
                    }
                }

                Some(command) = command_rx.recv() => {
                    match command {
                        SchedulerCommand::EnqueuePeriodic { definition, policy, response } => {
                            let result = self.registrar.enqueue_periodic(&definition, policy).await;
                            let _ = response.send(result);
                        }
                        SchedulerCommand::Trigger { name, response } => {
                            let executor = Arc::clone(&self.executor);
                            let task_name = name.clone();
                            let handle = tokio::spawn(async move {
                                let result = executor.run(&task_name).await.map_err(SchedulerError::from);
                                let _ = response.send(result);
                            });
                            self.running.push((name, handle));
                        }
                        SchedulerCommand::Cancel { name, response } => {
                            let result = self.registrar.cancel(&name).await;
                            let _ = response.send(result);
                        }
                        SchedulerCommand::Pause { response } => {
                            let mut s = state.write().await;
                            *s = SchedulerState::Paused;
                            let _ = response.send(());
                        }
                        SchedulerCommand::Resume { response } => {
                            let mut s = state.write().await;
                            *s = SchedulerState::Running;
                            // Entries that came due while paused fire once on the next tick.
                            tracing::info!("Scheduler resumed");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Shutdown { response } => {
                            let mut s = state.write().await;
                            *s = SchedulerState::Stopped;
                            drop(s); // Release the lock before waiting

                            self.await_running().await;

                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Start every due entry that has a bound body and is not already running.
    ///
    /// A task whose period elapsed several times while the process was down
    /// is started once, not once per missed period.
    async fn dispatch_due(&mut self) {
        let now = self.registrar.clock().now();
        let entries = match self.registrar.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list registry entries");
                return;
            }
        };

        for entry in entries.iter().filter(|e| e.status == EntryStatus::Running) {
            self.settle_if_stale(&entry.name).await;
        }

        for entry in entries.into_iter().filter(|e| e.is_due(now)) {
            let name = entry.name;
            if !self.executor.has_task(&name) {
                tracing::debug!(task = %name, "Due task has no bound body, skipping");
                continue;
            }
            if self.executor.is_running(&name) || self.is_dispatched(&name) {
                continue;
            }

            tracing::debug!(
                task = %name,
                next_fire_at = %entry.next_fire_at,
                retry_state = entry.retry_state.as_str(),
                "Dispatching due task"
            );

            let executor = Arc::clone(&self.executor);
            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                match executor.run(&task_name).await {
                    Ok(_) => {}
                    Err(ExecutorError::AlreadyRunning(_)) => {
                        tracing::debug!(task = %task_name, "Task already running, skipping");
                    }
                    Err(e) => {
                        tracing::warn!(task = %task_name, error = %e, "Failed to run scheduled task");
                    }
                }
            });
            self.running.push((name, handle));
        }
    }

    /// Release an entry whose last invocation finished without recording
    /// its outcome, so later periods still fire.
    async fn settle_if_stale(&self, name: &TaskName) {
        if !self.executor.has_task(name) || self.is_dispatched(name) {
            return;
        }
        match self.executor.settle_stale(name).await {
            Ok(Some(run)) => {
                tracing::info!(task = %name, outcome = run.outcome.as_str(), "Released stale entry");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(task = %name, error = %e, "Failed to release stale entry");
            }
        }
    }

    fn is_dispatched(&self, name: &TaskName) -> bool {
        self.running
            .iter()
            .any(|(n, handle)| n == name && !handle.is_finished())
    }

    /// Wait for all running invocations to complete with a timeout.
    async fn await_running(&mut self) {
        self.running.retain(|(_, handle)| !handle.is_finished());
        let running_count = self.running.len();

        if running_count == 0 {
            tracing::info!("No running tasks to wait for during shutdown");
            return;
        }

        tracing::info!(
            "Graceful shutdown: waiting for {} running task(s) to complete (timeout: {:?})",
            running_count,
            self.shutdown_timeout
        );

        let start = tokio::time::Instant::now();
        let deadline = start + self.shutdown_timeout;

        loop {
            self.running.retain(|(_, handle)| !handle.is_finished());
            let remaining = self.running.len();

            if remaining == 0 {
                let elapsed = start.elapsed();
                tracing::info!("All running tasks completed gracefully in {:?}", elapsed);
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    "Graceful shutdown timeout ({:?}) exceeded with {} task(s) still running",
                    self.shutdown_timeout,
                    remaining
                );
                break;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
