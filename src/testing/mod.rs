//! Testing utilities for users of the tend library.
//!
//! This module provides helpers for testing periodic task behaviour:
//!
//! - [`ManualClock`]: A clock that only moves when told to
//! - [`FailingTask`]: A task helper that fails N times then succeeds
//! - [`PanickingTask`]: A task whose body panics
//! - [`SlowTask`]: A task that sleeps and records how many copies overlapped
//! - [`UnavailableRegistry`]: A registry wrapper that can be taken offline
//! - [`RecordingHandler`]: An event handler that keeps every event

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::clock::{Clock, add_duration};
use crate::core::context::TaskContext;
use crate::core::run::TaskRun;
use crate::core::task::{Task, TaskError};
use crate::core::types::TaskName;
use crate::events::{Event, EventHandler};
use crate::storage::{Registry, RegistryEntry, StorageError};

/// A clock that stays put until moved.
///
/// # Example
///
/// ```
/// use tend::testing::ManualClock;
/// use tend::Clock;
/// use chrono::{TimeZone, Utc};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
/// clock.advance(Duration::from_secs(6 * 3600));
/// assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap());
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock fixed at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to `time`.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = time;
    }

    /// Move forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = add_duration(*now, duration);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A task that fails a configurable number of times before succeeding.
///
/// Useful for testing retry logic and error handling.
///
/// # Example
///
/// ```
/// use tend::testing::FailingTask;
///
/// // Fails 2 times, then succeeds on the 3rd attempt
/// let task = FailingTask::new("data_collection", 2);
/// ```
pub struct FailingTask {
    name: String,
    failures_remaining: AtomicU32,
    call_count: AtomicU32,
    total_failures: u32,
    error_message: String,
}

impl FailingTask {
    /// Create a task that fails `fail_count` times then succeeds.
    pub fn new(name: impl Into<String>, fail_count: u32) -> Self {
        Self::with_error(name, fail_count, "intentional test failure")
    }

    /// Create a task that never succeeds.
    pub fn always_failing(name: impl Into<String>) -> Self {
        Self::new(name, u32::MAX)
    }

    /// Create a task that fails with a custom error message.
    pub fn with_error(
        name: impl Into<String>,
        fail_count: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            failures_remaining: AtomicU32::new(fail_count),
            call_count: AtomicU32::new(0),
            total_failures: fail_count,
            error_message: message.into(),
        }
    }

    /// Get the number of failures remaining before success.
    pub fn failures_remaining(&self) -> u32 {
        self.failures_remaining.load(Ordering::SeqCst)
    }

    /// Get the number of times this task has been called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Reset the failure counter for reuse.
    pub fn reset(&self) {
        self.failures_remaining
            .store(self.total_failures, Ordering::SeqCst);
        self.call_count.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Task for FailingTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        // Atomic check-and-decrement so concurrent calls agree on the count.
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if failed {
            Err(TaskError::ExecutionFailed(self.error_message.clone()))
        } else {
            Ok(())
        }
    }
}

/// A task whose body always panics.
pub struct PanickingTask {
    name: String,
}

impl PanickingTask {
    /// Create a panicking task.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Task for PanickingTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        panic!("boom")
    }
}

/// A task that sleeps, tracking how many of its invocations overlap.
pub struct SlowTask {
    name: String,
    delay: Duration,
    timeout: Option<Duration>,
    started: AtomicU32,
    active: AtomicU32,
    max_active: AtomicU32,
}

impl SlowTask {
    /// Create a task that sleeps for `delay` then succeeds.
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            timeout: None,
            started: AtomicU32::new(0),
            active: AtomicU32::new(0),
            max_active: AtomicU32::new(0),
        }
    }

    /// Builder: set the task's time limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of invocations that have started.
    pub fn started(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }

    /// Highest number of invocations observed executing at once.
    pub fn max_concurrent(&self) -> u32 {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Task for SlowTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Registry wrapper that fails every call while switched off.
///
/// Simulates a durable store that is inaccessible (locked, corrupt, or on
/// unmounted storage).
pub struct UnavailableRegistry<S: Registry> {
    inner: S,
    available: AtomicBool,
}

impl<S: Registry> UnavailableRegistry<S> {
    /// Wrap `inner`, initially available.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            available: AtomicBool::new(true),
        }
    }

    /// Switch the registry on or off.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// The wrapped registry.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Other("registry unavailable".into()))
        }
    }
}

#[async_trait]
impl<S: Registry> Registry for UnavailableRegistry<S> {
    async fn insert_entry(&self, entry: RegistryEntry) -> Result<(), StorageError> {
        self.check()?;
        self.inner.insert_entry(entry).await
    }

    async fn get_entry(&self, name: &TaskName) -> Result<Option<RegistryEntry>, StorageError> {
        self.check()?;
        self.inner.get_entry(name).await
    }

    async fn update_entry(&self, entry: RegistryEntry) -> Result<(), StorageError> {
        self.check()?;
        self.inner.update_entry(entry).await
    }

    async fn list_entries(&self) -> Result<Vec<RegistryEntry>, StorageError> {
        self.check()?;
        self.inner.list_entries().await
    }

    async fn save_run(&self, run: TaskRun) -> Result<(), StorageError> {
        self.check()?;
        self.inner.save_run(run).await
    }

    async fn list_runs(&self, name: &TaskName, limit: usize) -> Result<Vec<TaskRun>, StorageError> {
        self.check()?;
        self.inner.list_runs(name, limit).await
    }
}

/// Event handler that records every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: tokio::sync::Mutex<Vec<Event>>,
}

impl RecordingHandler {
    /// Create an empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All events received so far.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}
