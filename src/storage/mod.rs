//! Task registry: durable store of periodic schedules and run history.
//!
//! This module provides a trait-based registry abstraction with
//! pluggable backends (in-memory, SQLite).

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::core::clock::{add_duration, sub_duration};
use crate::core::definition::TaskDefinition;
use crate::core::retry::{RetryState, serde_duration};
use crate::core::run::{Outcome, TaskRun};
use crate::core::types::TaskName;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Lifecycle status of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Waiting for its next fire time.
    Enqueued,
    /// An invocation is in progress.
    Running,
    /// Explicitly cancelled; never fires again unless re-registered.
    Cancelled,
}

impl EntryStatus {
    /// Stable string form used by persistent backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Enqueued => "enqueued",
            EntryStatus::Running => "running",
            EntryStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the string form, falling back to `Enqueued`.
    pub fn parse(s: &str) -> Self {
        match s {
            "running" => EntryStatus::Running,
            "cancelled" => EntryStatus::Cancelled,
            _ => EntryStatus::Enqueued,
        }
    }
}

/// Schedule and execution state of one named periodic task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Identity key.
    pub name: TaskName,
    /// Nominal period.
    #[serde(with = "serde_duration")]
    pub interval: Duration,
    /// Flex window before the nominal fire time.
    #[serde(with = "serde_duration")]
    pub flex: Duration,
    /// Lifecycle status.
    pub status: EntryStatus,
    /// Position in the current period's retry cycle.
    pub retry_state: RetryState,
    /// Failures recorded in the current period.
    pub attempt_count: u32,
    /// Next nominal (or retry) fire time.
    pub next_fire_at: DateTime<Utc>,
    /// Outcome of the most recent run.
    pub last_outcome: Option<Outcome>,
    /// When the most recent run finished.
    pub last_run_at: Option<DateTime<Utc>>,
    /// When the most recent successful run finished.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Bumped whenever the schedule is replaced or cancelled, so an in-flight
    /// run can tell its view of the entry is stale.
    pub generation: u64,
    /// When the entry was first registered.
    pub created_at: DateTime<Utc>,
    /// When the entry was last written.
    pub updated_at: DateTime<Utc>,
}

impl RegistryEntry {
    /// Create an entry for a fresh registration, first fire at `now + interval`.
    pub fn new(definition: &TaskDefinition, now: DateTime<Utc>) -> Self {
        Self {
            name: definition.name.clone(),
            interval: definition.interval,
            flex: definition.flex,
            status: EntryStatus::Enqueued,
            retry_state: RetryState::Fresh,
            attempt_count: 0,
            next_fire_at: add_duration(now, definition.interval),
            last_outcome: None,
            last_run_at: None,
            last_success_at: None,
            generation: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The definition this entry is currently scheduled with.
    pub fn definition(&self) -> TaskDefinition {
        TaskDefinition {
            name: self.name.clone(),
            interval: self.interval,
            flex: self.flex,
        }
    }

    /// Discard retry state and reschedule from `now + interval`.
    ///
    /// A running invocation keeps the `Running` status; the bumped generation
    /// tells it not to overwrite the new schedule when it completes.
    pub fn reschedule(&mut self, definition: &TaskDefinition, now: DateTime<Utc>) {
        self.interval = definition.interval;
        self.flex = definition.flex;
        if self.status != EntryStatus::Running {
            self.status = EntryStatus::Enqueued;
        }
        self.retry_state = RetryState::Fresh;
        self.attempt_count = 0;
        self.next_fire_at = add_duration(now, definition.interval);
        self.generation += 1;
        self.updated_at = now;
    }

    /// Mark the entry cancelled.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = EntryStatus::Cancelled;
        self.generation += 1;
        self.updated_at = now;
    }

    /// Earliest time an invocation may start.
    ///
    /// Period fires may start anywhere inside the flex window; retries wait
    /// for their full backoff delay.
    pub fn window_opens_at(&self) -> DateTime<Utc> {
        match self.retry_state {
            RetryState::Retrying => self.next_fire_at,
            RetryState::Fresh | RetryState::Exhausted => sub_duration(self.next_fire_at, self.flex),
        }
    }

    /// Whether the scheduler should start an invocation at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == EntryStatus::Enqueued && now >= self.window_opens_at()
    }
}

/// Registry trait for persisting schedules and runs.
///
/// Implementations only need per-call atomicity; callers serialize
/// read-modify-write cycles per task name.
#[async_trait]
pub trait Registry: Send + Sync {
    // Entry operations

    /// Insert a new entry. Fails with `DuplicateKey` if the name exists.
    async fn insert_entry(&self, entry: RegistryEntry) -> Result<(), StorageError>;

    /// Get an entry by name.
    async fn get_entry(&self, name: &TaskName) -> Result<Option<RegistryEntry>, StorageError>;

    /// Overwrite an existing entry. Fails with `NotFound` if absent.
    async fn update_entry(&self, entry: RegistryEntry) -> Result<(), StorageError>;

    /// List all entries ordered by name.
    async fn list_entries(&self) -> Result<Vec<RegistryEntry>, StorageError>;

    // Run operations

    /// Record a completed run.
    async fn save_run(&self, run: TaskRun) -> Result<(), StorageError>;

    /// List runs for a task, most recent first, at most `limit`.
    async fn list_runs(&self, name: &TaskName, limit: usize) -> Result<Vec<TaskRun>, StorageError>;
}
