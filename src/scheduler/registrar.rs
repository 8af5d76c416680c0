//! Registry mutations: registration, cancellation and reconciliation.
//!
//! Every read-modify-write of an entry happens under the per-name lock, so a
//! registration racing a completing invocation cannot lose either update.

use std::sync::Arc;

use crate::core::clock::{Clock, SystemClock, add_duration};
use crate::core::definition::{ExistingPolicy, TaskDefinition};
use crate::core::run::TaskRun;
use crate::core::types::TaskName;
use crate::events::{Event, EventBus};
use crate::storage::{EntryStatus, Registry, RegistryEntry};

use super::locks::KeyedLocks;
use super::types::{EnqueueOutcome, SchedulerError};

/// Creates, replaces and cancels registry entries.
///
/// Cheap to clone; clones share the registry, clock, locks and event bus.
pub struct Registrar<S: Registry> {
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyedLocks>,
    event_bus: Arc<EventBus>,
}

impl<S: Registry> Clone for Registrar<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            clock: Arc::clone(&self.clock),
            locks: Arc::clone(&self.locks),
            event_bus: Arc::clone(&self.event_bus),
        }
    }
}

impl<S: Registry> Registrar<S> {
    /// Create a registrar over shared storage using the system clock.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
            locks: Arc::new(KeyedLocks::new()),
            event_bus: Arc::new(EventBus::new()),
        }
    }

    /// Set the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Arc::new(event_bus);
        self
    }

    pub(crate) fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Register a periodic task.
    ///
    /// - No entry (or a cancelled one): create it, first fire at `now + interval`.
    /// - Entry exists, `KeepExisting`: nothing is written.
    /// - Entry exists, `Replace`: discard retry state, reschedule from now.
    ///
    /// The definition is validated before the registry is touched, and each
    /// path performs at most one registry write.
    pub async fn enqueue_periodic(
        &self,
        definition: &TaskDefinition,
        policy: ExistingPolicy,
    ) -> Result<EnqueueOutcome, SchedulerError> {
        definition.validate()?;

        let _guard = self.locks.lock(&definition.name).await;
        let now = self.clock.now();

        let outcome = match self.storage.get_entry(&definition.name).await? {
            None => {
                self.storage
                    .insert_entry(RegistryEntry::new(definition, now))
                    .await?;
                EnqueueOutcome::Created
            }
            Some(mut existing) if existing.status == EntryStatus::Cancelled => {
                existing.reschedule(definition, now);
                self.storage.update_entry(existing).await?;
                EnqueueOutcome::Created
            }
            Some(_) if policy == ExistingPolicy::KeepExisting => {
                tracing::debug!(task = %definition.name, "Task already registered, keeping existing schedule");
                return Ok(EnqueueOutcome::Kept);
            }
            Some(mut existing) => {
                existing.reschedule(definition, now);
                self.storage.update_entry(existing).await?;
                EnqueueOutcome::Replaced
            }
        };

        let next_fire_at = add_duration(now, definition.interval);
        tracing::info!(
            task = %definition.name,
            interval = ?definition.interval,
            flex = ?definition.flex,
            next_fire_at = %next_fire_at,
            outcome = ?outcome,
            "Registered periodic task"
        );
        self.event_bus
            .emit(Event::task_enqueued(
                definition.name.clone(),
                next_fire_at,
                outcome == EnqueueOutcome::Replaced,
            ))
            .await;

        Ok(outcome)
    }

    /// Re-assert the desired set of schedules without disturbing existing ones.
    ///
    /// Used on boot and after a crash: every definition is registered with
    /// `KeepExisting`. All definitions are validated before any is applied.
    /// Stops at the first registry error; rerunning is always safe.
    pub async fn reconcile(
        &self,
        definitions: &[TaskDefinition],
    ) -> Result<Vec<(TaskName, EnqueueOutcome)>, SchedulerError> {
        for definition in definitions {
            definition.validate()?;
        }

        let mut applied = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let outcome = self
                .enqueue_periodic(definition, ExistingPolicy::KeepExisting)
                .await?;
            applied.push((definition.name.clone(), outcome));
        }

        let created = applied
            .iter()
            .filter(|(_, o)| *o == EnqueueOutcome::Created)
            .count();
        tracing::info!(
            definitions = definitions.len(),
            created,
            "Reconciled periodic schedules"
        );

        Ok(applied)
    }

    /// Cancel a task's schedule.
    ///
    /// Returns `false` if the entry was already cancelled. An invocation in
    /// progress finishes, but no further scheduled or retried run starts.
    pub async fn cancel(&self, name: &TaskName) -> Result<bool, SchedulerError> {
        let _guard = self.locks.lock(name).await;

        let mut entry = self
            .storage
            .get_entry(name)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound(name.to_string()))?;

        if entry.status == EntryStatus::Cancelled {
            return Ok(false);
        }

        entry.cancel(self.clock.now());
        self.storage.update_entry(entry).await?;

        tracing::info!(task = %name, "Cancelled periodic task");
        self.event_bus.emit(Event::task_cancelled(name.clone())).await;
        Ok(true)
    }

    /// Reset entries left `Running` by a process that died mid-invocation.
    ///
    /// Each is made due immediately with its attempt count preserved. Call
    /// before any invocation starts in this process.
    pub async fn recover(&self) -> Result<Vec<TaskName>, SchedulerError> {
        let mut recovered = Vec::new();

        for stale in self.storage.list_entries().await? {
            if stale.status != EntryStatus::Running {
                continue;
            }

            let _guard = self.locks.lock(&stale.name).await;
            let Some(mut entry) = self.storage.get_entry(&stale.name).await? else {
                continue;
            };
            if entry.status != EntryStatus::Running {
                continue;
            }

            let now = self.clock.now();
            entry.status = EntryStatus::Enqueued;
            entry.next_fire_at = now;
            entry.updated_at = now;
            self.storage.update_entry(entry.clone()).await?;

            tracing::warn!(
                task = %entry.name,
                attempt_count = entry.attempt_count,
                "Recovered interrupted invocation"
            );
            recovered.push(entry.name);
        }

        Ok(recovered)
    }

    /// Get the registry entry for a task.
    pub async fn entry(&self, name: &TaskName) -> Result<Option<RegistryEntry>, SchedulerError> {
        Ok(self.storage.get_entry(name).await?)
    }

    /// List all registry entries ordered by name.
    pub async fn entries(&self) -> Result<Vec<RegistryEntry>, SchedulerError> {
        Ok(self.storage.list_entries().await?)
    }

    /// Most recent runs of a task, newest first.
    pub async fn history(
        &self,
        name: &TaskName,
        limit: usize,
    ) -> Result<Vec<TaskRun>, SchedulerError> {
        Ok(self.storage.list_runs(name, limit).await?)
    }
}
