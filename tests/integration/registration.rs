//! Registration integration tests.
//!
//! Tests idempotent registration, replace semantics, cancellation and the
//! behaviour when the registry is unavailable.

use crate::common::{HOUR, MINUTE, data_collection, manual_clock, t0};
use std::sync::Arc;
use tend::testing::{FailingTask, UnavailableRegistry};
use tend::{
    Clock, DefinitionError, EnqueueOutcome, EntryStatus, Executor, ExistingPolicy, InMemoryStorage,
    Registrar, RetryState, SchedulerError, TaskDefinition, TaskName,
};

/// Test: First registration creates an entry firing one interval from now.
#[tokio::test]
async fn test_first_registration_creates_entry() {
    let clock = manual_clock();
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(clock.clone());

    let outcome = registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();
    assert_eq!(outcome, EnqueueOutcome::Created);

    let entry = registrar
        .entry(&TaskName::new("data_collection"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, EntryStatus::Enqueued);
    assert_eq!(entry.retry_state, RetryState::Fresh);
    assert_eq!(entry.attempt_count, 0);
    assert_eq!(entry.next_fire_at, t0() + chrono::Duration::hours(6));
    assert!(entry.last_outcome.is_none());
}

/// Test: KeepExisting leaves retry progress and next fire time alone.
#[tokio::test]
async fn test_keep_existing_preserves_retry_progress() {
    let clock = manual_clock();
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(clock.clone());
    let executor = Executor::new(registrar.clone())
        .with_task(Arc::new(FailingTask::always_failing("data_collection")));

    registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();
    clock.advance(6 * HOUR);
    executor.run(&TaskName::new("data_collection")).await.unwrap();

    let name = TaskName::new("data_collection");
    let before = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(before.attempt_count, 1);

    // Re-registering repeatedly (app restarts) must not reset the cycle.
    clock.advance(10 * MINUTE);
    for _ in 0..3 {
        let outcome = registrar
            .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
            .await
            .unwrap();
        assert_eq!(outcome, EnqueueOutcome::Kept);
    }

    let after = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(after, before);
}

/// Test: KeepExisting does not apply a changed interval.
#[tokio::test]
async fn test_keep_existing_ignores_new_interval() {
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(manual_clock());

    registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();
    let faster = TaskDefinition::new("data_collection", HOUR);
    registrar
        .enqueue_periodic(&faster, ExistingPolicy::KeepExisting)
        .await
        .unwrap();

    let entry = registrar
        .entry(&TaskName::new("data_collection"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.interval, 6 * HOUR);
}

/// Test: Replace discards retry state and reschedules from now.
#[tokio::test]
async fn test_replace_resets_schedule() {
    let clock = manual_clock();
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(clock.clone());
    let executor = Executor::new(registrar.clone())
        .with_task(Arc::new(FailingTask::always_failing("data_collection")));
    let name = TaskName::new("data_collection");

    registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();
    clock.advance(6 * HOUR);
    executor.run(&name).await.unwrap();
    executor.run(&name).await.unwrap();

    clock.advance(HOUR);
    let replacement = TaskDefinition::new("data_collection", 2 * HOUR);
    let outcome = registrar
        .enqueue_periodic(&replacement, ExistingPolicy::Replace)
        .await
        .unwrap();
    assert_eq!(outcome, EnqueueOutcome::Replaced);

    let entry = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(entry.retry_state, RetryState::Fresh);
    assert_eq!(entry.attempt_count, 0);
    assert_eq!(entry.interval, 2 * HOUR);
    assert_eq!(entry.flex, std::time::Duration::ZERO);
    assert_eq!(entry.next_fire_at, t0() + chrono::Duration::hours(9));
}

/// Test: Intervals below the platform minimum are rejected without mutation.
#[tokio::test]
async fn test_interval_below_minimum_is_rejected() {
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(manual_clock());

    registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();
    let before = registrar.entries().await.unwrap();

    let too_fast = TaskDefinition::new("data_collection", 5 * MINUTE);
    let err = registrar
        .enqueue_periodic(&too_fast, ExistingPolicy::Replace)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidSchedule(DefinitionError::IntervalTooShort { .. })
    ));

    let new_name = TaskDefinition::new("heartbeat", MINUTE);
    assert!(
        registrar
            .enqueue_periodic(&new_name, ExistingPolicy::KeepExisting)
            .await
            .is_err()
    );

    assert_eq!(registrar.entries().await.unwrap(), before);
}

/// Test: A cancelled schedule never fires and can be re-registered.
#[tokio::test]
async fn test_cancel_and_reregister() {
    let clock = manual_clock();
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(clock.clone());
    let name = TaskName::new("data_collection");

    registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();
    assert!(registrar.cancel(&name).await.unwrap());
    assert!(!registrar.cancel(&name).await.unwrap());

    clock.advance(24 * HOUR);
    let entry = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Cancelled);
    assert!(!entry.is_due(clock.now()));

    let outcome = registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();
    assert_eq!(outcome, EnqueueOutcome::Created);
    let entry = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Enqueued);
    assert_eq!(entry.next_fire_at, t0() + chrono::Duration::hours(30));
}

/// Test: Cancelling an unknown task reports it.
#[tokio::test]
async fn test_cancel_unknown_task() {
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new()));

    let err = registrar.cancel(&TaskName::new("ghost")).await.unwrap_err();
    assert!(matches!(err, SchedulerError::TaskNotFound(ref name) if name == "ghost"));
}

/// Test: An unreachable registry surfaces an error and mutates nothing.
#[tokio::test]
async fn test_registry_unavailable() {
    let storage = Arc::new(UnavailableRegistry::new(InMemoryStorage::new()));
    let registrar = Registrar::new(Arc::clone(&storage)).with_clock(manual_clock());

    storage.set_available(false);
    let err = registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::RegistryUnavailable(_)));

    // Caller retries once the registry is back.
    storage.set_available(true);
    assert!(registrar.entries().await.unwrap().is_empty());
    let outcome = registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();
    assert_eq!(outcome, EnqueueOutcome::Created);
}
