//! Restart integration tests.
//!
//! Tests that schedules survive a process restart, are re-created after a
//! registry wipe, and that interrupted invocations are recovered.

use crate::common::{HOUR, data_collection, manual_clock};
use std::sync::Arc;
use tend::testing::FailingTask;
use tend::{
    BootListener, Clock, EnqueueOutcome, EntryStatus, Executor, ExistingPolicy, InMemoryStorage,
    Registrar, Registry, RestartSignal, RetryState, TaskDefinition, TaskName, YamlLoader,
};

fn desired() -> Vec<TaskDefinition> {
    vec![
        data_collection(),
        TaskDefinition::new("cache_prune", 24 * HOUR),
    ]
}

/// Test: A boot signal recreates schedules lost with the registry.
#[tokio::test]
async fn test_boot_recreates_wiped_registry() {
    let clock = manual_clock();

    let before_reboot = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(clock.clone());
    BootListener::new(before_reboot, desired())
        .handle(&RestartSignal::ProcessStarted)
        .await
        .unwrap();

    // The reboot wiped everything.
    clock.advance(3 * HOUR);
    let after_reboot = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(clock.clone());
    let listener = BootListener::new(after_reboot.clone(), desired());

    let applied = listener.handle(&RestartSignal::BootCompleted).await.unwrap();
    assert_eq!(
        applied,
        vec![
            (TaskName::new("data_collection"), EnqueueOutcome::Created),
            (TaskName::new("cache_prune"), EnqueueOutcome::Created),
        ]
    );

    let entry = after_reboot
        .entry(&TaskName::new("data_collection"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.next_fire_at, clock.now() + chrono::Duration::hours(6));
}

/// Test: A boot signal leaves surviving schedules untouched.
#[tokio::test]
async fn test_boot_keeps_surviving_entries() {
    let clock = manual_clock();
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(clock.clone());
    let executor = Executor::new(registrar.clone())
        .with_task(Arc::new(FailingTask::always_failing("data_collection")));
    let listener = BootListener::new(registrar.clone(), desired());

    listener.handle(&RestartSignal::BootCompleted).await.unwrap();
    clock.advance(6 * HOUR);
    executor.run(&TaskName::new("data_collection")).await.unwrap();
    let before = registrar.entries().await.unwrap();

    clock.advance(HOUR);
    let applied = listener.handle(&RestartSignal::BootCompleted).await.unwrap();
    assert!(applied.iter().all(|(_, o)| *o == EnqueueOutcome::Kept));
    assert_eq!(registrar.entries().await.unwrap(), before);
}

/// Test: Non-restart broadcasts do nothing.
#[tokio::test]
async fn test_unrelated_signal_is_ignored() {
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new()));
    let listener = BootListener::new(registrar.clone(), desired());

    let applied = listener
        .handle(&RestartSignal::parse("timezone_changed"))
        .await
        .unwrap();
    assert!(applied.is_empty());
    assert!(registrar.entries().await.unwrap().is_empty());
}

/// Test: A run interrupted by a crash is recovered and due immediately.
#[tokio::test]
async fn test_recover_interrupted_run() {
    let clock = manual_clock();
    let storage = Arc::new(InMemoryStorage::new());
    let registrar = Registrar::new(Arc::clone(&storage)).with_clock(clock.clone());
    let name = TaskName::new("data_collection");

    registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();

    // Simulate a crash mid-retry: one failure recorded, then marked running.
    let mut entry = storage.get_entry(&name).await.unwrap().unwrap();
    entry.status = EntryStatus::Running;
    entry.retry_state = RetryState::Retrying;
    entry.attempt_count = 1;
    storage.update_entry(entry).await.unwrap();

    clock.advance(2 * HOUR);
    let recovered = registrar.recover().await.unwrap();
    assert_eq!(recovered, vec![name.clone()]);

    let entry = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Enqueued);
    assert_eq!(entry.attempt_count, 1);
    assert_eq!(entry.next_fire_at, clock.now());
    assert!(entry.is_due(clock.now()));

    assert!(registrar.recover().await.unwrap().is_empty());
}

/// Test: A process restart keeps a replace-configured schedule and its progress.
#[tokio::test]
async fn test_process_start_keeps_replace_configured_entry() {
    let config = YamlLoader::parse_config(
        r#"
tasks:
  - name: data_collection
    interval: 6h
    flex: 15m
    policy: replace
"#,
    )
    .unwrap();
    let clock = manual_clock();
    let storage = Arc::new(InMemoryStorage::new());
    let registrar = Registrar::new(Arc::clone(&storage)).with_clock(clock.clone());
    let executor = Executor::new(registrar.clone())
        .with_task(Arc::new(FailingTask::always_failing("data_collection")));
    let name = TaskName::new("data_collection");

    // An explicit registration applies the configured policy.
    let task = config.task("data_collection").unwrap();
    assert_eq!(task.policy, ExistingPolicy::Replace);
    registrar
        .enqueue_periodic(&task.definition(), task.policy)
        .await
        .unwrap();
    clock.advance(6 * HOUR);
    executor.run(&name).await.unwrap();
    let before = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(before.retry_state, RetryState::Retrying);
    assert_eq!(before.attempt_count, 1);

    // The process comes back up over the same registry.
    clock.advance(HOUR);
    let restarted = Registrar::new(Arc::clone(&storage)).with_clock(clock.clone());
    assert!(restarted.recover().await.unwrap().is_empty());
    let applied = BootListener::new(restarted.clone(), config.definitions())
        .handle(&RestartSignal::ProcessStarted)
        .await
        .unwrap();

    assert_eq!(applied, vec![(name.clone(), EnqueueOutcome::Kept)]);
    assert_eq!(restarted.entry(&name).await.unwrap().unwrap(), before);
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use tend::SqliteStorage;

    /// Test: Schedules and retry progress survive closing and reopening the database.
    #[tokio::test]
    async fn test_schedule_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tend.db");
        let clock = manual_clock();
        let name = TaskName::new("data_collection");

        {
            let storage = Arc::new(SqliteStorage::new(&path).await.unwrap());
            let registrar = Registrar::new(Arc::clone(&storage)).with_clock(clock.clone());
            let executor = Executor::new(registrar.clone())
                .with_task(Arc::new(FailingTask::always_failing("data_collection")));

            BootListener::new(registrar.clone(), desired())
                .handle(&RestartSignal::ProcessStarted)
                .await
                .unwrap();
            clock.advance(6 * HOUR);
            executor.run(&name).await.unwrap();
            storage.close().await;
        }

        let storage = Arc::new(SqliteStorage::new(&path).await.unwrap());
        let registrar = Registrar::new(Arc::clone(&storage)).with_clock(clock.clone());

        let entry = registrar.entry(&name).await.unwrap().unwrap();
        assert_eq!(entry.retry_state, RetryState::Retrying);
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(entry.interval, 6 * HOUR);

        let applied = BootListener::new(registrar.clone(), desired())
            .handle(&RestartSignal::BootCompleted)
            .await
            .unwrap();
        assert!(applied.iter().all(|(_, o)| *o == EnqueueOutcome::Kept));

        let after = registrar.entry(&name).await.unwrap().unwrap();
        assert_eq!(after, entry);
        assert_eq!(registrar.history(&name, 10).await.unwrap().len(), 1);
    }
}
