//! Concurrency integration tests.
//!
//! Tests that registration and delivery for the same task name are
//! serialized: racing registrations produce one entry and overlapping
//! deliveries never run the body twice at once.

use crate::common::{HOUR, data_collection, manual_clock};
use std::sync::Arc;
use std::time::Duration;
use tend::testing::SlowTask;
use tend::{
    Clock, EnqueueOutcome, EntryStatus, Executor, ExecutorError, ExistingPolicy, InMemoryStorage,
    Outcome, Registrar, RetryState, TaskDefinition, TaskName,
};

/// Test: Racing KeepExisting registrations create exactly one entry.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration_creates_once() {
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(manual_clock());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registrar = registrar.clone();
        handles.push(tokio::spawn(async move {
            registrar
                .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
                .await
                .unwrap()
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap() == EnqueueOutcome::Created {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(registrar.entries().await.unwrap().len(), 1);
}

/// Test: Overlapping deliveries of one task run the body once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_delivery_is_single_flight() {
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(manual_clock());
    let task = Arc::new(SlowTask::new("data_collection", Duration::from_millis(200)));
    let executor = Arc::new(Executor::new(registrar.clone()).with_task(task.clone()));

    registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let executor = Arc::clone(&executor);
        handles.push(tokio::spawn(async move {
            executor.run(&TaskName::new("data_collection")).await
        }));
    }

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(run) => {
                assert_eq!(run.outcome, Outcome::Success);
                succeeded += 1;
            }
            Err(ExecutorError::AlreadyRunning(name)) => {
                assert_eq!(name, "data_collection");
                rejected += 1;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(rejected, 4);
    assert_eq!(task.started(), 1);
    assert_eq!(task.max_concurrent(), 1);
}

/// Test: Different task names run in parallel.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_tasks_run_in_parallel() {
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(manual_clock());
    let a = Arc::new(SlowTask::new("a", Duration::from_millis(200)));
    let b = Arc::new(SlowTask::new("b", Duration::from_millis(200)));
    let executor = Arc::new(
        Executor::new(registrar.clone())
            .with_task(a.clone())
            .with_task(b.clone()),
    );

    for name in ["a", "b"] {
        registrar
            .enqueue_periodic(&TaskDefinition::new(name, HOUR), ExistingPolicy::KeepExisting)
            .await
            .unwrap();
    }

    let start = std::time::Instant::now();
    let name_a = TaskName::new("a");
    let name_b = TaskName::new("b");
    let (ra, rb) = tokio::join!(executor.run(&name_a), executor.run(&name_b));
    assert!(ra.is_ok() && rb.is_ok());
    assert!(start.elapsed() < Duration::from_millis(390));
}

/// Test: Replacing a schedule while it runs keeps the new schedule.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replace_during_run_wins() {
    let clock = manual_clock();
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(clock.clone());
    let task = Arc::new(SlowTask::new("data_collection", Duration::from_millis(300)));
    let executor = Arc::new(Executor::new(registrar.clone()).with_task(task.clone()));
    let name = TaskName::new("data_collection");

    registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();
    clock.advance(6 * HOUR);

    let run = {
        let executor = Arc::clone(&executor);
        let name = name.clone();
        tokio::spawn(async move { executor.run(&name).await })
    };

    // Wait until the body is running.
    while task.started() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        registrar.entry(&name).await.unwrap().unwrap().status,
        EntryStatus::Running
    );

    let replaced_at = clock.now();
    let outcome = registrar
        .enqueue_periodic(
            &TaskDefinition::new("data_collection", 2 * HOUR),
            ExistingPolicy::Replace,
        )
        .await
        .unwrap();
    assert_eq!(outcome, EnqueueOutcome::Replaced);

    let run = run.await.unwrap().unwrap();
    assert_eq!(run.outcome, Outcome::Success);

    let entry = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Enqueued);
    assert_eq!(entry.interval, 2 * HOUR);
    assert_eq!(entry.retry_state, RetryState::Fresh);
    assert_eq!(entry.next_fire_at, replaced_at + chrono::Duration::hours(2));
    assert_eq!(entry.last_outcome, Some(Outcome::Success));
}

/// Test: Cancelling a schedule while it runs keeps it cancelled.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_during_run_sticks() {
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(manual_clock());
    let task = Arc::new(SlowTask::new("data_collection", Duration::from_millis(200)));
    let executor = Arc::new(Executor::new(registrar.clone()).with_task(task.clone()));
    let name = TaskName::new("data_collection");

    registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();

    let run = {
        let executor = Arc::clone(&executor);
        let name = name.clone();
        tokio::spawn(async move { executor.run(&name).await })
    };
    while task.started() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(registrar.cancel(&name).await.unwrap());
    run.await.unwrap().unwrap();

    let entry = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Cancelled);

    let err = executor.run(&name).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Cancelled(_)));
}
