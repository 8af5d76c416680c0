//! Retry integration tests.
//!
//! Tests the bounded retry cycle inside a period: backoff timing, the
//! final failure report, and the fresh start of the following period.

use crate::common::{HOUR, data_collection, manual_clock};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tend::testing::{FailingTask, PanickingTask, RecordingHandler, SlowTask, UnavailableRegistry};
use tend::{
    Clock, EntryStatus, Event, EventBus, Executor, ExecutorError, ExistingPolicy, InMemoryStorage,
    Outcome, Registrar, RetryPolicy, RetryState, TaskDefinition, TaskName,
};

/// Test: The 6h data collection task fails twice, then succeeds.
#[tokio::test]
async fn test_data_collection_recovers_within_period() {
    let clock = manual_clock();
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(clock.clone());
    let task = Arc::new(FailingTask::new("data_collection", 2));
    let executor = Executor::new(registrar.clone()).with_task(task.clone());
    let name = TaskName::new("data_collection");

    registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();

    // Inside the flex window.
    clock.advance(5 * HOUR + Duration::from_secs(50 * 60));
    let first = executor.run(&name).await.unwrap();
    assert_eq!(first.outcome, Outcome::Retry);
    assert_eq!(first.attempt, 0);

    let entry = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(entry.retry_state, RetryState::Retrying);
    assert_eq!(entry.attempt_count, 1);
    assert_eq!(entry.next_fire_at, clock.now() + ChronoDuration::seconds(30));
    assert!(!entry.is_due(clock.now()));

    clock.advance(Duration::from_secs(30));
    assert!(registrar.entry(&name).await.unwrap().unwrap().is_due(clock.now()));
    let second = executor.run(&name).await.unwrap();
    assert_eq!(second.outcome, Outcome::Retry);
    assert_eq!(second.attempt, 1);

    let entry = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(entry.attempt_count, 2);
    assert_eq!(entry.next_fire_at, clock.now() + ChronoDuration::seconds(60));

    clock.advance(Duration::from_secs(60));
    let third = executor.run(&name).await.unwrap();
    assert_eq!(third.outcome, Outcome::Success);
    assert_eq!(third.attempt, 2);

    let entry = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(entry.retry_state, RetryState::Fresh);
    assert_eq!(entry.attempt_count, 0);
    assert_eq!(entry.last_outcome, Some(Outcome::Success));
    let last_success = entry.last_success_at.unwrap();
    assert_eq!(last_success, clock.now());
    assert_eq!(entry.next_fire_at, last_success + ChronoDuration::hours(6));
    assert_eq!(task.call_count(), 3);

    let history = registrar.history(&name, 10).await.unwrap();
    let outcomes: Vec<Outcome> = history.iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![Outcome::Success, Outcome::Retry, Outcome::Retry]
    );
}

/// Test: A task that keeps failing reports RETRY, RETRY, FAILURE and then
/// waits for its next period.
#[tokio::test]
async fn test_retry_budget_is_bounded_per_period() {
    let clock = manual_clock();
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(clock.clone());
    let task = Arc::new(FailingTask::always_failing("data_collection"));
    let executor = Executor::new(registrar.clone()).with_task(task.clone());
    let name = TaskName::new("data_collection");

    registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();
    clock.advance(6 * HOUR);

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let run = executor.run(&name).await.unwrap();
        outcomes.push(run.outcome);
        let entry = registrar.entry(&name).await.unwrap().unwrap();
        clock.set(entry.next_fire_at);
    }
    assert_eq!(
        outcomes,
        vec![Outcome::Retry, Outcome::Retry, Outcome::Failure]
    );

    let entry = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(entry.retry_state, RetryState::Exhausted);
    assert_eq!(entry.attempt_count, 3);
    assert_eq!(entry.last_outcome, Some(Outcome::Failure));
    assert!(entry.last_success_at.is_none());

    // The final failure moved the task a whole interval on; the clock was set
    // to that instant above, so this is the next period.
    let next_period = executor.run(&name).await.unwrap();
    assert_eq!(next_period.attempt, 0);
    assert_eq!(next_period.outcome, Outcome::Retry);

    let entry = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(entry.retry_state, RetryState::Retrying);
    assert_eq!(entry.attempt_count, 1);
    assert_eq!(task.call_count(), 4);
}

/// Test: Failures emit retrying events, then a final failed event.
#[tokio::test]
async fn test_retry_events() {
    let clock = manual_clock();
    let recorder = RecordingHandler::new();
    let event_bus = EventBus::new();
    event_bus.register(recorder.clone()).await;

    let registrar = Registrar::new(Arc::new(InMemoryStorage::new()))
        .with_clock(clock.clone())
        .with_event_bus(event_bus);
    let executor = Executor::new(registrar.clone())
        .with_retry_policy(RetryPolicy::new(2))
        .with_task(Arc::new(FailingTask::with_error(
            "data_collection",
            u32::MAX,
            "upstream unreachable",
        )));
    let name = TaskName::new("data_collection");

    registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();
    executor.run(&name).await.unwrap();
    executor.run(&name).await.unwrap();

    let events = recorder.events().await;
    let retrying: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::TaskRetrying {
                attempt,
                max_attempts,
                error,
                ..
            } => Some((*attempt, *max_attempts, error.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(retrying, vec![(1, 2, "execution failed: upstream unreachable".to_string())]);

    let failed = events
        .iter()
        .find_map(|e| match e {
            Event::TaskFailed { attempts, .. } => Some(*attempts),
            _ => None,
        })
        .expect("failed event");
    assert_eq!(failed, 2);
}

/// Test: Panics and timeouts count as failed attempts.
#[tokio::test]
async fn test_panics_and_timeouts_are_failures() {
    let clock = manual_clock();
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(clock.clone());
    let executor = Executor::new(registrar.clone())
        .with_task(Arc::new(PanickingTask::new("panicky")))
        .with_task(Arc::new(
            SlowTask::new("stuck", Duration::from_secs(30)).with_timeout(Duration::from_millis(50)),
        ));

    for name in ["panicky", "stuck"] {
        registrar
            .enqueue_periodic(&TaskDefinition::new(name, HOUR), ExistingPolicy::KeepExisting)
            .await
            .unwrap();

        let run = executor.run(&TaskName::new(name)).await.unwrap();
        assert_eq!(run.outcome, Outcome::Retry, "task {}", name);
        assert!(run.error.is_some());

        let entry = registrar.entry(&TaskName::new(name)).await.unwrap().unwrap();
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(entry.retry_state, RetryState::Retrying);
    }
}

/// Test: Backoff grows per policy and never exceeds the cap.
#[tokio::test]
async fn test_backoff_is_capped() {
    let clock = manual_clock();
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(clock.clone());
    let policy = RetryPolicy::new(10)
        .exponential(Duration::from_secs(60))
        .with_max_delay(Duration::from_secs(5 * 60));
    let executor = Executor::new(registrar.clone())
        .with_retry_policy(policy)
        .with_task(Arc::new(FailingTask::always_failing("data_collection")));
    let name = TaskName::new("data_collection");

    registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();

    let mut delays = Vec::new();
    for _ in 0..5 {
        executor.run(&name).await.unwrap();
        let entry = registrar.entry(&name).await.unwrap().unwrap();
        delays.push((entry.next_fire_at - clock.now()).num_seconds());
        clock.set(entry.next_fire_at);
    }

    assert_eq!(delays, vec![60, 120, 240, 300, 300]);
}

/// Test: An exhausted task cannot be started again inside the same period.
#[tokio::test]
async fn test_exhausted_task_waits_for_next_period() {
    let clock = manual_clock();
    let registrar = Registrar::new(Arc::new(InMemoryStorage::new())).with_clock(clock.clone());
    let task = Arc::new(FailingTask::always_failing("data_collection"));
    let executor = Executor::new(registrar.clone()).with_task(task.clone());
    let name = TaskName::new("data_collection");

    registrar
        .enqueue_periodic(&data_collection(), ExistingPolicy::KeepExisting)
        .await
        .unwrap();
    clock.advance(6 * HOUR);

    for _ in 0..3 {
        executor.run(&name).await.unwrap();
        let entry = registrar.entry(&name).await.unwrap().unwrap();
        if entry.retry_state == RetryState::Retrying {
            clock.set(entry.next_fire_at);
        }
    }
    let exhausted = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(exhausted.retry_state, RetryState::Exhausted);

    clock.advance(HOUR);
    let err = executor.run(&name).await.unwrap_err();
    match err {
        ExecutorError::Exhausted { name: n, next_window } => {
            assert_eq!(n, "data_collection");
            assert_eq!(next_window, exhausted.window_opens_at());
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(task.call_count(), 3);
    assert_eq!(registrar.entry(&name).await.unwrap().unwrap(), exhausted);

    // Once the next period's flex window opens, a fresh cycle starts.
    clock.set(exhausted.window_opens_at());
    let run = executor.run(&name).await.unwrap();
    assert_eq!(run.attempt, 0);
    assert_eq!(task.call_count(), 4);
}

/// Test: A run whose outcome could not be recorded is settled as a failed attempt.
#[tokio::test]
async fn test_unrecorded_run_is_settled_as_failure() {
    let clock = manual_clock();
    let storage = Arc::new(UnavailableRegistry::new(InMemoryStorage::new()));
    let registrar = Registrar::new(Arc::clone(&storage)).with_clock(clock.clone());
    let task = Arc::new(SlowTask::new("data_collection", Duration::from_millis(100)));
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
    while task.started() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // A live invocation is never settled.
    assert!(executor.settle_stale(&name).await.unwrap().is_none());

    storage.set_available(false);
    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, ExecutorError::Registry(_)));
    storage.set_available(true);

    let stuck = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(stuck.status, EntryStatus::Running);

    let settled = executor.settle_stale(&name).await.unwrap().unwrap();
    assert_eq!(settled.outcome, Outcome::Retry);
    assert_eq!(settled.attempt, 0);

    let entry = registrar.entry(&name).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Enqueued);
    assert_eq!(entry.retry_state, RetryState::Retrying);
    assert_eq!(entry.attempt_count, 1);
    assert_eq!(entry.last_outcome, Some(Outcome::Retry));
    assert_eq!(entry.next_fire_at, clock.now() + ChronoDuration::seconds(30));
    assert!(executor.settle_stale(&name).await.unwrap().is_none());

    clock.advance(Duration::from_secs(30));
    assert!(entry.is_due(clock.now()));
    let run = executor.run(&name).await.unwrap();
    assert_eq!(run.outcome, Outcome::Success);
    assert_eq!(run.attempt, 1);
    assert_eq!(registrar.history(&name, 10).await.unwrap().len(), 2);
}
