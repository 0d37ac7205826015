//! Integration tests for the worker pool and retry policy
//!
//! These tests replace the HTTP side with small executors and run on
//! tokio's paused clock, so backoff delays are observed exactly.

use async_trait::async_trait;
use fare_sweep::config::{RetryConfig, SchedulerConfig};
use fare_sweep::crawler::QueryError;
use fare_sweep::scheduler::{ExecutionError, SchedulerError, TaskExecutor};
use fare_sweep::state::TaskOutput;
use fare_sweep::{ErrorKind, FlightQuery, TaskId, TaskManager, TaskState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn create_test_scheduler(max: u32) -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent_tasks: max,
        task_timeout_minutes: 60,
        permit_poll_millis: 10,
    }
}

fn create_test_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        interval_seconds: 1.0,
        backoff_factor: 2.0,
        retryable_errors: vec![ErrorKind::Timeout, ErrorKind::Connection],
    }
}

fn query(dep: &str) -> FlightQuery {
    FlightQuery::new(dep, "SIN", "2025-07-21", "2025-07-27")
}

fn timeout_error() -> ExecutionError {
    ExecutionError::Transport(QueryError::Timeout("simulated timeout".to_string()))
}

/// Fails with a timeout for the first `failures` calls, then succeeds
struct FlakyExecutor {
    failures: usize,
    calls: Mutex<Vec<Instant>>,
}

impl FlakyExecutor {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskExecutor for FlakyExecutor {
    async fn execute(&self, _: &TaskId, _: &FlightQuery) -> Result<TaskOutput, ExecutionError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            calls.len()
        };
        if attempt <= self.failures {
            Err(timeout_error())
        } else {
            Ok(TaskOutput::default())
        }
    }
}

/// Tracks how many executions overlap
struct SlowExecutor {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl TaskExecutor for SlowExecutor {
    async fn execute(&self, _: &TaskId, _: &FlightQuery) -> Result<TaskOutput, ExecutionError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(TaskOutput::default())
    }
}

struct PanickingExecutor;

#[async_trait]
impl TaskExecutor for PanickingExecutor {
    async fn execute(&self, _: &TaskId, _: &FlightQuery) -> Result<TaskOutput, ExecutionError> {
        panic!("executor bug");
    }
}

fn assert_close(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(50),
        "expected about {:?}, got {:?}",
        expected,
        actual
    );
}

async fn wait_until_terminal(manager: &TaskManager, id: &TaskId) {
    loop {
        if manager.task(id).map(|t| t.state.is_terminal()).unwrap_or(true) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_transport_failures_back_off_then_fail() {
    let executor = Arc::new(FlakyExecutor::new(usize::MAX));
    let manager = TaskManager::new(&create_test_scheduler(2), &create_test_retry(), executor.clone());

    let report = manager.submit_batch(vec![query("TPE")]).await.unwrap();

    assert!(!report.timed_out);
    assert_eq!(report.total_tasks, 1);
    assert_eq!(report.failed_tasks, 1);

    let task = &report.tasks[0];
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.retry_count, 3);
    assert_eq!(task.retry_history.len(), 2);
    assert_eq!(task.retry_history[0].retry_number, 1);
    assert_eq!(task.retry_history[1].retry_number, 2);
    assert_eq!(task.last_error.as_ref().unwrap().kind, ErrorKind::Timeout);

    let calls = executor.calls();
    assert_eq!(calls.len(), 3);
    assert_close(calls[1] - calls[0], Duration::from_secs(2));
    assert_close(calls[2] - calls[1], Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_and_keeps_original_start() {
    let executor = Arc::new(FlakyExecutor::new(1));
    let manager = TaskManager::new(&create_test_scheduler(1), &create_test_retry(), executor.clone());
    let id = manager.submit(query("TPE"), Some(TaskId::from("flaky"))).unwrap();

    let first = manager.submit_single(Some(id.clone())).await.unwrap();
    assert_eq!(first.state, TaskState::Retrying);
    assert_eq!(first.retry_count, 1);
    let original = first.original_started_at.unwrap();

    wait_until_terminal(&manager, &id).await;

    let done = manager.task(&id).unwrap();
    assert_eq!(done.state, TaskState::Completed);
    assert_eq!(done.retry_count, 1);
    assert_eq!(done.original_started_at, Some(original));
    assert!(done.started_at.unwrap() >= original);
    assert!(done.last_error.is_none());
    assert_eq!(executor.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_retry_is_not_requeued() {
    let executor = Arc::new(FlakyExecutor::new(usize::MAX));
    let manager = TaskManager::new(&create_test_scheduler(1), &create_test_retry(), executor.clone());
    let id = manager.submit(query("TPE"), None).unwrap();

    let report = manager.submit_single(Some(id.clone())).await.unwrap();
    assert_eq!(report.state, TaskState::Retrying);

    manager.cancel_retry(&id).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let task = manager.task(&id).unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(executor.calls().len(), 1);
    assert_eq!(manager.queue_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_never_exceeds_limit() {
    let executor = Arc::new(SlowExecutor {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let manager = TaskManager::new(&create_test_scheduler(3), &create_test_retry(), executor.clone());

    let queries = (0..10).map(|i| query(&format!("A{}", i))).collect();
    let report = manager.submit_batch(queries).await.unwrap();

    assert_eq!(report.succeeded_tasks, 10);
    assert_eq!(executor.peak.load(Ordering::SeqCst), 3);
    assert_eq!(manager.running_count(), 0);
    assert_eq!(manager.worker_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resubmitting_same_id_keeps_one_entry() {
    let executor = Arc::new(FlakyExecutor::new(0));
    let manager = TaskManager::new(&create_test_scheduler(2), &create_test_retry(), executor.clone());
    let id = TaskId::from("dup");

    manager.submit(query("TPE"), Some(id.clone())).unwrap();
    manager.submit(query("KHH"), Some(id.clone())).unwrap();

    let counts = manager.state_counts();
    assert_eq!(counts.values().sum::<usize>(), 1);
    assert_eq!(manager.task(&id).unwrap().query.dep_city, "KHH");

    let report = manager.submit_single(None).await.unwrap();
    assert_eq!(report.task_id, id);
    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(executor.calls().len(), 1);

    assert!(matches!(
        manager.submit(query("TPE"), Some(id)),
        Err(SchedulerError::TerminalTask(_))
    ));
}

#[tokio::test]
async fn test_panicking_executor_fails_task_without_killing_pool() {
    let manager = TaskManager::new(
        &create_test_scheduler(2),
        &create_test_retry(),
        Arc::new(PanickingExecutor),
    );

    let report = manager
        .submit_batch(vec![query("TPE"), query("KHH")])
        .await
        .unwrap();

    assert_eq!(report.failed_tasks, 2);
    for task in &report.tasks {
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.last_error.as_ref().unwrap().kind, ErrorKind::Internal);
    }
}
