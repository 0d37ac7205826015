//! The task table and its worker pool
//!
//! Workers are tokio tasks. Each one loops: acquire one of the concurrency
//! permits without blocking (sleeping briefly when none is free), claim the
//! task at the head of the FIFO queue, run it through the registered
//! executor, and record the outcome. A worker that finds the queue empty
//! retires, so the pool drains and stops; the retry timer restarts it when a
//! delayed task comes back and nobody is left to take it.

use crate::config::{RetryConfig, SchedulerConfig};
use crate::query::{FlightQuery, TaskId};
use crate::scheduler::{ExecutionError, RetryPolicy, SchedulerError, TaskExecutor, TaskReport};
use crate::state::{CrawlTask, TaskOutput, TaskState};
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Everything guarded by the table lock
#[derive(Default)]
struct TaskTable {
    tasks: HashMap<TaskId, CrawlTask>,
    queue: VecDeque<TaskId>,
    active: HashSet<TaskId>,
    workers: usize,
}

struct Shared {
    table: Mutex<TaskTable>,
    permits: Arc<Semaphore>,
    max_workers: usize,
    permit_poll: Duration,
    task_timeout: Duration,
    retry: RetryPolicy,
    executor: Arc<dyn TaskExecutor>,
    changes: watch::Sender<u64>,
}

/// Owns the task table and runs tasks with bounded concurrency
///
/// Cloning is cheap; every clone refers to the same table and pool.
#[derive(Clone)]
pub struct TaskManager {
    shared: Arc<Shared>,
}

impl TaskManager {
    /// Creates a task manager
    ///
    /// # Arguments
    ///
    /// * `scheduler` - Pool size, permit polling interval and batch timeout
    /// * `retry` - Retry allow-list and backoff parameters
    /// * `executor` - The work each claimed task runs
    pub fn new(
        scheduler: &SchedulerConfig,
        retry: &RetryConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let max_workers = scheduler.max_concurrent_tasks.max(1) as usize;
        let (changes, _) = watch::channel(0u64);

        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(TaskTable::default()),
                permits: Arc::new(Semaphore::new(max_workers)),
                max_workers,
                permit_poll: scheduler.permit_poll(),
                task_timeout: scheduler.task_timeout(),
                retry: RetryPolicy::from_config(retry),
                executor,
                changes,
            }),
        }
    }

    /// Ceiling on concurrently running tasks
    pub fn max_concurrent_tasks(&self) -> usize {
        self.shared.max_workers
    }

    pub(super) fn task_timeout(&self) -> Duration {
        self.shared.task_timeout
    }

    /// Adds a task to the queue and returns its id
    ///
    /// With an explicit id the call is idempotent: a task that is already
    /// queued, running or waiting for a retry keeps its single table entry
    /// and its retry history. A finished task cannot be resubmitted.
    pub fn submit(
        &self,
        query: FlightQuery,
        id: Option<TaskId>,
    ) -> Result<TaskId, SchedulerError> {
        let id = id.unwrap_or_else(TaskId::generate);
        {
            let mut table = self.shared.lock_table();
            match table.tasks.get(&id).map(|t| t.state) {
                Some(TaskState::Initialized) => {
                    // Not started yet; the newer parameters win.
                    if let Some(task) = table.tasks.get_mut(&id) {
                        task.query = query;
                    }
                    if !table.queue.contains(&id) {
                        table.queue.push_back(id.clone());
                    }
                    tracing::debug!(task_id = %id, "Task already queued");
                    return Ok(id);
                }
                Some(TaskState::Running) | Some(TaskState::Retrying) => {
                    tracing::debug!(task_id = %id, "Task already in flight");
                    return Ok(id);
                }
                Some(_) => return Err(SchedulerError::TerminalTask(id)),
                None => {
                    table
                        .tasks
                        .insert(id.clone(), CrawlTask::new(id.clone(), query));
                    table.queue.push_back(id.clone());
                }
            }
        }
        tracing::debug!(task_id = %id, "Task queued");
        self.shared.notify();
        Ok(id)
    }

    /// Spawns `n` workers
    ///
    /// Workers exit once the queue is empty, so this must be called again to
    /// process tasks submitted after the pool drained.
    pub fn run_workers(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.shared.lock_table().workers += n;
        spawn_workers(&self.shared, n);
    }

    /// Tops the pool up to its full size
    pub fn ensure_workers(&self) {
        let missing = {
            let mut table = self.shared.lock_table();
            let missing = self.shared.max_workers.saturating_sub(table.workers);
            table.workers += missing;
            missing
        };
        spawn_workers(&self.shared, missing);
    }

    /// Runs one queued task on the caller's task and returns its report
    ///
    /// Without an id the task at the head of the queue is taken. The call
    /// waits for a concurrency permit like any worker would. A retry the task
    /// schedules on failure is handed to the pool.
    pub async fn submit_single(&self, id: Option<TaskId>) -> Result<TaskReport, SchedulerError> {
        let permit = acquire_permit(&self.shared).await;

        let (id, query) = {
            let mut table = self.shared.lock_table();
            let id = match id {
                Some(id) => {
                    let state = table
                        .tasks
                        .get(&id)
                        .map(|t| t.state)
                        .ok_or_else(|| SchedulerError::TaskNotFound(id.clone()))?;
                    if state != TaskState::Initialized {
                        return Err(SchedulerError::NotRunnable { id, state });
                    }
                    table.queue.retain(|queued| queued != &id);
                    id
                }
                None => table.queue.pop_front().ok_or(SchedulerError::QueueEmpty)?,
            };
            let query = start_task(&mut table, &id)?;
            (id, query)
        };
        self.shared.notify();

        let outcome = execute(&self.shared, &id, query).await;
        finish(&self.shared, &id, outcome);
        drop(permit);

        self.task(&id).ok_or(SchedulerError::TaskNotFound(id))
    }

    /// Abandons a pending retry; the task ends `Failed`
    pub fn cancel_retry(&self, id: &TaskId) -> Result<(), SchedulerError> {
        {
            let mut table = self.shared.lock_table();
            let task = table
                .tasks
                .get_mut(id)
                .ok_or_else(|| SchedulerError::TaskNotFound(id.clone()))?;
            task.cancel_retry(Utc::now())?;
        }
        tracing::info!(task_id = %id, "Retry cancelled");
        self.shared.notify();
        Ok(())
    }

    /// Snapshot of one task
    pub fn task(&self, id: &TaskId) -> Option<TaskReport> {
        self.shared.lock_table().tasks.get(id).map(TaskReport::from_task)
    }

    /// Snapshot of several tasks, in the order given
    pub fn tasks(&self, ids: &[TaskId]) -> Vec<TaskReport> {
        let table = self.shared.lock_table();
        ids.iter()
            .filter_map(|id| table.tasks.get(id).map(TaskReport::from_task))
            .collect()
    }

    /// Output of a completed task
    pub fn output(&self, id: &TaskId) -> Option<TaskOutput> {
        self.shared
            .lock_table()
            .tasks
            .get(id)
            .and_then(|t| t.result.clone())
    }

    /// Number of tasks in each state
    pub fn state_counts(&self) -> HashMap<TaskState, usize> {
        let table = self.shared.lock_table();
        let mut counts = HashMap::new();
        for task in table.tasks.values() {
            *counts.entry(task.state).or_insert(0) += 1;
        }
        counts
    }

    /// Number of tasks currently claimed by a worker
    pub fn running_count(&self) -> usize {
        self.shared.lock_table().active.len()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.lock_table().queue.len()
    }

    /// Number of workers that have not retired yet
    pub fn worker_count(&self) -> usize {
        self.shared.lock_table().workers
    }

    /// Counts how many of `ids` are terminal and how many are running
    pub(super) fn progress(&self, ids: &[TaskId]) -> (usize, usize) {
        let table = self.shared.lock_table();
        ids.iter()
            .filter_map(|id| table.tasks.get(id))
            .fold((0, 0), |(done, running), task| {
                if task.state.is_terminal() {
                    (done + 1, running)
                } else if task.state == TaskState::Running {
                    (done, running + 1)
                } else {
                    (done, running)
                }
            })
    }

    /// Receiver that changes whenever any task changes state
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }
}

impl Shared {
    /// Every critical section leaves the table consistent, so a poisoned
    /// lock is still usable.
    fn lock_table(&self) -> MutexGuard<'_, TaskTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
    }
}

fn spawn_workers(shared: &Arc<Shared>, n: usize) {
    for _ in 0..n {
        let shared = Arc::clone(shared);
        tokio::spawn(async move { worker_loop(shared).await });
    }
}

async fn worker_loop(shared: Arc<Shared>) {
    loop {
        {
            let mut table = shared.lock_table();
            if table.queue.is_empty() {
                table.workers = table.workers.saturating_sub(1);
                tracing::debug!("Queue drained, worker retiring ({} left)", table.workers);
                return;
            }
        }

        let permit = match Arc::clone(&shared.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                tokio::time::sleep(shared.permit_poll).await;
                continue;
            }
            Err(TryAcquireError::Closed) => {
                let mut table = shared.lock_table();
                table.workers = table.workers.saturating_sub(1);
                return;
            }
        };

        let Some((id, query)) = claim_or_retire(&shared) else {
            drop(permit);
            return;
        };

        let outcome = execute(&shared, &id, query).await;
        finish(&shared, &id, outcome);
        drop(permit);
    }
}

async fn acquire_permit(shared: &Arc<Shared>) -> Option<OwnedSemaphorePermit> {
    loop {
        match Arc::clone(&shared.permits).try_acquire_owned() {
            Ok(permit) => return Some(permit),
            Err(TryAcquireError::NoPermits) => tokio::time::sleep(shared.permit_poll).await,
            Err(TryAcquireError::Closed) => return None,
        }
    }
}

/// Pops the next runnable task, or retires the worker if there is none
fn claim_or_retire(shared: &Arc<Shared>) -> Option<(TaskId, FlightQuery)> {
    let claimed = {
        let mut table = shared.lock_table();
        loop {
            let Some(id) = table.queue.pop_front() else {
                table.workers = table.workers.saturating_sub(1);
                break None;
            };
            match start_task(&mut table, &id) {
                Ok(query) => break Some((id, query)),
                Err(e) => tracing::warn!("Skipping stale queue entry: {}", e),
            }
        }
    };
    if claimed.is_some() {
        shared.notify();
    }
    claimed
}

fn start_task(table: &mut TaskTable, id: &TaskId) -> Result<FlightQuery, SchedulerError> {
    let task = table
        .tasks
        .get_mut(id)
        .ok_or_else(|| SchedulerError::TaskNotFound(id.clone()))?;
    task.start(Utc::now())?;
    let query = task.query.clone();
    if task.retry_count > 0 {
        tracing::info!(task_id = %id, "Starting retry {} for {}", task.retry_count, query);
    } else {
        tracing::info!(task_id = %id, "Starting {}", query);
    }
    table.active.insert(id.clone());
    Ok(query)
}

/// Runs the executor on its own task so a panic is contained
async fn execute(
    shared: &Arc<Shared>,
    id: &TaskId,
    query: FlightQuery,
) -> Result<TaskOutput, ExecutionError> {
    let executor = Arc::clone(&shared.executor);
    let task_id = id.clone();
    let handle = tokio::spawn(async move { executor.execute(&task_id, &query).await });

    match handle.await {
        Ok(outcome) => outcome,
        Err(join_error) => Err(ExecutionError::Internal(format!(
            "task execution aborted: {}",
            join_error
        ))),
    }
}

/// Records an outcome and, for retryable failures, arms the retry timer
fn finish(shared: &Arc<Shared>, id: &TaskId, outcome: Result<TaskOutput, ExecutionError>) {
    let now = Utc::now();
    let mut retry_after = None;
    {
        let mut table = shared.lock_table();
        table.active.remove(id);
        let Some(task) = table.tasks.get_mut(id) else {
            tracing::warn!(task_id = %id, "Finished task is missing from the table");
            return;
        };

        match outcome {
            Ok(output) => {
                let offers = output.offers.len();
                match task.complete(output, now) {
                    Ok(()) => {
                        let elapsed = task
                            .total_elapsed()
                            .map(|d| d.num_milliseconds() as f64 / 1000.0)
                            .unwrap_or_default();
                        tracing::info!(
                            task_id = %id,
                            "Completed with {} offers in {:.2}s",
                            offers,
                            elapsed
                        );
                    }
                    Err(e) => tracing::warn!("{}", e),
                }
            }
            Err(error) => {
                let kind = error.kind();
                tracing::error!(task_id = %id, "Failed ({}): {}", kind, error);
                match task.fail(kind, error.to_string(), now) {
                    Ok(()) => match shared.retry.on_failure(task, kind, now) {
                        Ok(delay) => retry_after = delay,
                        Err(e) => tracing::warn!("{}", e),
                    },
                    Err(e) => tracing::warn!("{}", e),
                }
            }
        }
    }
    shared.notify();

    if let Some(delay) = retry_after {
        schedule_retry(shared, id.clone(), delay);
    }
}

/// One-shot timer that puts a retrying task back on the queue
fn schedule_retry(shared: &Arc<Shared>, id: TaskId, delay: Duration) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        requeue_retry(&shared, &id);
    });
}

fn requeue_retry(shared: &Arc<Shared>, id: &TaskId) {
    let restart = {
        let mut table = shared.lock_table();
        let Some(task) = table.tasks.get_mut(id) else {
            tracing::error!(task_id = %id, "Cannot retry: task not found");
            return;
        };
        if task.state != TaskState::Retrying {
            tracing::info!(task_id = %id, "State changed to {}, retry dropped", task.state);
            return;
        }
        if let Err(e) = task.reinitialize() {
            tracing::warn!("{}", e);
            return;
        }
        table.queue.push_back(id.clone());

        if table.workers == 0 {
            table.workers = shared.max_workers;
            shared.max_workers
        } else {
            0
        }
    };

    tracing::debug!(task_id = %id, "Re-queued for retry");
    shared.notify();
    if restart > 0 {
        tracing::debug!("Pool drained, restarting {} workers", restart);
        spawn_workers(shared, restart);
    }
}
