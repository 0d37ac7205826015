//! Batch submission and reporting

use crate::query::{FlightQuery, TaskId};
use crate::scheduler::{SchedulerError, TaskManager};
use crate::state::{CrawlTask, RetryRecord, TaskFailure, TaskState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// How often the batch waiter logs progress
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Stand-in deadline for timeouts too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Snapshot of one task for callers and reports
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub query: FlightQuery,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub original_started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Seconds from the first start to the last end, across all attempts
    pub elapsed_seconds: Option<f64>,
    pub retry_count: u32,
    pub retry_history: Vec<RetryRecord>,
    pub offer_count: usize,
    pub last_error: Option<TaskFailure>,
}

impl TaskReport {
    pub fn from_task(task: &CrawlTask) -> Self {
        Self {
            task_id: task.id.clone(),
            query: task.query.clone(),
            state: task.state,
            created_at: task.created_at,
            started_at: task.started_at,
            original_started_at: task.original_started_at,
            ended_at: task.ended_at,
            elapsed_seconds: task
                .total_elapsed()
                .map(|d| d.num_milliseconds() as f64 / 1000.0),
            retry_count: task.retry_count,
            retry_history: task.retry_history.clone(),
            offer_count: task.offer_count(),
            last_error: task.last_error.clone(),
        }
    }
}

/// Outcome of one `submit_batch` call
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// `batch_` followed by eight hex digits
    pub batch_id: String,
    pub total_tasks: usize,
    /// Tasks that reached a terminal state (completed or failed)
    pub completed_tasks: usize,
    pub succeeded_tasks: usize,
    pub failed_tasks: usize,
    pub elapsed_seconds: f64,
    /// True when the wait stopped at the timeout with tasks still unfinished
    pub timed_out: bool,
    pub tasks: Vec<TaskReport>,
}

impl BatchReport {
    pub fn total_offers(&self) -> usize {
        self.tasks.iter().map(|t| t.offer_count).sum()
    }
}

impl TaskManager {
    /// Submits every query, runs the pool and waits for the batch
    ///
    /// Waiting stops at the configured task timeout; tasks still in flight
    /// at that point keep running but are reported in their current state.
    pub async fn submit_batch(
        &self,
        queries: Vec<FlightQuery>,
    ) -> Result<BatchReport, SchedulerError> {
        let batch_id = new_batch_id();
        let started = Instant::now();

        tracing::info!("Initializing batch {} with {} tasks", batch_id, queries.len());
        let mut ids = Vec::with_capacity(queries.len());
        for query in queries {
            ids.push(self.submit(query, None)?);
            if ids.len() % 10 == 0 {
                tracing::debug!("Batch {}: {} tasks queued", batch_id, ids.len());
            }
        }

        tracing::info!("Batch {} queued, starting workers", batch_id);
        self.ensure_workers();

        let timed_out = self.wait_for(&batch_id, &ids, self.task_timeout()).await;
        let tasks = self.tasks(&ids);
        let elapsed = started.elapsed().as_secs_f64();

        let report = BatchReport {
            batch_id,
            total_tasks: ids.len(),
            completed_tasks: tasks.iter().filter(|t| t.state.is_terminal()).count(),
            succeeded_tasks: tasks
                .iter()
                .filter(|t| t.state == TaskState::Completed)
                .count(),
            failed_tasks: tasks.iter().filter(|t| t.state == TaskState::Failed).count(),
            elapsed_seconds: elapsed,
            timed_out,
            tasks,
        };

        if report.timed_out {
            tracing::error!(
                "Batch {} timed out with {} tasks unfinished",
                report.batch_id,
                report.total_tasks - report.completed_tasks
            );
        }
        tracing::info!("Batch {} finished in {:.2}s", report.batch_id, elapsed);
        Ok(report)
    }

    /// Waits until every task in `ids` is terminal or `timeout` passes
    ///
    /// Returns true on timeout.
    async fn wait_for(&self, batch_id: &str, ids: &[TaskId], timeout: Duration) -> bool {
        let mut changes = self.subscribe();
        let deadline = deadline_after(timeout);
        let mut next_report = Instant::now() + PROGRESS_INTERVAL;

        loop {
            let (done, running) = self.progress(ids);
            if done == ids.len() {
                tracing::info!("Batch {}: all {} tasks finished", batch_id, done);
                return false;
            }

            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            if now >= next_report {
                tracing::info!("Batch {} progress: {}/{} finished", batch_id, done, ids.len());
                if running > 0 {
                    tracing::info!("{} tasks running", running);
                }
                next_report = now + PROGRESS_INTERVAL;
            }

            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
                _ = tokio::time::sleep_until(deadline.min(next_report)) => {}
            }
        }
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn new_batch_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("batch_{}", &uuid[..8])
}
