//! Bounded worker pool, retry policy and batch submission
//!
//! This module handles:
//! - The task table and FIFO queue, guarded by one lock
//! - Global concurrency limiting via a semaphore
//! - Exponential-backoff retries with delayed re-queueing
//! - Batch submission, waiting and reporting

mod batch;
mod pool;
mod retry;

pub use batch::{BatchReport, TaskReport};
pub use pool::TaskManager;
pub use retry::RetryPolicy;

use crate::crawler::QueryError;
use crate::model::ParseError;
use crate::query::{FlightQuery, TaskId};
use crate::state::{TaskOutput, TaskState};
use crate::storage::StorageError;
use crate::ErrorKind;
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by the task table itself
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("Task {0} already finished and cannot be resubmitted")]
    TerminalTask(TaskId),

    #[error("Task {id} is {state} and cannot be run now")]
    NotRunnable { id: TaskId, state: TaskState },

    #[error("No queued task to run")]
    QueueEmpty,
}

/// Failure of one task execution
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Transport failure: {0}")]
    Transport(#[from] QueryError),

    #[error("Parse failure: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("{message}")]
    Other { kind: ErrorKind, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExecutionError {
    /// Classification consulted by the retry allow-list
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(e) => e.kind(),
            Self::Parse(e) => e.kind(),
            Self::Storage(_) => ErrorKind::Storage,
            Self::Other { kind, .. } => *kind,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// The work a worker performs for one claimed task
///
/// Implementations must not touch the task table; the pool records the
/// outcome.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, id: &TaskId, query: &FlightQuery) -> Result<TaskOutput, ExecutionError>;
}
