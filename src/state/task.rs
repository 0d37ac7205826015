use crate::model::FlightOffer;
use crate::output::OfferRow;
use crate::query::{FlightQuery, TaskId};
use crate::scheduler::SchedulerError;
use crate::state::TaskState;
use crate::ErrorKind;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// What a successful execution hands back to the scheduler
#[derive(Debug, Clone, Default)]
pub struct TaskOutput {
    /// Validated, complete offers
    pub offers: Vec<FlightOffer>,

    /// Pretty JSON rendering of `offers`
    pub json: String,

    /// Flattened table rendering of `offers`
    pub rows: Vec<OfferRow>,

    /// Values discovered during execution (e.g. `search_key`)
    pub enrichment: BTreeMap<String, String>,
}

/// Last failure recorded on a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// One entry of a task's retry history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryRecord {
    pub retry_number: u32,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// A search task as held in the scheduler's table
///
/// Fields are readable by anyone holding the table lock; every state change
/// goes through the methods below, which refuse illegal transitions.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub id: TaskId,
    pub query: FlightQuery,

    /// Mid-flight additions to the query parameters
    pub enrichment: BTreeMap<String, String>,

    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,

    /// First time the task ever started; survives retries
    pub original_started_at: Option<DateTime<Utc>>,

    pub retry_count: u32,
    pub retry_history: Vec<RetryRecord>,
    pub last_error: Option<TaskFailure>,
    pub result: Option<TaskOutput>,
}

impl CrawlTask {
    pub fn new(id: TaskId, query: FlightQuery) -> Self {
        Self {
            id,
            query,
            enrichment: BTreeMap::new(),
            state: TaskState::Initialized,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            original_started_at: None,
            retry_count: 0,
            retry_history: Vec::new(),
            last_error: None,
            result: None,
        }
    }

    fn transition(&mut self, next: TaskState) -> Result<(), SchedulerError> {
        if !self.state.can_transition_to(next) {
            return Err(SchedulerError::InvalidTransition {
                id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(task_id = %self.id, "{} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Initialized -> Running
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        self.transition(TaskState::Running)?;
        self.started_at = Some(now);
        self.ended_at = None;
        if self.original_started_at.is_none() {
            self.original_started_at = Some(now);
        }
        Ok(())
    }

    /// Running -> Completed, attaching the output and its enrichment
    pub fn complete(&mut self, output: TaskOutput, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        self.transition(TaskState::Completed)?;
        self.ended_at = Some(now);
        self.last_error = None;
        for (key, value) in &output.enrichment {
            self.enrichment.insert(key.clone(), value.clone());
        }
        self.result = Some(output);
        Ok(())
    }

    /// Running -> Failed
    pub fn fail(
        &mut self,
        kind: ErrorKind,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        self.transition(TaskState::Failed)?;
        self.ended_at = Some(now);
        self.last_error = Some(TaskFailure {
            kind,
            message: message.into(),
        });
        Ok(())
    }

    /// Counts one more retryable failure against the task
    pub fn count_retryable_failure(&mut self) -> u32 {
        self.retry_count += 1;
        self.retry_count
    }

    /// Failed -> Retrying, appending the failure to the retry history
    pub fn begin_retry(&mut self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        self.transition(TaskState::Retrying)?;
        let error = self
            .last_error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_default();
        self.retry_history.push(RetryRecord {
            retry_number: self.retry_count,
            error,
            timestamp: now,
        });
        Ok(())
    }

    /// Retrying -> Initialized, ready to be queued again
    pub fn reinitialize(&mut self) -> Result<(), SchedulerError> {
        self.transition(TaskState::Initialized)?;
        self.started_at = None;
        self.ended_at = None;
        Ok(())
    }

    /// Retrying -> Failed, abandoning the pending retry
    pub fn cancel_retry(&mut self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        self.transition(TaskState::Failed)?;
        self.ended_at = Some(now);
        Ok(())
    }

    /// Time from the first start to the last end, across all attempts
    pub fn total_elapsed(&self) -> Option<Duration> {
        match (self.original_started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Number of offers attached to a completed task
    pub fn offer_count(&self) -> usize {
        self.result.as_ref().map(|r| r.offers.len()).unwrap_or(0)
    }
}
