use crate::config::RetryConfig;
use crate::scheduler::SchedulerError;
use crate::state::CrawlTask;
use crate::ErrorKind;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Decides whether and when a failed task runs again
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per task, counting the first
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff_factor: f64,
    pub retryable: Vec<ErrorKind>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            interval: config.interval(),
            backoff_factor: config.backoff_factor,
            retryable: config.retryable_errors.clone(),
        }
    }

    /// Returns true if `kind` is on the allow-list
    pub fn should_retry(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// `interval * backoff_factor ^ retry_count`
    pub fn compute_delay(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let secs = self.interval.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Applies the policy to a task that has just entered `Failed`
    ///
    /// Returns the delay before the task should be re-queued, or `None` when
    /// the task stays failed. Must be called under the table lock, in the
    /// same critical section that recorded the failure.
    pub fn on_failure(
        &self,
        task: &mut CrawlTask,
        kind: ErrorKind,
        now: DateTime<Utc>,
    ) -> Result<Option<Duration>, SchedulerError> {
        if !self.should_retry(kind) {
            tracing::debug!(task_id = %task.id, "{} errors are not retryable", kind);
            return Ok(None);
        }

        let attempts = task.count_retryable_failure();
        if attempts >= self.max_attempts {
            tracing::warn!(
                task_id = %task.id,
                "Retry budget exhausted after {} attempts",
                attempts
            );
            return Ok(None);
        }

        task.begin_retry(now)?;
        let delay = self.compute_delay(attempts);
        tracing::info!(
            task_id = %task.id,
            "Retrying in {:.2}s (attempt {}/{})",
            delay.as_secs_f64(),
            attempts + 1,
            self.max_attempts
        );
        Ok(Some(delay))
    }
}
