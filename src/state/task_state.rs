/// Task lifecycle states
///
/// This module defines every state a search task can be in and which moves
/// between them are legal.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of a task in the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    // ===== Active States =====
    /// Task is waiting in the queue (new, or re-queued after a retry delay)
    Initialized,

    /// A worker has claimed the task and is executing it
    Running,

    /// Task failed with a retryable error and is waiting for its delay to pass
    Retrying,

    // ===== Terminal States =====
    /// Task finished and its offers are attached
    Completed,

    /// Task failed and will not be retried
    Failed,
}

impl TaskState {
    /// Returns true if this is a terminal state
    ///
    /// `Failed` is terminal even though the retry handler may still move it to
    /// `Retrying` inside the same critical section that recorded the failure.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if `next` is a legal successor of this state
    ///
    /// ```text
    /// Initialized -> Running -> Completed
    ///                        -> Failed -> Retrying -> Initialized
    ///                                              -> Failed (cancelled)
    /// ```
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Initialized, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Failed, Self::Retrying)
                | (Self::Retrying, Self::Initialized)
                | (Self::Retrying, Self::Failed)
        )
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a state from its database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "initialized" => Some(Self::Initialized),
            "running" => Some(Self::Running),
            "retrying" => Some(Self::Retrying),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible task states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Initialized,
            Self::Running,
            Self::Retrying,
            Self::Completed,
            Self::Failed,
        ]
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
