//! State module for tracking task progress
//!
//! # Components
//!
//! - `TaskState`: The lifecycle of one search task (initialized, running, retrying, completed, failed)
//! - `CrawlTask`: The task record owned by the scheduler's table, with its timestamps and retry history

mod task;
mod task_state;

// Re-export main types
pub use task::{CrawlTask, RetryRecord, TaskFailure, TaskOutput};
pub use task_state::TaskState;
