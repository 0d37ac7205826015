//! Fare-Sweep: a round-trip airfare collector
//!
//! This crate drives a travel-booking site's search backend for a set of
//! date/route tasks. A bounded worker pool runs each task through a two-phase
//! paginated fetch (outbound flights, then the inbound flights compatible with
//! each outbound selection), merges the phases into complete itineraries, and
//! retries tasks that fail on transient transport errors.

pub mod config;
pub mod crawler;
pub mod model;
pub mod output;
pub mod query;
pub mod scheduler;
pub mod state;
pub mod storage;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for Fare-Sweep operations
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Query error: {0}")]
    Query(#[from] crawler::QueryError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] scheduler::SchedulerError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid date in config: {0}")]
    InvalidDate(String),
}

/// Classification of a failure, used by the retry allow-list
///
/// The kebab-case names are what `retry.retryable-errors` lists in the
/// configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// The request timed out
    Timeout,
    /// The connection could not be established or was reset
    Connection,
    /// The origin answered with a non-200 status
    HttpStatus,
    /// The response envelope was malformed or missing fields
    Protocol,
    /// A record failed validation
    Data,
    /// A persistence sink failed
    Storage,
    /// Anything else, including panics inside a task
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::HttpStatus => "http-status",
            Self::Protocol => "protocol",
            Self::Data => "data",
            Self::Storage => "storage",
            Self::Internal => "internal",
        }
    }

    /// Returns true for the transport family (timeouts and connection failures)
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for Fare-Sweep operations
pub type Result<T> = std::result::Result<T, SweepError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{FlightOffer, FlightSegment};
pub use query::{FlightQuery, TaskId};
pub use scheduler::{BatchReport, TaskManager, TaskReport};
pub use state::TaskState;
