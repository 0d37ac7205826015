//! Storage traits and error types
//!
//! This module defines the trait interface for offer sinks and associated
//! error types.

use crate::model::FlightOffer;
use crate::scheduler::TaskReport;
use crate::storage::RunStatus;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("No run in progress")]
    NoActiveRun,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable destination for collected offers
///
/// Sinks are shared between workers behind a mutex, so every call is
/// short and synchronous. Only `save_offers` is required; run bookkeeping
/// and task outcomes are optional for a sink to record.
pub trait OfferSink: Send {
    /// Short name used in log messages
    fn name(&self) -> &str;

    /// Stores the offers produced by one task
    ///
    /// # Arguments
    ///
    /// * `offers` - Validated, complete offers
    /// * `name` - Label of the task that produced them
    ///
    /// # Returns
    ///
    /// The number of offers written
    fn save_offers(&mut self, offers: &[FlightOffer], name: &str) -> StorageResult<usize>;

    /// Records the final state of one task
    fn record_task(&mut self, _report: &TaskReport) -> StorageResult<()> {
        Ok(())
    }

    /// Starts a run; later offers and task outcomes belong to it
    fn begin_run(&mut self, _config_hash: &str) -> StorageResult<()> {
        Ok(())
    }

    /// Closes the current run with a final status
    fn finish_run(&mut self, _status: RunStatus) -> StorageResult<()> {
        Ok(())
    }
}
