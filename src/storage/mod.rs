//! Storage module for persisting collected offers
//!
//! This module handles everything written to disk, including:
//! - SQLite database initialization and schema management
//! - Run bookkeeping and per-task outcomes
//! - Offer records, in SQLite or as JSON files
//! - Writing to several sinks at once

mod fanout;
mod json;
mod schema;
mod sqlite;
mod traits;

pub use fanout::FanoutSink;
pub use json::JsonFileSink;
pub use sqlite::SqliteSink;
pub use traits::{OfferSink, StorageError, StorageResult};

use crate::config::OutputConfig;
use std::path::Path;

/// Represents a collection run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a collection run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    TimedOut,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "timed_out" => Some(Self::TimedOut),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Opens every sink named by the output configuration
///
/// The SQLite database is always opened; the JSON file sink is added when
/// `json-dir` is set.
///
/// # Arguments
///
/// * `config` - The output configuration
///
/// # Returns
///
/// * `Ok(FanoutSink)` - All configured sinks opened
/// * `Err(StorageError)` - A sink could not be opened
pub fn open_sinks(config: &OutputConfig) -> StorageResult<FanoutSink> {
    let mut sinks: Vec<Box<dyn OfferSink>> = Vec::new();
    sinks.push(Box::new(SqliteSink::new(Path::new(&config.database_path))?));

    if let Some(dir) = &config.json_dir {
        let json = JsonFileSink::new(dir)?;
        tracing::info!("Writing JSON offer files to {}", json.dir().display());
        sinks.push(Box::new(json));
    }

    Ok(FanoutSink::new(sinks))
}
