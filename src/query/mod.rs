//! Typed search queries and task identifiers
//!
//! A `FlightQuery` is the immutable parameter set of one task. The field names
//! on the wire (`DepCity1`, `ArrCity1`, `DepDate1`, `DepDate2`) match the task
//! files the collector accepts, and any other keys in such a file are kept in
//! `extra` instead of being dropped.

mod generate;

pub use generate::{fixed_month_query, load_task_file, queries_from_config};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unique identifier of a task in the scheduler's table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generates a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Parameters of one round-trip search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightQuery {
    /// Departure city code, e.g. `TPE`
    #[serde(rename = "DepCity1")]
    pub dep_city: String,

    /// Arrival city code, e.g. `SIN`
    #[serde(rename = "ArrCity1")]
    pub arr_city: String,

    /// Outbound date as sent to the backend (`YYYY-MM-DD`)
    #[serde(rename = "DepDate1")]
    pub dep_date: String,

    /// Return date as sent to the backend (`YYYY-MM-DD`)
    #[serde(rename = "DepDate2")]
    pub return_date: String,

    /// Human readable label, used for file names and logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Unrecognised keys carried through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FlightQuery {
    pub fn new(
        dep_city: impl Into<String>,
        arr_city: impl Into<String>,
        dep_date: impl Into<String>,
        return_date: impl Into<String>,
    ) -> Self {
        Self {
            dep_city: dep_city.into(),
            arr_city: arr_city.into(),
            dep_date: dep_date.into(),
            return_date: return_date.into(),
            name: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Label used in logs and output file names
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!(
                "{}_{}_{}_{}",
                self.dep_city, self.arr_city, self.dep_date, self.return_date
            ),
        }
    }
}

impl fmt::Display for FlightQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{} {} / {}",
            self.dep_city, self.arr_city, self.dep_date, self.return_date
        )
    }
}
