//! Turning configuration entries into concrete queries

use crate::config::{Config, FixedMonthEntry, TaskEntry};
use crate::query::FlightQuery;
use crate::SweepError;
use chrono::{Datelike, NaiveDate};
use std::path::Path;

/// Builds every query the configuration describes
///
/// Explicit `[[tasks]]` come first, followed by the `[[fixed-month-tasks]]`
/// resolved against `today`.
pub fn queries_from_config(config: &Config, today: NaiveDate) -> Vec<FlightQuery> {
    let mut queries: Vec<FlightQuery> = config.tasks.iter().map(explicit_query).collect();

    for entry in &config.fixed_month_tasks {
        match fixed_month_query(entry, today) {
            Some(query) => queries.push(query),
            None => tracing::warn!(
                "Skipping fixed-month task {}->{}: could not resolve a date",
                entry.dep_city,
                entry.arr_city
            ),
        }
    }

    queries
}

fn explicit_query(entry: &TaskEntry) -> FlightQuery {
    let query = FlightQuery::new(
        &entry.dep_city,
        &entry.arr_city,
        &entry.dep_date,
        &entry.return_date,
    );
    match &entry.name {
        Some(name) => query.with_name(name),
        None => query,
    }
}

/// Resolves a relative-month entry into a concrete query
///
/// The target month is `month_offset` months after the month of `today`,
/// rolling over into following years. Days past the end of the target month
/// are clamped to its last day.
pub fn fixed_month_query(entry: &FixedMonthEntry, today: NaiveDate) -> Option<FlightQuery> {
    let months = today.year() * 12 + today.month0() as i32 + entry.month_offset as i32;
    let year = months.div_euclid(12);
    let month = months.rem_euclid(12) as u32 + 1;
    let last_day = days_in_month(year, month)?;

    let dep = NaiveDate::from_ymd_opt(year, month, entry.dep_day.clamp(1, last_day))?;
    let ret = NaiveDate::from_ymd_opt(year, month, entry.return_day.clamp(1, last_day))?;

    let dep_date = dep.format("%Y-%m-%d").to_string();
    let return_date = ret.format("%Y-%m-%d").to_string();
    let name = format!(
        "{}→{} {} / {}",
        entry.dep_city, entry.arr_city, dep_date, return_date
    );

    Some(FlightQuery::new(&entry.dep_city, &entry.arr_city, dep_date, return_date).with_name(name))
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(next.signed_duration_since(first).num_days() as u32)
}

/// Reads a JSON array of queries from a task file
pub fn load_task_file(path: &Path) -> Result<Vec<FlightQuery>, SweepError> {
    let content = std::fs::read_to_string(path)?;
    let queries: Vec<FlightQuery> = serde_json::from_str(&content)?;
    Ok(queries)
}
