//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the OfferSink trait.

use crate::model::{FlightOffer, FlightSegment};
use crate::scheduler::TaskReport;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{OfferSink, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus};
use crate::state::TaskState;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite offer sink
pub struct SqliteSink {
    conn: Connection,
    run_id: Option<i64>,
}

impl SqliteSink {
    /// Creates a new SqliteSink instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteSink)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn, run_id: None })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn, run_id: None })
    }

    #[cfg(test)]
    fn run_id(&self) -> Option<i64> {
        self.run_id
    }

    /// Creates a new run and makes it current
    pub fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.run_id = Some(id);
        Ok(id)
    }

    /// Gets a run by ID
    pub fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    /// Gets the most recent run
    pub fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    /// Counts stored offers, optionally for one run
    pub fn count_offers(&self, run_id: Option<i64>) -> StorageResult<u64> {
        let count: i64 = match run_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM offers WHERE run_id = ?1",
                params![id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM offers", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }

    /// Counts the task outcomes a run recorded in a given state
    pub fn count_tasks_by_state(&self, run_id: i64, state: TaskState) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM task_results WHERE run_id = ?1 AND state = ?2",
            params![run_id, state.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Loads every offer stored for a task name, oldest first
    pub fn load_offers(&self, task_name: &str) -> StorageResult<Vec<FlightOffer>> {
        let mut stmt = self.conn.prepare(
            "SELECT departure_date, return_date, price, tax, cabin_class, search_key,
             selection_id, outbound_segments, inbound_segments
             FROM offers WHERE task_name = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![task_name], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut offers = Vec::with_capacity(rows.len());
        for (dep, ret, price, tax, cabin_class, search_key, selection_id, out, inb) in rows {
            offers.push(FlightOffer {
                departure_date: parse_date(dep.as_deref()),
                return_date: parse_date(ret.as_deref()),
                price,
                tax,
                outbound_segments: serde_json::from_str::<Vec<FlightSegment>>(&out)?,
                inbound_segments: serde_json::from_str::<Vec<FlightSegment>>(&inb)?,
                search_key,
                selection_id,
                cabin_class,
            });
        }
        Ok(offers)
    }
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Running),
    })
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

fn parse_date(text: Option<&str>) -> Option<NaiveDate> {
    text.and_then(|t| NaiveDate::parse_from_str(t, DATE_FORMAT).ok())
}

impl OfferSink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn save_offers(&mut self, offers: &[FlightOffer], name: &str) -> StorageResult<usize> {
        let crawl_time = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO offers (run_id, task_name, crawl_time, departure_date, return_date,
                 price, tax, cabin_class, search_key, selection_id, outbound_segments, inbound_segments)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for offer in offers {
                stmt.execute(params![
                    self.run_id,
                    name,
                    crawl_time,
                    format_date(offer.departure_date),
                    format_date(offer.return_date),
                    offer.price,
                    offer.tax,
                    offer.cabin_class,
                    offer.search_key,
                    offer.selection_id,
                    serde_json::to_string(&offer.outbound_segments)?,
                    serde_json::to_string(&offer.inbound_segments)?,
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!("Stored {} offers for '{}'", offers.len(), name);
        Ok(offers.len())
    }

    fn record_task(&mut self, report: &TaskReport) -> StorageResult<()> {
        let (error_kind, error_message) = match &report.last_error {
            Some(failure) => (Some(failure.kind.as_str()), Some(failure.message.as_str())),
            None => (None, None),
        };

        self.conn.execute(
            "INSERT INTO task_results (run_id, task_id, dep_city, arr_city, dep_date, return_date,
             state, retry_count, offer_count, started_at, ended_at, elapsed_seconds,
             error_kind, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                self.run_id,
                report.task_id.as_str(),
                report.query.dep_city,
                report.query.arr_city,
                report.query.dep_date,
                report.query.return_date,
                report.state.to_db_string(),
                report.retry_count,
                report.offer_count as i64,
                report.original_started_at.map(|t| t.to_rfc3339()),
                report.ended_at.map(|t| t.to_rfc3339()),
                report.elapsed_seconds,
                error_kind,
                error_message,
            ],
        )?;
        Ok(())
    }

    fn begin_run(&mut self, config_hash: &str) -> StorageResult<()> {
        let id = self.create_run(config_hash)?;
        tracing::info!("Started run {}", id);
        Ok(())
    }

    fn finish_run(&mut self, status: RunStatus) -> StorageResult<()> {
        let run_id = self.run_id.ok_or(StorageError::NoActiveRun)?;
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        tracing::info!("Run {} finished: {}", run_id, status.to_db_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FlightQuery, TaskId};
    use crate::state::CrawlTask;
    use crate::ErrorKind;

    fn create_test_offer(price: f64) -> FlightOffer {
        FlightOffer {
            departure_date: NaiveDate::from_ymd_opt(2025, 7, 21),
            return_date: NaiveDate::from_ymd_opt(2025, 7, 27),
            price,
            tax: 500.0,
            outbound_segments: vec![FlightSegment::new("BR225", "經濟艙Y")],
            inbound_segments: vec![FlightSegment::new("BR226", "經濟艙Y")],
            search_key: "KEY".to_string(),
            selection_id: Some("42".to_string()),
            cabin_class: "2".to_string(),
        }
    }

    #[test]
    fn test_create_in_memory() {
        let sink = SqliteSink::new_in_memory();
        assert!(sink.is_ok());
    }

    #[test]
    fn test_run_lifecycle() {
        let mut sink = SqliteSink::new_in_memory().unwrap();
        assert!(matches!(
            sink.finish_run(RunStatus::Completed),
            Err(StorageError::NoActiveRun)
        ));

        sink.begin_run("abc123").unwrap();
        let run_id = sink.run_id().unwrap();
        assert_eq!(sink.get_run(run_id).unwrap().status, RunStatus::Running);

        sink.finish_run(RunStatus::TimedOut).unwrap();
        let run = sink.get_latest_run().unwrap().unwrap();
        assert_eq!(run.id, run_id);
        assert_eq!(run.config_hash, "abc123");
        assert_eq!(run.status, RunStatus::TimedOut);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_get_missing_run() {
        let sink = SqliteSink::new_in_memory().unwrap();
        assert!(matches!(sink.get_run(7), Err(StorageError::RunNotFound(7))));
    }

    #[test]
    fn test_save_and_load_offers() {
        let mut sink = SqliteSink::new_in_memory().unwrap();
        sink.begin_run("hash").unwrap();

        let saved = sink
            .save_offers(&[create_test_offer(10000.0), create_test_offer(12000.0)], "TPE_SIN")
            .unwrap();
        assert_eq!(saved, 2);
        assert_eq!(sink.count_offers(sink.run_id()).unwrap(), 2);
        assert_eq!(sink.count_offers(Some(999)).unwrap(), 0);

        let loaded = sink.load_offers("TPE_SIN").unwrap();
        assert_eq!(loaded, vec![create_test_offer(10000.0), create_test_offer(12000.0)]);
        assert!(sink.load_offers("other").unwrap().is_empty());
    }

    #[test]
    fn test_record_task() {
        let mut sink = SqliteSink::new_in_memory().unwrap();
        sink.begin_run("hash").unwrap();
        let run_id = sink.run_id().unwrap();
        let now = Utc::now();

        let mut task = CrawlTask::new(
            TaskId::from("t-1"),
            FlightQuery::new("TPE", "SIN", "2025-07-21", "2025-07-27"),
        );
        task.start(now).unwrap();
        task.fail(ErrorKind::HttpStatus, "HTTP 500", now).unwrap();

        sink.record_task(&TaskReport::from_task(&task)).unwrap();

        assert_eq!(sink.count_tasks_by_state(run_id, TaskState::Failed).unwrap(), 1);
        assert_eq!(sink.count_tasks_by_state(run_id, TaskState::Completed).unwrap(), 0);
        assert_eq!(sink.count_tasks_by_state(run_id + 1, TaskState::Failed).unwrap(), 0);
        let kind: String = sink
            .conn
            .query_row("SELECT error_kind FROM task_results", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kind, "http-status");
    }
}
