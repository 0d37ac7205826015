//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Fare-Sweep
//! database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track collection runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Final state of every task in a run
CREATE TABLE IF NOT EXISTS task_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER REFERENCES runs(id),
    task_id TEXT NOT NULL,
    dep_city TEXT NOT NULL,
    arr_city TEXT NOT NULL,
    dep_date TEXT NOT NULL,
    return_date TEXT NOT NULL,
    state TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    offer_count INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    ended_at TEXT,
    elapsed_seconds REAL,
    error_kind TEXT,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_task_results_run ON task_results(run_id);
CREATE INDEX IF NOT EXISTS idx_task_results_task ON task_results(task_id);

-- Complete round-trip offers; segments are JSON arrays
CREATE TABLE IF NOT EXISTS offers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER REFERENCES runs(id),
    task_name TEXT NOT NULL,
    crawl_time TEXT NOT NULL,
    departure_date TEXT,
    return_date TEXT,
    price REAL NOT NULL,
    tax REAL NOT NULL,
    cabin_class TEXT NOT NULL,
    search_key TEXT NOT NULL,
    selection_id TEXT,
    outbound_segments TEXT NOT NULL,
    inbound_segments TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_offers_run ON offers(run_id);
CREATE INDEX IF NOT EXISTS idx_offers_dates ON offers(departure_date, return_date);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
