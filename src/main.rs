//! Fare-Sweep main entry point
//!
//! This is the command-line interface for the Fare-Sweep airfare collector.

use anyhow::Context;
use clap::Parser;
use fare_sweep::config::{load_config_with_hash, Config};
use fare_sweep::crawler::FlightCrawler;
use fare_sweep::output::{print_batch_summary, write_report};
use fare_sweep::query::{load_task_file, queries_from_config};
use fare_sweep::storage::{open_sinks, OfferSink, RunStatus, SqliteSink};
use fare_sweep::{FlightQuery, TaskManager, TaskState};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::EnvFilter;

/// Fare-Sweep: a round-trip airfare collector
///
/// Fare-Sweep queries a travel-booking site's search backend for every
/// configured route and date pair, combines outbound and inbound flights
/// into complete offers and stores them in SQLite (and optionally as JSON
/// files).
#[derive(Parser, Debug)]
#[command(name = "fare-sweep")]
#[command(version = "1.0.0")]
#[command(about = "A round-trip airfare collector", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// JSON file with additional queries (DepCity1/ArrCity1/DepDate1/DepDate2)
    #[arg(long, value_name = "FILE")]
    tasks: Option<PathBuf>,

    /// Validate config and show the generated queries without searching
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show the latest run from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// With --stats, show this run instead of the latest
    #[arg(long, value_name = "ID", requires = "stats")]
    run: Option<i64>,

    /// Write the batch report as JSON to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.stats {
        return handle_stats(&config, cli.run);
    }

    let queries = collect_queries(&config, cli.tasks.as_deref())?;

    if cli.dry_run {
        handle_dry_run(&config, &queries);
        return Ok(());
    }

    handle_collect(config, &config_hash, queries, cli.report.as_deref()).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("fare_sweep=info,warn"),
            1 => EnvFilter::new("fare_sweep=debug,info"),
            2 => EnvFilter::new("fare_sweep=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Config queries (explicit and fixed-month) followed by the task file's
fn collect_queries(config: &Config, tasks: Option<&Path>) -> anyhow::Result<Vec<FlightQuery>> {
    let today = chrono::Local::now().date_naive();
    let mut queries = queries_from_config(config, today);

    if let Some(path) = tasks {
        let extra = load_task_file(path)
            .with_context(|| format!("Failed to load task file {}", path.display()))?;
        tracing::info!("Loaded {} queries from {}", extra.len(), path.display());
        queries.extend(extra);
    }

    Ok(queries)
}

/// Handles the --dry-run mode: shows the resolved configuration and queries
fn handle_dry_run(config: &Config, queries: &[FlightQuery]) {
    println!("=== Fare-Sweep Dry Run ===\n");

    println!("Scheduler:");
    println!("  Max concurrent tasks: {}", config.scheduler.max_concurrent_tasks);
    println!("  Task timeout: {} min", config.scheduler.task_timeout_minutes);

    println!("\nRetry:");
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!(
        "  Backoff: {}s x {}^n",
        config.retry.interval_seconds, config.retry.backoff_factor
    );
    let retryable: Vec<&str> = config.retry.retryable_errors.iter().map(|k| k.as_str()).collect();
    println!("  Retryable errors: {}", retryable.join(", "));

    println!("\nSearch:");
    println!("  Backend: {}", config.api.base_url);
    println!("  Cabin classes: {}", config.crawler.cabin_classes.join(", "));
    println!("  Crawl delay: {}s", config.crawler.crawl_delay_seconds);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    if let Some(dir) = &config.output.json_dir {
        println!("  JSON directory: {}", dir);
    }

    println!("\nQueries ({}):", queries.len());
    for query in queries {
        println!("  - {}", query);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows one run (the latest by default)
fn handle_stats(config: &Config, run_id: Option<i64>) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let sink = SqliteSink::new(Path::new(&config.output.database_path))
        .context("Failed to open database")?;

    let run = match run_id {
        Some(id) => Some(sink.get_run(id)?),
        None => sink.get_latest_run()?,
    };

    match run {
        Some(run) => {
            println!("Run: {}", run.id);
            println!("  Started: {}", run.started_at);
            println!("  Finished: {}", run.finished_at.as_deref().unwrap_or("-"));
            println!("  Status: {}", run.status.to_db_string());
            println!("  Config hash: {}", run.config_hash);
            println!("  Offers: {}", sink.count_offers(Some(run.id))?);
            println!("  Tasks:");
            for state in TaskState::all_states() {
                let count = sink.count_tasks_by_state(run.id, state)?;
                if count > 0 {
                    println!("    {}: {}", state, count);
                }
            }
        }
        None => println!("No runs recorded yet"),
    }
    println!("Offers stored overall: {}", sink.count_offers(None)?);

    Ok(())
}

/// Runs the batch and persists the results
async fn handle_collect(
    config: Config,
    config_hash: &str,
    queries: Vec<FlightQuery>,
    report_path: Option<&Path>,
) -> anyhow::Result<()> {
    if queries.is_empty() {
        tracing::warn!("No queries configured, nothing to do");
        return Ok(());
    }

    let mut sinks = open_sinks(&config.output).context("Failed to open output sinks")?;
    if let Err(e) = sinks.begin_run(config_hash) {
        tracing::error!("Failed to record run start: {}", e);
    }
    let sinks = Arc::new(Mutex::new(sinks));

    let crawler = FlightCrawler::new(&config).with_sink(sinks.clone());
    let manager = TaskManager::new(&config.scheduler, &config.retry, Arc::new(crawler));

    let report = manager.submit_batch(queries).await?;

    {
        let mut sinks = sinks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in &report.tasks {
            if let Err(e) = sinks.record_task(task) {
                tracing::error!("Failed to record task {}: {}", task.task_id, e);
            }
        }
        let status = if report.timed_out {
            RunStatus::TimedOut
        } else {
            RunStatus::Completed
        };
        if let Err(e) = sinks.finish_run(status) {
            tracing::error!("Failed to record run end: {}", e);
        }
    }

    print_batch_summary(&report);

    if let Some(path) = report_path {
        write_report(&report, path)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
    }

    Ok(())
}
