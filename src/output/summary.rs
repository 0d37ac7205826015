//! Batch summaries for the terminal and for report files

use crate::scheduler::{BatchReport, TaskReport};
use crate::state::TaskState;
use crate::SweepError;
use std::collections::BTreeMap;
use std::path::Path;

/// Counts of tasks per state, keyed by state name
pub fn state_breakdown(report: &BatchReport) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for state in TaskState::all_states() {
        let count = report.tasks.iter().filter(|t| t.state == state).count();
        if count > 0 {
            counts.insert(state.to_db_string().to_string(), count);
        }
    }
    counts
}

/// Prints a batch report to stdout in a formatted manner
///
/// # Arguments
///
/// * `report` - The report returned by `submit_batch`
pub fn print_batch_summary(report: &BatchReport) {
    println!("=== Batch {} ===\n", report.batch_id);

    println!("Overview:");
    println!("  Tasks: {}", report.total_tasks);
    println!("  Finished: {}", report.completed_tasks);
    println!("  Succeeded: {}", report.succeeded_tasks);
    println!("  Failed: {}", report.failed_tasks);
    println!("  Offers collected: {}", report.total_offers());
    println!("  Elapsed: {:.1}s", report.elapsed_seconds);
    if report.timed_out {
        println!("  Timed out: yes");
    }
    println!();

    println!("Tasks by State:");
    for (state, count) in state_breakdown(report) {
        println!("  {}: {}", state, count);
    }
    println!();

    let failed: Vec<&TaskReport> = report
        .tasks
        .iter()
        .filter(|t| t.state == TaskState::Failed)
        .collect();
    if !failed.is_empty() {
        println!("Failures ({}):", failed.len());
        for task in failed {
            let reason = task
                .last_error
                .as_ref()
                .map(|e| format!("[{}] {}", e.kind, e.message))
                .unwrap_or_else(|| "unknown error".to_string());
            println!(
                "  - {} ({} retries): {}",
                task.query, task.retry_count, reason
            );
        }
        println!();
    }

    let success_rate = if report.total_tasks > 0 {
        (report.succeeded_tasks as f64 / report.total_tasks as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "Success Rate: {:.1}% ({} / {} tasks completed)",
        success_rate, report.succeeded_tasks, report.total_tasks
    );
}

/// Writes a batch report as pretty JSON
pub fn write_report(report: &BatchReport, path: &Path) -> Result<(), SweepError> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}
