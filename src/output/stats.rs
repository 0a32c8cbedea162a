//! Run summaries and database statistics
//!
//! This module provides the summary returned by every harvest run and the
//! statistics report read back from the sink database.

use crate::sink::{RunRecord, SqliteSink};
use crate::state::RunState;
use crate::HarvestError;
use std::time::Duration;

/// Outcome of one harvest run
///
/// Returned for every terminal state; failures along the way show up as
/// counters rather than errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Terminal state of the run
    pub state: RunState,

    /// Pages dispatched to a fetch (the quantity bounded by `max-pages`)
    pub pages_fetched: u64,

    /// Pages whose fetch failed after all retries
    pub pages_failed: u64,

    /// Pages fetched successfully but whose content could not be extracted
    pub pages_skipped: u64,

    pub records_pushed: u64,

    pub artifacts_stored: u64,

    /// Image downloads or artifact writes that failed
    pub artifacts_failed: u64,

    /// Failed sink calls, consecutive or not
    pub sink_errors: u64,

    /// Discovered URLs dropped as malformed
    pub urls_rejected: u64,

    pub elapsed: Duration,
}

impl RunSummary {
    /// Pages fetched and extracted without error
    pub fn pages_succeeded(&self) -> u64 {
        self.pages_fetched
            .saturating_sub(self.pages_failed)
            .saturating_sub(self.pages_skipped)
    }
}

/// Prints a run summary to stdout
pub fn print_summary(summary: &RunSummary) {
    println!("=== Harvest Summary ===\n");

    println!("Final state: {}", summary.state);
    println!("Elapsed: {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    println!("Pages:");
    println!("  Fetched: {}", summary.pages_fetched);
    println!("  Succeeded: {}", summary.pages_succeeded());
    println!("  Failed: {}", summary.pages_failed);
    println!("  Skipped: {}", summary.pages_skipped);
    println!();

    println!("Output:");
    println!("  Records pushed: {}", summary.records_pushed);
    println!("  Artifacts stored: {}", summary.artifacts_stored);
    if summary.artifacts_failed > 0 {
        println!("  Artifacts failed: {}", summary.artifacts_failed);
    }
    if summary.sink_errors > 0 {
        println!("  Sink errors: {}", summary.sink_errors);
    }
    if summary.urls_rejected > 0 {
        println!("  Malformed URLs dropped: {}", summary.urls_rejected);
    }
}

/// Contents of a sink database
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    pub total_records: u64,

    /// Distinct pages that produced at least one record
    pub distinct_sources: u64,

    pub total_artifacts: u64,

    /// Most recent runs first
    pub recent_runs: Vec<RunRecord>,
}

/// Loads statistics from the sink database
///
/// # Arguments
///
/// * `sink` - The SQLite sink to query
/// * `run_limit` - How many recent runs to include
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(
    sink: &SqliteSink,
    run_limit: usize,
) -> Result<HarvestStatistics, HarvestError> {
    Ok(HarvestStatistics {
        total_records: sink.count_records()?,
        distinct_sources: sink.count_distinct_sources()?,
        total_artifacts: sink.count_artifacts()?,
        recent_runs: sink.recent_runs(run_limit)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Records stored: {}", stats.total_records);
    println!("  Source pages: {}", stats.distinct_sources);
    println!("  Artifacts stored: {}", stats.total_artifacts);
    println!();

    if stats.recent_runs.is_empty() {
        println!("No runs recorded.");
        return;
    }

    println!("Recent Runs:");
    for run in &stats.recent_runs {
        println!(
            "  #{} {} [{}] pages={} records={} artifacts={}",
            run.id,
            run.started_at,
            run.state,
            run.pages_fetched,
            run.records_pushed,
            run.artifacts_stored
        );
    }
}
