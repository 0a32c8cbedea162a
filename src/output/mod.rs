//! Output module for run summaries and reports
//!
//! This module handles:
//! - The summary returned by every harvest run
//! - Statistics read back from the sink database
//! - Exporting stored records as JSON Lines

pub mod export;
pub mod stats;

pub use export::{export_jsonl, write_jsonl};
pub use stats::{load_statistics, print_statistics, print_summary, HarvestStatistics, RunSummary};
