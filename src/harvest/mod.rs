//! Harvest module for page fetching, extraction and orchestration
//!
//! This module contains the core harvesting logic, including:
//! - The deduplicated frontier of labelled pages
//! - HTTP fetching with bounded retries
//! - Selector-driven record and link extraction
//! - The worker pool that drives a run to a terminal state

mod extractor;
mod fetcher;
mod frontier;
mod orchestrator;

pub use extractor::{parse_number, ExtractError, Extraction, Extractor};
pub use fetcher::{build_headers, build_http_client, FetchResult, Fetcher, RetryPolicy};
pub use frontier::{EnqueueOutcome, Frontier, FrontierEntry};
pub use orchestrator::Harvester;
