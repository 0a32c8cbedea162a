//! State module for labels and lifecycle enums shared across the pipeline
//!
//! # Components
//!
//! - `PageLabel`: Distinguishes listing index pages from detail pages
//! - `FetchStatus`: Classifies the outcome of a fetch attempt sequence
//! - `RunState`: Tracks the orchestrator's lifecycle (running and terminal states)

mod page_label;
mod run_state;

// Re-export main types
pub use page_label::PageLabel;
pub use run_state::{FetchStatus, RunState};
