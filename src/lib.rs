//! Harvest-Ripple: a page-by-page web harvesting pipeline
//!
//! This crate walks a frontier of labelled pages (listing indexes and detail
//! pages), fetches each one with bounded retries, extracts structured records
//! through configurable CSS selector rules, and stores records and binary
//! artifacts in a sink.

pub mod config;
pub mod harvest;
pub mod output;
pub mod sink;
pub mod state;
pub mod url;

use thiserror::Error;

/// Main error type for Harvest-Ripple operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Sink error: {0}")]
    Sink(#[from] sink::SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Harvest-Ripple operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use harvest::{Extractor, FetchResult, Fetcher, Frontier, FrontierEntry, Harvester};
pub use output::RunSummary;
pub use sink::{Artifact, FieldValue, MemorySink, Record, Sink, SqliteSink};
pub use state::{FetchStatus, PageLabel, RunState};
