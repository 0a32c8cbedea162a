//! Sink traits and error types
//!
//! This module defines the trait interface for sink backends and
//! associated error types.

use crate::sink::Record;
use thiserror::Error;

/// Errors that can occur during sink operations
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid artifact key: {0:?}")]
    InvalidKey(String),

    #[error("Artifact already stored: {0}")]
    DuplicateKey(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Trait for sink backend implementations
///
/// Workers call both methods concurrently, so implementations must
/// serialize access to their underlying store internally.
pub trait Sink: Send + Sync {
    /// Appends records to durable storage
    ///
    /// Delivery is at-least-once: a retried push may store duplicates,
    /// which are tolerated rather than deduplicated.
    fn push_records(&self, records: &[Record]) -> SinkResult<()>;

    /// Stores a binary artifact under a flat key
    ///
    /// Keys must be non-empty ASCII without path separators and may be
    /// stored only once. Callers are responsible for key generation.
    fn put_artifact(&self, key: &str, bytes: &[u8], content_type: &str) -> SinkResult<()>;
}
