//! Sink module for persisting harvest output
//!
//! This module handles everything the pipeline writes, including:
//! - Structured records (append-only, at-least-once)
//! - Binary artifacts addressed by generated keys
//! - SQLite persistence with run bookkeeping
//! - An in-memory sink for embedding and tests

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemorySink;
pub use sqlite::{RunRecord, SqliteSink};
pub use traits::{Sink, SinkError, SinkResult};

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A single extracted value
///
/// Missing values are represented as `Null` rather than a sentinel string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Converts a JSON value read back from storage
    ///
    /// Anything that is not a string or a number maps to `Null`.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::Text(s.clone()),
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Null, Self::Number),
            _ => Self::Null,
        }
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Null, Self::Text)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Null => write!(f, "null"),
        }
    }
}

/// One structured output item of a harvest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// The page this record was extracted from
    pub source_url: String,

    /// Field name to value; every configured field is present
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a field, builder style
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Number of fields, including null ones
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A binary blob stored outside the record stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Derives a short, stable request id for a source URL
///
/// Used to namespace artifact keys per page without embedding the URL itself.
pub fn request_id(source_url: &str) -> String {
    let digest = Sha256::digest(source_url.as_bytes());
    hex::encode(&digest[..6])
}

/// Builds an artifact key from its sequence index, request id and extension
///
/// # Examples
///
/// ```
/// use harvest_ripple::sink::artifact_key;
///
/// assert_eq!(artifact_key(3, "a1b2c3", "png"), "image_3_a1b2c3.png");
/// ```
pub fn artifact_key(index: usize, request_id: &str, extension: &str) -> String {
    format!("image_{}_{}.{}", index, request_id, extension)
}

/// Derives a file extension from a Content-Type header value
///
/// `image/svg+xml; charset=utf-8` becomes `svgxml`; unknown or empty types
/// fall back to `bin`.
pub fn extension_for_content_type(content_type: &str) -> String {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    let subtype = essence.rsplit('/').next().unwrap_or("");
    let ext: String = subtype
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    match ext.as_str() {
        "" => "bin".to_string(),
        "jpeg" => "jpg".to_string(),
        _ => ext,
    }
}

/// Checks that an artifact key is a flat, non-empty ASCII name
pub fn validate_artifact_key(key: &str) -> SinkResult<()> {
    if key.is_empty()
        || !key.is_ascii()
        || key.contains('/')
        || key.contains('\\')
        || key.chars().any(|c| c.is_ascii_control())
    {
        return Err(SinkError::InvalidKey(key.to_string()));
    }
    Ok(())
}
