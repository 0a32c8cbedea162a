//! In-process sink
//!
//! Keeps records and artifacts in memory. Useful when embedding the
//! harvester in another program that post-processes the output itself.

use crate::sink::traits::{Sink, SinkError, SinkResult};
use crate::sink::{validate_artifact_key, Artifact, Record};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryInner {
    records: Vec<Record>,
    artifacts: BTreeMap<String, Artifact>,
}

/// Sink that holds everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: Mutex<MemoryInner>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every record pushed so far, in push order
    pub fn records(&self) -> Vec<Record> {
        self.lock().records.clone()
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    pub fn artifact(&self, key: &str) -> Option<Artifact> {
        self.lock().artifacts.get(key).cloned()
    }

    /// Keys of every stored artifact, sorted
    pub fn artifact_keys(&self) -> Vec<String> {
        self.lock().artifacts.keys().cloned().collect()
    }

    pub fn artifact_count(&self) -> usize {
        self.lock().artifacts.len()
    }
}

impl Sink for MemorySink {
    fn push_records(&self, records: &[Record]) -> SinkResult<()> {
        self.lock().records.extend_from_slice(records);
        Ok(())
    }

    fn put_artifact(&self, key: &str, bytes: &[u8], content_type: &str) -> SinkResult<()> {
        validate_artifact_key(key)?;

        let mut inner = self.lock();
        if inner.artifacts.contains_key(key) {
            return Err(SinkError::DuplicateKey(key.to_string()));
        }

        inner.artifacts.insert(
            key.to_string(),
            Artifact {
                key: key.to_string(),
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}
