//! Frontier of pages waiting to be harvested
//!
//! This module handles:
//! - Breadth-first (FIFO) ordering of labelled pages
//! - All-time deduplication on the exact URL string
//! - Depth limiting and rejection of malformed URLs
//! - In-flight accounting so concurrent workers can detect a drained frontier

use crate::state::PageLabel;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

/// A page waiting to be visited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Absolute http(s) URL
    pub url: String,

    /// How the page's content is interpreted
    pub label: PageLabel,

    /// Link distance from the seed (seeds are depth 0)
    pub depth: u32,
}

impl FrontierEntry {
    pub fn new(url: impl Into<String>, label: PageLabel, depth: u32) -> Self {
        Self {
            url: url.into(),
            label,
            depth,
        }
    }
}

/// What `Frontier::enqueue` did with a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Added to the back of the queue
    Queued,

    /// Already enqueued at some point during this run
    Duplicate,

    /// Deeper than the configured maximum depth
    TooDeep,

    /// Not an absolute http(s) URL
    Malformed,
}

impl EnqueueOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued)
    }
}

#[derive(Debug, Default)]
struct FrontierInner {
    queue: VecDeque<FrontierEntry>,
    seen: HashSet<String>,
    in_flight: usize,
    malformed: u64,
}

/// Thread-safe, deduplicated FIFO of pages
///
/// All state lives behind one mutex. The lock is only held for the duration
/// of a single call and never across an await point.
#[derive(Debug)]
pub struct Frontier {
    inner: Mutex<FrontierInner>,
    max_depth: u32,
}

impl Frontier {
    /// Creates an empty frontier
    ///
    /// # Arguments
    ///
    /// * `max_depth` - Entries deeper than this are refused
    pub fn new(max_depth: u32) -> Self {
        Self {
            inner: Mutex::new(FrontierInner::default()),
            max_depth,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontierInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a page to the back of the queue
    ///
    /// Deduplication is on the exact URL string and lasts for the lifetime of
    /// the frontier: a URL that was already dequeued is still a duplicate.
    /// Refused entries (too deep or malformed) are not remembered.
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute http(s) URL
    /// * `label` - Page label for the extractor
    /// * `depth` - Link distance from the seed
    ///
    /// # Returns
    ///
    /// What happened to the URL
    pub fn enqueue(&self, url: &str, label: PageLabel, depth: u32) -> EnqueueOutcome {
        if !is_absolute_http(url) {
            self.lock().malformed += 1;
            return EnqueueOutcome::Malformed;
        }

        if depth > self.max_depth {
            return EnqueueOutcome::TooDeep;
        }

        let mut inner = self.lock();
        if !inner.seen.insert(url.to_string()) {
            return EnqueueOutcome::Duplicate;
        }

        inner.queue.push_back(FrontierEntry::new(url, label, depth));
        EnqueueOutcome::Queued
    }

    /// Adds a prepared entry; see [`Frontier::enqueue`]
    pub fn enqueue_entry(&self, entry: FrontierEntry) -> EnqueueOutcome {
        self.enqueue(&entry.url, entry.label, entry.depth)
    }

    /// Removes the oldest entry and marks it in flight
    ///
    /// Every entry handed out must be finished with [`Frontier::complete`].
    pub fn dequeue(&self) -> Option<FrontierEntry> {
        let mut inner = self.lock();
        let entry = inner.queue.pop_front()?;
        inner.in_flight += 1;
        Some(entry)
    }

    /// Marks one dispatched entry as finished
    ///
    /// Workers enqueue discovered links before calling this, so the frontier
    /// can never look drained while a page still has links to contribute.
    pub fn complete(&self) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }

    /// Number of entries waiting
    pub fn size(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of dequeued entries not yet completed
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// True when nothing is waiting and nothing is in flight
    pub fn is_drained(&self) -> bool {
        let inner = self.lock();
        inner.queue.is_empty() && inner.in_flight == 0
    }

    /// Number of URLs refused as malformed
    pub fn malformed_count(&self) -> u64 {
        self.lock().malformed
    }
}

fn is_absolute_http(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            (parsed.scheme() == "http" || parsed.scheme() == "https")
                && parsed.host_str().map_or(false, |h| !h.is_empty())
        }
        Err(_) => false,
    }
}
