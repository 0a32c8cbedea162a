//! Harvest orchestration - the worker pool driving a run
//!
//! This module contains the main harvest loop, including:
//! - Seeding the frontier with labelled seed URLs
//! - Running a bounded pool of fetch-extract-push workers
//! - Enforcing the page and record budgets
//! - Downloading image artifacts
//! - Detecting the terminal state (drained, budget exceeded, aborted)

use crate::config::{validate, Config};
use crate::harvest::{Extractor, Fetcher, Frontier, FrontierEntry};
use crate::output::RunSummary;
use crate::sink::{
    artifact_key, extension_for_content_type, request_id, FieldValue, Record, Sink, SinkError,
    SinkResult,
};
use crate::state::{PageLabel, RunState};
use crate::url::normalize_url;
use crate::HarvestError;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// How long an idle worker waits before re-checking the frontier
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Pages between two progress log lines
const PROGRESS_INTERVAL: u64 = 10;

/// Run-wide limits copied out of the configuration
#[derive(Debug, Clone)]
struct Limits {
    max_pages: u64,
    max_records: u64,
    sink_failure_threshold: u32,
    request_delay: Duration,
    emit_image_records: bool,
}

#[derive(Debug, Default)]
struct Counters {
    pages_failed: AtomicU64,
    pages_skipped: AtomicU64,
    artifacts_stored: AtomicU64,
    artifacts_failed: AtomicU64,
    sink_errors: AtomicU64,
    links_rejected: AtomicU64,
}

/// What a worker got when asking for work
enum Dispatch {
    Page(FrontierEntry),
    Idle,
    Stop,
}

/// State shared by the workers of one run
struct RunShared {
    frontier: Frontier,
    extractor: Arc<Extractor>,
    sink: Arc<dyn Sink>,
    limits: Limits,

    /// Pages handed to a worker; guarded together with the dequeue
    dispatched: Mutex<u64>,

    /// Records pushed or currently being pushed
    records_reserved: AtomicU64,

    consecutive_sink_failures: AtomicU32,
    budget_hit: AtomicBool,
    sink_abort: AtomicBool,
    counters: Counters,

    /// The caller's token; cancelling it aborts the run
    cancel: CancellationToken,

    /// Stops dispatch; a child of `cancel`, also cancelled on budget, sink abort and drain
    stop: CancellationToken,

    /// Wakes idle workers when new entries arrive or a page completes
    wake: Notify,
}

impl RunShared {
    /// Dequeues the next page, enforcing the page budget
    ///
    /// The budget check, the dequeue and the count update happen under one
    /// lock so concurrent workers can never overshoot `max_pages`.
    fn next_page(&self) -> Dispatch {
        if self.stop.is_cancelled() {
            return Dispatch::Stop;
        }

        let mut dispatched = self.dispatched.lock().unwrap_or_else(PoisonError::into_inner);
        if *dispatched >= self.limits.max_pages {
            self.hit_budget("page");
            return Dispatch::Stop;
        }

        let Some(entry) = self.frontier.dequeue() else {
            return Dispatch::Idle;
        };

        *dispatched += 1;
        if *dispatched >= self.limits.max_pages {
            self.hit_budget("page");
        }

        if *dispatched % PROGRESS_INTERVAL == 0 {
            tracing::info!(
                "Progress: {} pages dispatched, {} in frontier, {} records",
                *dispatched,
                self.frontier.size(),
                self.records_reserved.load(Ordering::SeqCst)
            );
        }

        Dispatch::Page(entry)
    }

    /// True once the caller cancelled or the sink failed too often
    fn is_aborting(&self) -> bool {
        self.cancel.is_cancelled() || self.sink_abort.load(Ordering::SeqCst)
    }

    fn hit_budget(&self, which: &str) {
        if !self.budget_hit.swap(true, Ordering::SeqCst) {
            tracing::info!("Reached the {} budget, stopping dispatch", which);
        }
        self.stop.cancel();
    }

    /// Reserves room for up to `wanted` records under the record budget
    ///
    /// # Returns
    ///
    /// `(already_reserved, granted)`; `granted` may be smaller than `wanted`
    /// or zero once the budget is used up.
    fn reserve_records(&self, wanted: u64) -> (u64, u64) {
        let max = self.limits.max_records;
        let previous = self
            .records_reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let granted = wanted.min(max.saturating_sub(current));
                (granted > 0).then_some(current + granted)
            });

        match previous {
            Ok(current) => (current, wanted.min(max.saturating_sub(current))),
            Err(current) => (current, 0),
        }
    }

    /// Pushes records to the sink within the record budget
    fn push_records(&self, records: &[Record]) {
        if records.is_empty() || self.sink_abort.load(Ordering::SeqCst) {
            return;
        }

        let (before, granted) = self.reserve_records(records.len() as u64);
        if granted == 0 {
            tracing::debug!("Record budget used up, dropping {} record(s)", records.len());
            self.hit_budget("record");
            return;
        }

        let batch = &records[..granted as usize];
        match self.sink.push_records(batch) {
            Ok(()) => {
                self.sink_succeeded();
                tracing::debug!("Pushed {} record(s)", batch.len());
                if before + granted >= self.limits.max_records {
                    self.hit_budget("record");
                }
            }
            Err(e) => {
                self.records_reserved.fetch_sub(granted, Ordering::SeqCst);
                self.sink_failed("push_records", &e);
            }
        }
    }

    /// Stores one artifact; an already stored key counts as success
    fn put_artifact(&self, key: &str, bytes: &[u8], content_type: &str) -> SinkResult<bool> {
        match self.sink.put_artifact(key, bytes, content_type) {
            Ok(()) => {
                self.sink_succeeded();
                Ok(true)
            }
            Err(SinkError::DuplicateKey(_)) => {
                self.sink_succeeded();
                tracing::debug!("Artifact {} already stored", key);
                Ok(false)
            }
            Err(e) => {
                self.sink_failed("put_artifact", &e);
                Err(e)
            }
        }
    }

    fn sink_succeeded(&self) {
        self.consecutive_sink_failures.store(0, Ordering::SeqCst);
    }

    fn sink_failed(&self, operation: &str, error: &SinkError) {
        self.counters.sink_errors.fetch_add(1, Ordering::SeqCst);
        let consecutive = self.consecutive_sink_failures.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::error!(
            "Sink {} failed ({} consecutive): {}",
            operation,
            consecutive,
            error
        );

        if consecutive >= self.limits.sink_failure_threshold
            && !self.sink_abort.swap(true, Ordering::SeqCst)
        {
            tracing::error!(
                "Aborting run after {} consecutive sink failures",
                consecutive
            );
            self.stop.cancel();
        }
    }
}

/// Drives a harvest run
///
/// Owns the compiled configuration and the sink. Each call to
/// [`Harvester::run`] starts from a fresh frontier seeded with the
/// configured seed URLs.
pub struct Harvester {
    config: Arc<Config>,
    fetcher: Fetcher,
    extractor: Arc<Extractor>,
    sink: Arc<dyn Sink>,
}

impl Harvester {
    /// Creates a new harvester
    ///
    /// # Arguments
    ///
    /// * `config` - The harvest configuration; validated here
    /// * `sink` - Where records and artifacts go
    ///
    /// # Returns
    ///
    /// * `Ok(Harvester)` - Ready to run
    /// * `Err(HarvestError)` - Invalid configuration or HTTP client setup failure
    pub fn new(config: Config, sink: Arc<dyn Sink>) -> Result<Self, HarvestError> {
        validate(&config)?;

        let fetcher = Fetcher::new(&config.fetch)?;
        let extractor = Extractor::new(&config.extract)?;

        Ok(Self {
            config: Arc::new(config),
            fetcher,
            extractor: Arc::new(extractor),
            sink,
        })
    }

    /// Label a seed URL starts with
    pub fn seed_label(&self, seed: &str) -> PageLabel {
        self.config.extract.label_for_seed(seed)
    }

    /// Runs a harvest until it drains, hits a budget, or is cancelled
    ///
    /// Cancelling `cancel` stops dispatch; pages already dispatched finish
    /// and the run ends `Aborted`. Every terminal state is a normal
    /// completion and returns a summary.
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - The run reached a terminal state
    /// * `Err(HarvestError)` - A worker task panicked
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary, HarvestError> {
        let started = Instant::now();
        let harvest = &self.config.harvest;

        let shared = Arc::new(RunShared {
            frontier: Frontier::new(harvest.max_depth),
            extractor: Arc::clone(&self.extractor),
            sink: Arc::clone(&self.sink),
            limits: Limits {
                max_pages: harvest.max_pages as u64,
                max_records: harvest.max_records as u64,
                sink_failure_threshold: harvest.sink_failure_threshold,
                request_delay: Duration::from_millis(harvest.request_delay_ms),
                emit_image_records: self
                    .config
                    .extract
                    .images
                    .as_ref()
                    .map_or(false, |images| images.emit_records),
            },
            dispatched: Mutex::new(0),
            records_reserved: AtomicU64::new(0),
            consecutive_sink_failures: AtomicU32::new(0),
            budget_hit: AtomicBool::new(false),
            sink_abort: AtomicBool::new(false),
            counters: Counters::default(),
            stop: cancel.child_token(),
            cancel: cancel.clone(),
            wake: Notify::new(),
        });

        self.seed(&shared.frontier);
        tracing::info!(
            "Starting harvest: {} seed(s), {} worker(s), max {} pages / {} records",
            shared.frontier.size(),
            harvest.worker_count,
            harvest.max_pages,
            harvest.max_records
        );

        let mut workers = JoinSet::new();
        for id in 0..harvest.worker_count {
            workers.spawn(worker(id, Arc::clone(&shared), self.fetcher.clone()));
        }

        while let Some(joined) = workers.join_next().await {
            joined?;
        }

        let state = if shared.is_aborting() {
            RunState::Aborted
        } else if shared.budget_hit.load(Ordering::SeqCst) {
            RunState::BudgetExceeded
        } else {
            RunState::Drained
        };

        let counters = &shared.counters;
        let summary = RunSummary {
            state,
            pages_fetched: *shared.dispatched.lock().unwrap_or_else(PoisonError::into_inner),
            pages_failed: counters.pages_failed.load(Ordering::SeqCst),
            pages_skipped: counters.pages_skipped.load(Ordering::SeqCst),
            records_pushed: shared.records_reserved.load(Ordering::SeqCst),
            artifacts_stored: counters.artifacts_stored.load(Ordering::SeqCst),
            artifacts_failed: counters.artifacts_failed.load(Ordering::SeqCst),
            sink_errors: counters.sink_errors.load(Ordering::SeqCst),
            urls_rejected: shared.frontier.malformed_count()
                + counters.links_rejected.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        };

        tracing::info!(
            "Harvest finished: {} ({} pages, {} records, {:.1}s)",
            summary.state,
            summary.pages_fetched,
            summary.records_pushed,
            summary.elapsed.as_secs_f64()
        );

        Ok(summary)
    }

    fn seed(&self, frontier: &Frontier) {
        for seed in &self.config.harvest.seed_urls {
            let url = normalize_url(seed)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| seed.clone());
            let outcome = frontier.enqueue(&url, self.seed_label(seed), 0);
            tracing::debug!("Seed {}: {:?}", url, outcome);
        }
    }
}

/// One worker: dequeue, fetch, extract, enqueue links, push records
async fn worker(id: usize, shared: Arc<RunShared>, fetcher: Fetcher) {
    tracing::debug!("Worker {} started", id);

    loop {
        match shared.next_page() {
            Dispatch::Stop => break,
            Dispatch::Page(entry) => {
                process_page(&shared, &fetcher, &entry).await;
                shared.frontier.complete();
                shared.wake.notify_waiters();

                if !shared.limits.request_delay.is_zero() {
                    tokio::select! {
                        _ = shared.stop.cancelled() => {}
                        _ = tokio::time::sleep(shared.limits.request_delay) => {}
                    }
                }
            }
            Dispatch::Idle => {
                if shared.frontier.is_drained() {
                    tracing::debug!("Worker {} found the frontier drained", id);
                    shared.stop.cancel();
                    shared.wake.notify_waiters();
                    break;
                }

                tokio::select! {
                    _ = shared.stop.cancelled() => break,
                    _ = shared.wake.notified() => {}
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                }
            }
        }
    }

    tracing::debug!("Worker {} stopped", id);
}

async fn process_page(shared: &RunShared, fetcher: &Fetcher, entry: &FrontierEntry) {
    tracing::debug!("Processing {} ({}, depth {})", entry.url, entry.label, entry.depth);

    let result = fetcher.fetch(&entry.url).await;
    let content = match result.content {
        Some(content) if result.status.is_success() => content,
        _ => {
            shared.counters.pages_failed.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(
                "Failed to fetch {} after {} attempt(s): {}",
                entry.url,
                result.attempt_count,
                result.error.as_deref().unwrap_or("no content")
            );
            return;
        }
    };

    let extraction = match shared.extractor.try_extract(&content, entry) {
        Ok(extraction) => extraction,
        Err(e) => {
            shared.counters.pages_skipped.fetch_add(1, Ordering::SeqCst);
            tracing::warn!("Skipping {}: {}", entry.url, e);
            return;
        }
    };

    if !extraction.rejected_links.is_empty() {
        shared
            .counters
            .links_rejected
            .fetch_add(extraction.rejected_links.len() as u64, Ordering::SeqCst);
        for href in &extraction.rejected_links {
            tracing::debug!("{}: dropping malformed link {}", entry.url, href);
        }
    }

    // Links first, so the frontier never looks drained while this page has children
    let mut queued = 0;
    for child in extraction.entries {
        if shared.frontier.enqueue_entry(child).is_queued() {
            queued += 1;
        }
    }
    if queued > 0 {
        tracing::debug!("{}: queued {} new page(s)", entry.url, queued);
        shared.wake.notify_waiters();
    }

    shared.push_records(&extraction.records);

    if shared.extractor.harvests_images() {
        harvest_images(shared, fetcher, entry, &content).await;
    }
}

/// Downloads the images of a page and stores them as artifacts
async fn harvest_images(shared: &RunShared, fetcher: &Fetcher, entry: &FrontierEntry, content: &[u8]) {
    let sources = shared.extractor.image_sources(content, &entry.url);
    if sources.is_empty() {
        return;
    }

    let request = request_id(&entry.url);
    let mut image_records = Vec::new();

    for (index, source) in sources.iter().enumerate() {
        if shared.is_aborting() {
            tracing::debug!("Run aborting, skipping remaining images of {}", entry.url);
            break;
        }

        let result = fetcher.fetch(source.as_str()).await;
        let bytes = match result.content {
            Some(bytes) if result.status.is_success() => bytes,
            _ => {
                shared.counters.artifacts_failed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    "Failed to fetch image {}: {}",
                    source,
                    result.error.as_deref().unwrap_or("no content")
                );
                continue;
            }
        };

        let content_type = result
            .content_type
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let key = artifact_key(index, &request, &extension_for_content_type(&content_type));

        match shared.put_artifact(&key, &bytes, &content_type) {
            Ok(stored) => {
                if stored {
                    shared.counters.artifacts_stored.fetch_add(1, Ordering::SeqCst);
                }
                if shared.limits.emit_image_records {
                    image_records.push(
                        Record::new(entry.url.as_str())
                            .with("image_url", source.as_str())
                            .with("file_key", FieldValue::Text(key)),
                    );
                }
            }
            Err(_) => {
                shared.counters.artifacts_failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    shared.push_records(&image_records);
}
