use crate::state::PageLabel;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for Harvest-Ripple
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
}

/// Harvest scope and budget configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HarvestConfig {
    /// URLs the frontier is seeded with
    pub seed_urls: Vec<String>,

    /// Maximum number of distinct pages fetched in one run
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Maximum number of records pushed to the sink in one run
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Maximum link depth from a seed URL (seeds are depth 0)
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Number of concurrent fetch-extract-push workers
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Pause each worker takes between two pages (milliseconds)
    #[serde(default)]
    pub request_delay_ms: u64,

    /// Consecutive sink failures after which the run is aborted
    #[serde(default = "default_sink_failure_threshold")]
    pub sink_failure_threshold: u32,
}

/// Backoff strategy between fetch retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// The same delay before every retry
    Fixed,
    /// The delay doubles before every retry
    Exponential,
}

/// HTTP fetch configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FetchConfig {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Retries after the first attempt for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retries (milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_backoff")]
    pub backoff: BackoffKind,

    /// Per-request timeout (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Also retry 4xx/5xx responses
    #[serde(default)]
    pub retry_http_errors: bool,

    /// Extra request headers, merged over the default Accept headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            backoff: default_backoff(),
            timeout_ms: default_timeout_ms(),
            retry_http_errors: false,
            headers: BTreeMap::new(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database holding records, artifacts and runs
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Extraction rules for the target site
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtractConfig {
    /// Seed URLs containing any of these substrings are seeded as index pages
    #[serde(default)]
    pub index_patterns: Vec<String>,

    /// Label for seeds that match no index pattern
    #[serde(default = "default_seed_label")]
    pub seed_label: PageLabel,

    /// Selector for child links on index pages
    #[serde(default = "default_link_selector")]
    pub link_selector: String,

    /// Selector for the pagination link on index pages
    #[serde(default)]
    pub next_page_selector: Option<String>,

    /// Selector for item containers on detail pages; one record per match
    #[serde(default)]
    pub item_selector: Option<String>,

    #[serde(default)]
    pub fields: Vec<FieldRule>,

    #[serde(default)]
    pub images: Option<ImageRule>,
}

impl ExtractConfig {
    /// Label a seed URL starts with
    ///
    /// Seeds containing any index pattern are index pages; the rest get
    /// `seed_label`.
    pub fn label_for_seed(&self, seed: &str) -> PageLabel {
        if self
            .index_patterns
            .iter()
            .any(|pattern| seed.contains(pattern.as_str()))
        {
            PageLabel::Index
        } else {
            self.seed_label
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            index_patterns: Vec::new(),
            seed_label: default_seed_label(),
            link_selector: default_link_selector(),
            next_page_selector: None,
            item_selector: None,
            fields: Vec::new(),
            images: None,
        }
    }
}

/// One record field read from the page
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldRule {
    /// Field name in the emitted record
    pub name: String,

    /// CSS selector, evaluated inside the item container when one is configured
    pub selector: String,

    /// Attribute to read instead of the element text
    #[serde(default)]
    pub attribute: Option<String>,

    /// Join every match instead of taking the first
    #[serde(default)]
    pub multiple: bool,

    #[serde(default = "default_separator")]
    pub separator: String,

    /// Parse the value as a number (non-numeric text becomes null)
    #[serde(default)]
    pub number: bool,
}

/// Image artifact harvesting rules
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImageRule {
    #[serde(default = "default_image_selector")]
    pub selector: String,

    #[serde(default = "default_image_attribute")]
    pub attribute: String,

    #[serde(default = "default_images_per_page")]
    pub max_per_page: usize,

    /// Push an `{image_url, file_key}` record per stored image
    #[serde(default = "default_true")]
    pub emit_records: bool,
}

fn default_max_pages() -> usize {
    20
}

fn default_max_records() -> usize {
    1000
}

fn default_max_depth() -> u32 {
    2
}

fn default_worker_count() -> usize {
    5
}

fn default_sink_failure_threshold() -> u32 {
    3
}

fn default_user_agent() -> String {
    format!("harvest-ripple/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_backoff() -> BackoffKind {
    BackoffKind::Exponential
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_database_path() -> String {
    "./harvest.db".to_string()
}

fn default_seed_label() -> PageLabel {
    PageLabel::Index
}

fn default_link_selector() -> String {
    "a[href]".to_string()
}

fn default_separator() -> String {
    "; ".to_string()
}

fn default_image_selector() -> String {
    "img".to_string()
}

fn default_image_attribute() -> String {
    "src".to_string()
}

fn default_images_per_page() -> usize {
    20
}

fn default_true() -> bool {
    true
}

impl HarvestConfig {
    /// Builds a harvest section with default budgets for the given seeds
    pub fn with_seeds(seed_urls: Vec<String>) -> Self {
        Self {
            seed_urls,
            max_pages: default_max_pages(),
            max_records: default_max_records(),
            max_depth: default_max_depth(),
            worker_count: default_worker_count(),
            request_delay_ms: 0,
            sink_failure_threshold: default_sink_failure_threshold(),
        }
    }
}
