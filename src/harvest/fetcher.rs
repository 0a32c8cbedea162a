//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the harvester, including:
//! - Building HTTP clients with the configured user agent
//! - GET requests with a configurable header set
//! - Bounded retries with fixed or exponential backoff
//! - Per-request timeouts
//! - Failure classification

use crate::config::{BackoffKind, FetchConfig};
use crate::state::FetchStatus;
use crate::{ConfigError, HarvestError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;

/// Upper bound on a single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(30);

const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Outcome of fetching one URL, including every retry
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// The requested URL
    pub url: String,

    pub status: FetchStatus,

    /// HTTP status of the last response, if any arrived
    pub http_status: Option<u16>,

    /// Content-Type header of the last response
    pub content_type: Option<String>,

    /// Response body; only present when `status` is `Ok`
    pub content: Option<Vec<u8>>,

    /// Attempts made, the first one included
    pub attempt_count: u32,

    /// Description of the last failure
    pub error: Option<String>,
}

impl FetchResult {
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    fn failure(url: &str, status: FetchStatus, error: String) -> Self {
        Self {
            url: url.to_string(),
            status,
            http_status: None,
            content_type: None,
            content: None,
            attempt_count: 1,
            error: Some(error),
        }
    }
}

/// When and how often a fetch is retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    pub backoff: BackoffKind,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Also retry 4xx/5xx responses
    pub retry_http_errors: bool,

    /// Timeout applied to each attempt independently
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.backoff,
            base_delay: config.retry_backoff(),
            retry_http_errors: config.retry_http_errors,
            timeout: config.timeout(),
        }
    }

    /// Delay before the given retry (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = match self.backoff {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Exponential => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(MAX_BACKOFF)
    }

    /// Whether a failed attempt with this status may be retried
    pub fn should_retry(&self, status: FetchStatus) -> bool {
        status.is_transient() || (status == FetchStatus::HttpError && self.retry_http_errors)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The fetch configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &FetchConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(config.timeout().min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Builds the header set sent with every request
///
/// `Accept` and `Accept-Language` defaults are overridden by configured
/// headers of the same name.
pub fn build_headers(config: &FetchConfig) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));

    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ConfigError::InvalidHeader(format!("invalid header name '{}'", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ConfigError::InvalidHeader(format!("invalid value for header '{}'", name)))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

/// Fetches pages with retries
///
/// Cloning is cheap: clones share the underlying connection pool, and each
/// worker owns its own handle.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    headers: HeaderMap,
    policy: RetryPolicy,
}

impl Fetcher {
    /// Creates a fetcher from the fetch configuration
    pub fn new(config: &FetchConfig) -> Result<Self, HarvestError> {
        Ok(Self {
            client: build_http_client(config)?,
            headers: build_headers(config)?,
            policy: RetryPolicy::from_config(config),
        })
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Fetches a URL with the configured headers and retry policy
    pub async fn fetch(&self, url: &str) -> FetchResult {
        self.fetch_with(url, &self.headers, &self.policy).await
    }

    /// Fetches a URL with explicit headers and retry policy
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | 2xx | Return content |
    /// | Timeout | Retry up to `max_retries` times |
    /// | Connection / body error | Retry up to `max_retries` times |
    /// | 4xx / 5xx | Return immediately, unless `retry_http_errors` |
    ///
    /// Never fails: when retries run out the last failure is returned, and
    /// `attempt_count` is then exactly `max_retries + 1`.
    pub async fn fetch_with(
        &self,
        url: &str,
        headers: &HeaderMap,
        policy: &RetryPolicy,
    ) -> FetchResult {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let mut result = self.attempt(url, headers, policy.timeout).await;
            result.attempt_count = attempt;

            if result.is_ok() || !policy.should_retry(result.status) || attempt > policy.max_retries
            {
                if !result.is_ok() {
                    tracing::debug!(
                        "Giving up on {} after {} attempt(s): {}",
                        url,
                        attempt,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
                return result;
            }

            let delay = policy.delay_for(attempt);
            tracing::warn!(
                "Fetch of {} failed ({}), retry {}/{} in {:?}",
                url, result.status, attempt, policy.max_retries, delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Performs a single GET request
    async fn attempt(&self, url: &str, headers: &HeaderMap, timeout: Duration) -> FetchResult {
        tracing::debug!("GET {}", url);

        let response = match self
            .client
            .get(url)
            .headers(headers.clone())
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return FetchResult::failure(url, classify_error(&e), e.to_string()),
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if !status.is_success() {
            return FetchResult {
                http_status: Some(status.as_u16()),
                content_type,
                ..FetchResult::failure(url, FetchStatus::HttpError, format!("HTTP {}", status))
            };
        }

        match response.bytes().await {
            Ok(body) => FetchResult {
                url: url.to_string(),
                status: FetchStatus::Ok,
                http_status: Some(status.as_u16()),
                content_type,
                content: Some(body.to_vec()),
                attempt_count: 1,
                error: None,
            },
            Err(e) => FetchResult {
                http_status: Some(status.as_u16()),
                content_type,
                ..FetchResult::failure(url, classify_error(&e), e.to_string())
            },
        }
    }
}

fn classify_error(error: &reqwest::Error) -> FetchStatus {
    if error.is_timeout() {
        FetchStatus::Timeout
    } else {
        FetchStatus::NetworkError
    }
}
