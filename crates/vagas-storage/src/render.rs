//! Turning a listing URL into HTML.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::ACCEPT_LANGUAGE;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::DEFAULT_USER_AGENT;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{url} answered {status}")]
    HttpStatus { status: u16, url: String },
    #[error("gave up on {url} after {after:?}")]
    Timeout { url: String, after: Duration },
    #[error("no page available for {0}")]
    NotFound(String),
    #[error("renderer closed")]
    Shutdown,
}

/// Hints passed to the renderer. Plain HTTP only honours `locale`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub locale: Option<String>,
    pub viewport: Option<(u32, u32)>,
    pub scroll_depth: Option<u32>,
}

/// Supplies raw HTML for a listing URL.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn fetch(
        &self,
        cycle_id: Uuid,
        source: &str,
        url: &str,
        options: &FetchOptions,
    ) -> Result<String, FetchError>;
}

/// Retries for 429 and 5xx answers and for connect or timeout failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub first_delay: Duration,
    pub delay_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            first_delay: Duration::from_secs(1),
            delay_cap: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), doubling up to the cap.
    pub fn delay_before(&self, retry: u32) -> Duration {
        let doublings = retry.saturating_sub(1).min(16);
        self.first_delay
            .saturating_mul(1 << doublings)
            .min(self.delay_cap)
    }

    pub fn retries_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    pub fn retries_error(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect()
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Bound on one `fetch`, retries and pacing included.
    pub fetch_deadline: Duration,
    pub user_agent: Option<String>,
    pub max_in_flight: usize,
    /// Minimum gap between two requests to the same source.
    pub source_spacing: Duration,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            fetch_deadline: Duration::from_secs(120),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            max_in_flight: 4,
            source_spacing: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

/// Renders listing pages with plain HTTP GETs, spacing out requests to
/// each source.
#[derive(Debug)]
pub struct HttpPageRenderer {
    client: reqwest::Client,
    in_flight: Semaphore,
    source_spacing: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
    retry: RetryPolicy,
    fetch_deadline: Duration,
}

impl HttpPageRenderer {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT))
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            in_flight: Semaphore::new(config.max_in_flight.max(1)),
            source_spacing: config.source_spacing,
            next_slot: Mutex::new(HashMap::new()),
            retry: config.retry,
            fetch_deadline: config.fetch_deadline,
        })
    }

    /// Reserves the next free request slot for `source` and sleeps until it.
    async fn wait_turn(&self, source: &str) {
        let start = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let start = slots.get(source).copied().filter(|at| *at > now).unwrap_or(now);
            slots.insert(source.to_string(), start + self.source_spacing);
            start
        };
        tokio::time::sleep_until(start).await;
    }

    async fn get(&self, source: &str, url: &str, locale: Option<&str>) -> Result<String, FetchError> {
        let mut retry = 0;
        loop {
            self.wait_turn(source).await;
            let permit = self.in_flight.acquire().await.map_err(|_| FetchError::Shutdown)?;

            let mut request = self.client.get(url);
            if let Some(locale) = locale {
                request = request.header(ACCEPT_LANGUAGE, locale);
            }
            let outcome = match request.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp.text().await?),
                Ok(resp) => {
                    let status = resp.status();
                    let err = FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: resp.url().to_string(),
                    };
                    (RetryPolicy::retries_status(status), err)
                }
                Err(err) => (RetryPolicy::retries_error(&err), FetchError::Request(err)),
            };
            drop(permit);

            let (transient, err) = outcome;
            if !transient || retry >= self.retry.retries {
                return Err(err);
            }
            retry += 1;
            let delay = self.retry.delay_before(retry);
            debug!(retry, ?delay, error = %err, "listing fetch will be retried");
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PageRenderer for HttpPageRenderer {
    async fn fetch(
        &self,
        cycle_id: Uuid,
        source: &str,
        url: &str,
        options: &FetchOptions,
    ) -> Result<String, FetchError> {
        let span = info_span!("http_fetch", %cycle_id, source, url);
        tokio::time::timeout(
            self.fetch_deadline,
            self.get(source, url, options.locale.as_deref()),
        )
        .instrument(span)
        .await
        .map_err(|_| FetchError::Timeout {
            url: url.to_string(),
            after: self.fetch_deadline,
        })?
    }
}
