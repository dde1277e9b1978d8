// src/ingest/fetch.rs
//! Content fetching: the collaborator trait, the reqwest implementation and the
//! uniform retry policy applied on top of any fetcher.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, USER_AGENT};
use reqwest::Client;
use tracing::{debug, warn};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Validators from a previous response, sent back as conditional-request headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditional {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// One attempt, no retries.
    async fn fetch(&self, url: &str, conditional: &Conditional)
        -> Result<FetchResponse, FetchError>;
}

/// Fixed attempt count, exponential delay, fixed per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts; for tests and tools.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: Duration::ZERO,
            timeout: Duration::from_secs(5),
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << (attempt.saturating_sub(1)).min(16))
    }
}

/// Runs `fetcher` under `policy`. Transport errors, timeouts and 5xx responses are
/// retried; everything else (including 304 and 429) is returned to the caller as is.
pub async fn fetch_with_retry(
    fetcher: &dyn ContentFetcher,
    url: &str,
    conditional: &Conditional,
    policy: &RetryPolicy,
) -> Result<FetchResponse, FetchError> {
    let attempts = policy.attempts.max(1);
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(policy.timeout, fetcher.fetch(url, conditional))
            .await
        {
            Ok(r) => r,
            Err(_) => Err(FetchError::Timeout(policy.timeout)),
        };

        let retryable = match &result {
            Ok(resp) => resp.status >= 500,
            Err(_) => true,
        };
        if !retryable || attempt >= attempts {
            return result;
        }

        let delay = policy.delay_after(attempt);
        match &result {
            Ok(resp) => warn!(target: "ingest", url, attempt, status = resp.status, ?delay, "server error, retrying"),
            Err(e) => warn!(target: "ingest", url, attempt, error = %e, ?delay, "fetch failed, retrying"),
        }
        tokio::time::sleep(delay).await;
    }
}

/// `reqwest`-backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }
}

fn header_string(resp: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        conditional: &Conditional,
    ) -> Result<FetchResponse, FetchError> {
        let mut req = self.client.get(url).header(USER_AGENT, &self.user_agent);
        if let Some(etag) = conditional.etag.as_deref() {
            req = req.header(IF_NONE_MATCH, etag);
        }
        if let Some(lm) = conditional.last_modified.as_deref() {
            req = req.header(IF_MODIFIED_SINCE, lm);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let etag = header_string(&resp, ETAG);
        let last_modified = header_string(&resp, LAST_MODIFIED);
        let body = resp.text().await?;
        debug!(target: "ingest", url, status, bytes = body.len(), "fetched");

        Ok(FetchResponse {
            status,
            body,
            etag,
            last_modified,
        })
    }
}
