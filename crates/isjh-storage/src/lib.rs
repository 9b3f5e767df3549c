//! HTTP fetch utilities, pacing, content hashing and the persistent store seam for ISJH.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};

pub mod fixture;
pub mod postgres;
pub mod store;

pub use fixture::{FixtureFetcher, FixtureResponse, RecordingPacer};
pub use postgres::PgStore;
pub use store::{
    HarvestStore, LivenessUpdate, MemoryStore, OrganizationFilter, OrganizationScope, StoreError,
};

pub const CRATE_NAME: &str = "isjh-storage";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|e| FetchError::Decode {
            url: self.final_url.clone(),
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl FetchError {
    /// Short human-readable cause, used in takedown reasons.
    pub fn reason(&self) -> String {
        match self {
            FetchError::Timeout { .. } => "timeout".to_string(),
            FetchError::Transport { .. } => "network error".to_string(),
            FetchError::HttpStatus { status, .. } => format!("HTTP {status}"),
            FetchError::Decode { .. } => "unparsable response".to_string(),
        }
    }

    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Outbound HTTP seam. Non-2xx responses surface as [`FetchError::HttpStatus`].
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError>;

    async fn post_json(&self, url: &str, body: &JsonValue) -> Result<FetchedResponse, FetchError>;

    /// Body is always empty. Never retried.
    async fn head(&self, url: &str) -> Result<FetchedResponse, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_error(err: &FetchError) -> RetryDisposition {
    match err {
        FetchError::Timeout { .. } | FetchError::Transport { .. } => RetryDisposition::Retryable,
        FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
            .map(classify_status)
            .unwrap_or(RetryDisposition::NonRetryable),
        FetchError::Decode { .. } => RetryDisposition::NonRetryable,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub global_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            global_concurrency: 16,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: format!("building reqwest client: {e}"),
            })?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&JsonValue>,
    ) -> Result<FetchedResponse, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let mut request = self.client.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = if method == Method::HEAD {
            Vec::new()
        } else {
            resp.bytes()
                .await
                .map_err(|e| FetchError::from_reqwest(url, e))?
                .to_vec()
        };
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }

    async fn send_with_retries(
        &self,
        method: Method,
        url: &str,
        body: Option<&JsonValue>,
    ) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0;
        loop {
            match self.send_once(method.clone(), url, body).await {
                Ok(resp) => return Ok(resp),
                Err(err)
                    if classify_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries =>
                {
                    let delay = self.backoff.delay_for_attempt(attempt);
                    debug!(%err, attempt, ?delay, "retrying request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.send_with_retries(Method::GET, url, None)
            .instrument(info_span!("http_fetch", method = "GET", url))
            .await
    }

    async fn post_json(&self, url: &str, body: &JsonValue) -> Result<FetchedResponse, FetchError> {
        self.send_with_retries(Method::POST, url, Some(body))
            .instrument(info_span!("http_fetch", method = "POST", url))
            .await
    }

    async fn head(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.send_once(Method::HEAD, url, None)
            .instrument(info_span!("http_fetch", method = "HEAD", url))
            .await
    }
}

/// Injectable inter-request delay.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacer;

#[async_trait]
impl Pacer for NoPacer {
    async fn pause(&self, _delay: Duration) {}
}
