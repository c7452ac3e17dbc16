//! Page fetching with admission control and 429/timeout backoff.
//!
//! [`HttpPageFetcher`] issues one `GET {base}/{endpoint}` per attempt. Every
//! attempt first waits on the shared [`RateLimiter`]. A 429 or a timeout is
//! retried with a doubling delay (each kind on its own delay track) until
//! `max_retries_on_429` extra attempts are spent; any other failure is
//! returned immediately.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::StatusCode;

use crate::config::RegistryConfig;
use crate::error::{RegistryError, TransientKind};
use crate::rate_limit::RateLimiter;
use crate::types::SearchPage;

/// Longest raw error body excerpt kept in [`RegistryError::Status`].
const ERROR_BODY_EXCERPT: usize = 200;

/// Registry search endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Full-text and filter search, `GET /search`.
    #[default]
    Search,
    /// Radius search around a point, `GET /near_point`.
    NearPoint,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::NearPoint => "near_point",
        }
    }
}

/// Everything needed to fetch one page of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub endpoint: Endpoint,
    /// Position of the batch in the search, for logs and reports.
    pub batch_index: usize,
    pub page: u32,
    /// Full query string, `page` included.
    pub params: Vec<(String, String)>,
    pub timeout: Duration,
}

/// A source of registry search pages.
///
/// The orchestrator only talks to this trait; [`HttpPageFetcher`] is the
/// production implementation. Implementations must be `Send + Sync`
/// because pages of a batch are fetched concurrently.
pub trait PageSource: Send + Sync {
    /// Fetch one page, retrying transient failures as the implementation sees fit.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] once the page is definitively lost.
    fn fetch_page(
        &self,
        request: &PageRequest,
    ) -> impl std::future::Future<Output = Result<SearchPage, RegistryError>> + Send;
}

/// Backoff settings taken from [`RegistryConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts allowed after the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Random jitter range in milliseconds added to every wait.
    pub jitter_ms: (u64, u64),
    /// Cap on the delay a `Retry-After` header can impose.
    pub max_retry_after: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            max_retries: config.max_retries_on_429,
            initial_delay: Duration::from_millis(config.initial_retry_delay_ms),
            jitter_ms: config.retry_jitter_ms,
            max_retry_after: config.max_retry_after(),
        }
    }

    /// Total attempts, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    fn jitter(&self) -> Duration {
        let (min, max) = self.jitter_ms;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Doubling delay for one kind of transient failure.
#[derive(Debug, Clone, Copy)]
struct DelayTrack {
    next: Duration,
}

impl DelayTrack {
    fn new(initial: Duration) -> Self {
        Self { next: initial }
    }

    fn advance(&mut self) -> Duration {
        let current = self.next;
        self.next = current.saturating_mul(2);
        current
    }
}

/// Retry waits for one page.
///
/// 429s and timeouts each double their own delay; a 429 never lengthens the
/// wait after a timeout and vice versa.
#[derive(Debug, Clone, Copy)]
struct Backoff {
    rate_limited: DelayTrack,
    timeout: DelayTrack,
    max_retry_after: Duration,
}

impl Backoff {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            rate_limited: DelayTrack::new(policy.initial_delay),
            timeout: DelayTrack::new(policy.initial_delay),
            max_retry_after: policy.max_retry_after,
        }
    }

    /// Wait before the next attempt, jitter excluded.
    fn next_wait(&mut self, kind: TransientKind, retry_after: Option<Duration>) -> Duration {
        let internal = match kind {
            TransientKind::RateLimited => self.rate_limited.advance(),
            TransientKind::Timeout => self.timeout.advance(),
        };
        let requested = match retry_after {
            Some(delay) if delay > self.max_retry_after => {
                tracing::warn!(
                    requested_secs = delay.as_secs(),
                    cap_secs = self.max_retry_after.as_secs(),
                    "Retry-After capped"
                );
                self.max_retry_after
            }
            Some(delay) => delay,
            None => Duration::ZERO,
        };
        requested.max(internal)
    }
}

/// What one attempt produced.
enum Attempt {
    Page(SearchPage),
    Retry {
        kind: TransientKind,
        retry_after: Option<Duration>,
    },
    Fail(RegistryError),
}

/// Registry page fetcher over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl HttpPageFetcher {
    /// Build a fetcher for `config`, sharing `limiter` with every other fetcher of the session.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Http`] if the HTTP client cannot be constructed.
    pub fn new(config: &RegistryConfig, limiter: Arc<RateLimiter>) -> Result<Self, RegistryError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            limiter,
            policy: RetryPolicy::from_config(config),
        })
    }

    /// The limiter every attempt waits on.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}/{}", self.base_url, endpoint.path())
    }

    async fn attempt(&self, request: &PageRequest) -> Attempt {
        self.limiter.acquire().await;

        let response = match self
            .client
            .get(self.url(request.endpoint))
            .query(&request.params)
            .timeout(request.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Attempt::Retry {
                    kind: TransientKind::Timeout,
                    retry_after: None,
                };
            }
            Err(e) => return Attempt::Fail(RegistryError::Http(e.to_string())),
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Attempt::Retry {
                kind: TransientKind::RateLimited,
                retry_after: retry_after(response.headers(), Utc::now()),
            };
        }

        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) if e.is_timeout() => String::new(),
                Err(e) => e.to_string(),
            };
            return Attempt::Fail(RegistryError::Status {
                page: request.page,
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        match response.bytes().await {
            Ok(bytes) => match serde_json::from_slice::<SearchPage>(&bytes) {
                Ok(page) => Attempt::Page(page),
                Err(e) => Attempt::Fail(RegistryError::Parse(format!(
                    "page {}: {e}",
                    request.page
                ))),
            },
            Err(e) if e.is_timeout() => Attempt::Retry {
                kind: TransientKind::Timeout,
                retry_after: None,
            },
            Err(e) => Attempt::Fail(RegistryError::Http(e.to_string())),
        }
    }
}

impl PageSource for HttpPageFetcher {
    async fn fetch_page(&self, request: &PageRequest) -> Result<SearchPage, RegistryError> {
        let max_attempts = self.policy.max_attempts();
        let mut backoff = Backoff::new(&self.policy);

        for attempt in 1..=max_attempts {
            let (kind, retry_after) = match self.attempt(request).await {
                Attempt::Page(page) => {
                    tracing::debug!(
                        batch = request.batch_index,
                        page = request.page,
                        records = page.results.len(),
                        attempt,
                        "page fetched"
                    );
                    return Ok(page);
                }
                Attempt::Fail(err) => return Err(err),
                Attempt::Retry { kind, retry_after } => (kind, retry_after),
            };

            if attempt == max_attempts {
                tracing::warn!(
                    batch = request.batch_index,
                    page = request.page,
                    attempts = attempt,
                    reason = %kind,
                    "retry budget exhausted"
                );
                return Err(match kind {
                    TransientKind::RateLimited => RegistryError::RateLimited {
                        page: request.page,
                        attempts: attempt,
                    },
                    TransientKind::Timeout => RegistryError::Timeout {
                        page: request.page,
                        attempts: attempt,
                    },
                });
            }

            let wait = backoff.next_wait(kind, retry_after) + self.policy.jitter();
            tracing::debug!(
                batch = request.batch_index,
                page = request.page,
                attempt,
                reason = %kind,
                wait_ms = wait.as_millis() as u64,
                "retrying page"
            );
            tokio::time::sleep(wait).await;
        }

        // max_attempts >= 1, so the loop always returns.
        Err(RegistryError::Http(format!(
            "page {}: no attempt was made",
            request.page
        )))
    }
}

/// Build the shared [`reqwest::Client`] for registry requests.
///
/// # Errors
///
/// Returns [`RegistryError::Http`] if the client cannot be constructed.
pub fn build_client(config: &RegistryConfig) -> Result<reqwest::Client, RegistryError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, reqwest::header::HeaderValue::from_static("application/json"));

    let mut builder = reqwest::Client::builder().default_headers(headers);
    if let Some(ref ua) = config.user_agent {
        builder = builder.user_agent(ua.clone());
    }
    builder
        .build()
        .map_err(|e| RegistryError::Http(format!("failed to build HTTP client: {e}")))
}

/// Delay requested by a `Retry-After` header, if present and parseable.
fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    parse_retry_after(value, now)
}

/// Parse a `Retry-After` value given as delta-seconds or as an HTTP-date.
///
/// A date in the past yields a zero delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(seconds).ok();
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Human-readable message from an error body.
///
/// Uses the JSON `message` field when there is one, otherwise the start of
/// the raw body.
fn error_message(body: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(serde_json::Value::String(message)) = map.get("message") {
            return message.clone();
        }
    }
    let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
    if excerpt.len() < body.len() {
        format!("{excerpt}...")
    } else {
        excerpt
    }
}
