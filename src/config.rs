//! Registry client configuration with sensible defaults.
//!
//! [`RegistryConfig`] controls the request budget, retry behaviour,
//! pagination limits and batching. The defaults are tuned for the public
//! `recherche-entreprises.api.gouv.fr` service.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Configuration for a registry search session.
///
/// Use [`Default::default()`] for sensible defaults, or construct with
/// field overrides for custom behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Base URL of the registry API. Requests go to `{api_base_url}/search`.
    pub api_base_url: String,
    /// Hard admission ceiling: requests allowed in any trailing second.
    /// Also the size of the per-batch page worker pool.
    pub max_requests_per_second: usize,
    /// Margin added past the computed wait when the request window is full.
    pub min_delay_between_requests_ms: u64,
    /// Extra attempts allowed after a 429 or a timeout.
    pub max_retries_on_429: u32,
    /// First internal retry delay; doubles on every retry.
    pub initial_retry_delay_ms: u64,
    /// Random delay range in milliseconds `(min, max)` added to every retry wait.
    pub retry_jitter_ms: (u64, u64),
    /// Longest `Retry-After` delay honoured; longer requests are capped.
    pub max_retry_after_seconds: u64,
    /// Largest result set the registry will paginate through.
    pub max_total_results: u64,
    /// Value sent as `per_page`.
    pub results_per_page: u64,
    /// Maximum number of location codes joined into one request.
    pub max_codes_per_call: usize,
    /// Timeout for the first page of each batch, in seconds.
    pub first_page_timeout_seconds: u64,
    /// Timeout for pages 2..N, in seconds.
    pub page_timeout_seconds: u64,
    /// Parameters sent with every request before the caller's criteria.
    pub default_params: BTreeMap<String, String>,
    /// Custom User-Agent string. If `None`, reqwest's default is used.
    pub user_agent: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let default_params = [
            ("minimal", "true"),
            ("include", "matching_etablissements,siege,finances"),
            ("limite_matching_etablissements", "100"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        Self {
            api_base_url: "https://recherche-entreprises.api.gouv.fr".into(),
            max_requests_per_second: 6,
            min_delay_between_requests_ms: 187,
            max_retries_on_429: 3,
            initial_retry_delay_ms: 5_000,
            retry_jitter_ms: (50, 150),
            max_retry_after_seconds: 120,
            max_total_results: 10_000,
            results_per_page: 25,
            max_codes_per_call: 10,
            first_page_timeout_seconds: 30,
            page_timeout_seconds: 20,
            default_params,
            user_agent: None,
        }
    }
}

impl RegistryConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| RegistryError::Config(e.to_string()))
    }

    /// Number of pages the registry will serve for one query.
    pub fn api_max_pages(&self) -> u64 {
        if self.results_per_page == 0 {
            return 0;
        }
        self.max_total_results.div_ceil(self.results_per_page)
    }

    pub(crate) fn min_delay_between_requests(&self) -> Duration {
        Duration::from_millis(self.min_delay_between_requests_ms)
    }

    pub(crate) fn first_page_timeout(&self) -> Duration {
        Duration::from_secs(self.first_page_timeout_seconds)
    }

    pub(crate) fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_seconds)
    }

    pub(crate) fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_seconds)
    }

    /// Validates this configuration, returning an error if any field is invalid.
    ///
    /// Checks:
    /// - `api_base_url` must be an absolute http(s) URL
    /// - `max_requests_per_second`, `results_per_page` and `max_codes_per_call` must be > 0
    /// - `max_total_results` must be >= `results_per_page`
    /// - both timeouts must be > 0
    /// - `retry_jitter_ms.0` must be <= `retry_jitter_ms.1`
    pub fn validate(&self) -> Result<(), RegistryError> {
        match url::Url::parse(&self.api_base_url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => {
                return Err(RegistryError::Config(format!(
                    "api_base_url must use http or https, got {}",
                    parsed.scheme()
                )));
            }
            Err(e) => {
                return Err(RegistryError::Config(format!(
                    "api_base_url is not a valid URL: {e}"
                )));
            }
        }
        if self.max_requests_per_second == 0 {
            return Err(RegistryError::Config(
                "max_requests_per_second must be greater than 0".into(),
            ));
        }
        if self.results_per_page == 0 {
            return Err(RegistryError::Config(
                "results_per_page must be greater than 0".into(),
            ));
        }
        if self.max_total_results < self.results_per_page {
            return Err(RegistryError::Config(
                "max_total_results must be >= results_per_page".into(),
            ));
        }
        if self.max_codes_per_call == 0 {
            return Err(RegistryError::Config(
                "max_codes_per_call must be greater than 0".into(),
            ));
        }
        if self.first_page_timeout_seconds == 0 || self.page_timeout_seconds == 0 {
            return Err(RegistryError::Config(
                "timeouts must be greater than 0".into(),
            ));
        }
        if self.retry_jitter_ms.0 > self.retry_jitter_ms.1 {
            return Err(RegistryError::Config(
                "retry_jitter_ms min must be <= max".into(),
            ));
        }
        Ok(())
    }
}
