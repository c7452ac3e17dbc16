//! # registry-search
//!
//! Rate-limited, batched, paginated search client for the French business
//! registry (`recherche-entreprises.api.gouv.fr`).
//!
//! ## Design
//!
//! - Location codes are split into batches joined into a single query each
//! - A radius search around a point runs as a single batch on `near_point`
//! - Page 1 of every batch is fetched alone; queries the registry cannot
//!   paginate in full stop with [`SearchOutcome::NeedsConfirmation`]
//! - Pages 2..N of a batch are fetched concurrently on a bounded worker set
//! - Every request waits on one sliding-window [`RateLimiter`] per client
//! - 429 and timeouts are retried with doubling backoff and `Retry-After`
//! - Records found in several batches or pages are merged by SIREN
//! - Graceful degradation: lost pages and batches are reported, not fatal
//!
//! ## Budget scoping
//!
//! A [`RegistryClient`] owns one request budget. A regular search starts a
//! fresh budget; a forced ("breakdown") search keeps the budget of the
//! searches issued before it on the same client.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod planner;
pub mod rate_limit;
pub mod types;

use std::sync::Arc;

pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use fetcher::{Endpoint, HttpPageFetcher, PageRequest, PageSource};
pub use orchestrator::progress::{NoopObserver, SearchObserver};
pub use rate_limit::RateLimiter;
pub use types::{
    BusinessEntity, CodeType, Confirmation, EstablishmentMatch, GeoArea, SearchCriteria,
    SearchOutcome, SearchPage, SearchReport,
};

use orchestrator::search::{base_params, BatchSearch};

/// A registry search session.
///
/// Holds the configuration, the HTTP fetcher and the request budget shared
/// by every search issued through it.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    config: RegistryConfig,
    fetcher: HttpPageFetcher,
}

impl RegistryClient {
    /// Create a client with a fresh request budget.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Config`] if `config` is invalid, or
    /// [`RegistryError::Http`] if the HTTP client cannot be built.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let limiter = Arc::new(RateLimiter::new(
            config.max_requests_per_second,
            config.min_delay_between_requests(),
        ));
        let fetcher = HttpPageFetcher::new(&config, limiter)?;
        Ok(Self { config, fetcher })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The request budget shared by this client's searches.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        self.fetcher.limiter()
    }

    /// Search the registry for businesses located in `codes`.
    ///
    /// With `force_full_fetch == false` the request budget is reset and a
    /// query too broad to paginate in full returns
    /// [`SearchOutcome::NeedsConfirmation`]. With `force_full_fetch == true`
    /// the budget carries over, every batch is paginated up to the registry
    /// limit, and failed batches are skipped instead of aborting.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # async fn example() -> registry_search::Result<()> {
    /// use registry_search::{
    ///     CodeType, RegistryClient, RegistryConfig, SearchCriteria, SearchOutcome,
    /// };
    ///
    /// let client = RegistryClient::new(RegistryConfig::default())?;
    /// let mut criteria = SearchCriteria::new();
    /// criteria.insert("activite_principale".into(), "56.10A".into());
    ///
    /// match client
    ///     .search(&["75056"], &criteria, false, CodeType::Commune)
    ///     .await
    /// {
    ///     SearchOutcome::Completed(report) => {
    ///         println!("{} businesses", report.entities.len())
    ///     }
    ///     SearchOutcome::NeedsConfirmation(c) => {
    ///         println!("~{} results", c.estimated_total_results)
    ///     }
    ///     SearchOutcome::HardFailure(err) => eprintln!("search failed: {err}"),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn search<S: AsRef<str>>(
        &self,
        codes: &[S],
        criteria: &SearchCriteria,
        force_full_fetch: bool,
        code_type: CodeType,
    ) -> SearchOutcome {
        self.search_with_observer(codes, criteria, force_full_fetch, code_type, &NoopObserver)
            .await
    }

    /// Same as [`search`](Self::search), reporting progress to `observer`.
    pub async fn search_with_observer<S: AsRef<str>>(
        &self,
        codes: &[S],
        criteria: &SearchCriteria,
        force_full_fetch: bool,
        code_type: CodeType,
        observer: &dyn SearchObserver,
    ) -> SearchOutcome {
        if codes.is_empty() {
            tracing::warn!("no location codes given, nothing to search");
            let report = SearchReport::default();
            observer.search_completed(&report);
            return SearchOutcome::Completed(report);
        }

        if !force_full_fetch {
            self.limiter().reset();
        }

        let batches = planner::plan_batches(codes, self.config.max_codes_per_call);
        let params = base_params(&self.config, criteria);
        BatchSearch::new(&self.fetcher, &self.config)
            .with_observer(observer)
            .run(&batches, &params, force_full_fetch, code_type)
            .await
    }

    /// Search the registry for businesses within `area`.
    ///
    /// Runs the same first-page, confirmation and pagination steps as
    /// [`search`](Self::search), as a single batch against the `near_point`
    /// endpoint. An invalid area is a [`SearchOutcome::HardFailure`] and
    /// sends no request.
    pub async fn search_near_point(
        &self,
        area: GeoArea,
        criteria: &SearchCriteria,
        force_full_fetch: bool,
    ) -> SearchOutcome {
        self.search_near_point_with_observer(area, criteria, force_full_fetch, &NoopObserver)
            .await
    }

    /// Same as [`search_near_point`](Self::search_near_point), reporting
    /// progress to `observer`.
    pub async fn search_near_point_with_observer(
        &self,
        area: GeoArea,
        criteria: &SearchCriteria,
        force_full_fetch: bool,
        observer: &dyn SearchObserver,
    ) -> SearchOutcome {
        if let Err(err) = area.validate() {
            tracing::warn!(error = %err, "rejecting point search");
            observer.search_failed(&err);
            return SearchOutcome::HardFailure(err);
        }

        if !force_full_fetch {
            self.limiter().reset();
        }

        let params = base_params(&self.config, criteria);
        BatchSearch::new(&self.fetcher, &self.config)
            .with_observer(observer)
            .run_near_point(&area, &params, force_full_fetch)
            .await
    }
}

/// Run one non-forced search with a throwaway client.
///
/// # Errors
///
/// Returns [`RegistryError::Config`] if `config` is invalid. Search
/// failures are reported through [`SearchOutcome`].
pub async fn search<S: AsRef<str>>(
    codes: &[S],
    criteria: &SearchCriteria,
    code_type: CodeType,
    config: &RegistryConfig,
) -> Result<SearchOutcome> {
    let client = RegistryClient::new(config.clone())?;
    Ok(client.search(codes, criteria, false, code_type).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_rejects_invalid_config() {
        let config = RegistryConfig {
            max_codes_per_call: 0,
            ..Default::default()
        };
        let err = RegistryClient::new(config).unwrap_err();
        assert!(err.to_string().contains("max_codes_per_call"));
    }

    #[tokio::test]
    async fn search_validates_config() {
        let config = RegistryConfig {
            results_per_page: 0,
            ..Default::default()
        };
        let result = search(
            &["75056"],
            &SearchCriteria::new(),
            CodeType::Commune,
            &config,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_codes_complete_without_requests() {
        let config = RegistryConfig {
            api_base_url: "http://127.0.0.1:9".into(),
            ..Default::default()
        };
        let client = RegistryClient::new(config).expect("client");
        let empty: [&str; 0] = [];
        let outcome = client
            .search(&empty, &SearchCriteria::new(), false, CodeType::Postal)
            .await;
        assert_eq!(outcome, SearchOutcome::Completed(SearchReport::default()));
        assert_eq!(client.limiter().in_flight_window(), 0);
    }

    #[tokio::test]
    async fn invalid_area_fails_without_requests() {
        let config = RegistryConfig {
            api_base_url: "http://127.0.0.1:9".into(),
            ..Default::default()
        };
        let client = RegistryClient::new(config).expect("client");
        let area = GeoArea::new(48.85, 2.35, 80.0);
        let outcome = client
            .search_near_point(area, &SearchCriteria::new(), false)
            .await;
        assert!(matches!(
            outcome,
            SearchOutcome::HardFailure(RegistryError::InvalidQuery(_))
        ));
        assert_eq!(client.limiter().in_flight_window(), 0);
    }

    #[test]
    fn client_limiter_uses_configured_capacity() {
        let config = RegistryConfig {
            max_requests_per_second: 4,
            ..Default::default()
        };
        let client = RegistryClient::new(config).expect("client");
        assert_eq!(client.limiter().capacity(), 4);
        assert_eq!(client.config().max_requests_per_second, 4);
    }
}
