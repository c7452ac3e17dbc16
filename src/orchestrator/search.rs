//! Batch search orchestrator: first page, scope check, bounded page fan-out, merge.
//!
//! Batches are processed one after the other. Within a batch, page 1 is
//! fetched alone; it tells how many pages the query spans. A non-forced
//! search stops right there when the registry cannot serve the whole result
//! set. Otherwise pages 2..N are fetched concurrently, at most
//! `max_requests_per_second` at a time, and every record collected is
//! merged by SIREN once all batches are done. Records enter the merge in
//! batch order then page order, whatever order the pages arrived in.
//!
//! A radius search runs the same protocol as a single batch against the
//! `near_point` endpoint.

use futures::stream::{self, StreamExt};

use crate::config::RegistryConfig;
use crate::fetcher::{Endpoint, PageRequest, PageSource};
use crate::types::{
    BusinessEntity, CodeType, Confirmation, GeoArea, SearchCriteria, SearchOutcome, SearchReport,
    SkippedBatch, SkippedPage,
};

use super::dedup::merge_entities;
use super::progress::{NoopObserver, SearchObserver};

/// Build the parameters shared by every request of a search.
///
/// Configured defaults come first, the caller's criteria override them,
/// and `per_page` always comes from the configuration. `page`, the
/// location-code keys and the point-search keys are set per request and
/// are dropped from `criteria`.
pub fn base_params(config: &RegistryConfig, criteria: &SearchCriteria) -> Vec<(String, String)> {
    let mut merged = config.default_params.clone();
    for (key, value) in criteria {
        if is_reserved(key) {
            tracing::debug!(%key, "ignoring reserved criteria key");
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged.insert("per_page".to_owned(), config.results_per_page.to_string());
    merged.into_iter().collect()
}

fn is_reserved(key: &str) -> bool {
    key == "page"
        || key == "per_page"
        || key == CodeType::Commune.param_key()
        || key == CodeType::Postal.param_key()
        || matches!(key, "lat" | "long" | "radius")
}

/// Query state for one batch: a group of location codes, or one point search.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchContext {
    pub index: usize,
    /// Location codes of the batch; empty for a point search.
    pub codes: Vec<String>,
    endpoint: Endpoint,
    params: Vec<(String, String)>,
}

impl BatchContext {
    pub fn new(
        index: usize,
        codes: &[String],
        base_params: &[(String, String)],
        code_type: CodeType,
    ) -> Self {
        let mut params = base_params.to_vec();
        params.push((code_type.param_key().to_owned(), codes.join(",")));
        Self {
            index,
            codes: codes.to_vec(),
            endpoint: Endpoint::Search,
            params,
        }
    }

    /// The single batch of a radius search around `area`.
    pub fn near_point(area: &GeoArea, base_params: &[(String, String)]) -> Self {
        let mut params = base_params.to_vec();
        params.extend(area.query_params());
        Self {
            index: 0,
            codes: Vec::new(),
            endpoint: Endpoint::NearPoint,
            params,
        }
    }

    /// The request for `page` of this batch.
    pub fn page_request(&self, page: u32, timeout: std::time::Duration) -> PageRequest {
        let mut params = self.params.clone();
        params.push(("page".to_owned(), page.to_string()));
        PageRequest {
            endpoint: self.endpoint,
            batch_index: self.index,
            page,
            params,
            timeout,
        }
    }
}

/// Runs the batched search protocol against a [`PageSource`].
pub struct BatchSearch<'a, S> {
    source: &'a S,
    config: &'a RegistryConfig,
    observer: &'a dyn SearchObserver,
}

impl<'a, S: PageSource> BatchSearch<'a, S> {
    pub fn new(source: &'a S, config: &'a RegistryConfig) -> Self {
        Self {
            source,
            config,
            observer: &NoopObserver,
        }
    }

    /// Report progress to `observer`.
    pub fn with_observer(mut self, observer: &'a dyn SearchObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Run the search over `batches` of location codes.
    ///
    /// Only a failed first page of the first batch of a non-forced search
    /// is fatal. Every other failure is recorded in the report and the
    /// search carries on.
    pub async fn run(
        &self,
        batches: &[Vec<String>],
        base_params: &[(String, String)],
        force_full_fetch: bool,
        code_type: CodeType,
    ) -> SearchOutcome {
        tracing::debug!(%code_type, "building batch queries");
        let contexts: Vec<BatchContext> = batches
            .iter()
            .enumerate()
            .map(|(index, codes)| BatchContext::new(index, codes, base_params, code_type))
            .collect();
        self.run_contexts(&contexts, force_full_fetch).await
    }

    /// Run a radius search around `area` as a single batch.
    pub async fn run_near_point(
        &self,
        area: &GeoArea,
        base_params: &[(String, String)],
        force_full_fetch: bool,
    ) -> SearchOutcome {
        tracing::debug!(%area, "building point query");
        let context = BatchContext::near_point(area, base_params);
        self.run_contexts(std::slice::from_ref(&context), force_full_fetch).await
    }

    /// Run the batch protocol over prepared batch queries, in order.
    pub async fn run_contexts(
        &self,
        contexts: &[BatchContext],
        force_full_fetch: bool,
    ) -> SearchOutcome {
        let max_pages = self.config.api_max_pages();
        let mut accumulated: Vec<BusinessEntity> = Vec::new();
        let mut report = SearchReport::default();

        tracing::info!(
            batches = contexts.len(),
            force_full_fetch,
            "starting registry search"
        );

        for context in contexts {
            let index = context.index;
            let codes = &context.codes;
            self.observer.batch_started(index, contexts.len(), codes);
            tracing::debug!(batch = index, codes = ?codes, "probing batch");

            let first_request = context.page_request(1, self.config.first_page_timeout());

            let first = match self.source.fetch_page(&first_request).await {
                Ok(page) => page,
                Err(err) if index == 0 && !force_full_fetch => {
                    tracing::warn!(error = %err, "first batch failed, aborting search");
                    self.observer.search_failed(&err);
                    return SearchOutcome::HardFailure(err);
                }
                Err(err) => {
                    tracing::warn!(
                        batch = index,
                        error = %err,
                        "first page failed, skipping batch"
                    );
                    self.observer.batch_skipped(index, &err);
                    report.skipped_batches.push(SkippedBatch {
                        batch_index: index,
                        codes: codes.clone(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            self.observer.first_page_fetched(
                index,
                first.results.len(),
                first.total_pages,
                first.total_results,
            );

            if first.is_empty_query() {
                tracing::debug!(batch = index, "batch has no results");
                self.observer.batch_done(index, 0);
                continue;
            }

            if !force_full_fetch && first.total_pages >= max_pages {
                tracing::info!(
                    batch = index,
                    total_pages = first.total_pages,
                    total_results = first.total_results,
                    max_pages,
                    "query too broad, confirmation needed"
                );
                let confirmation = Confirmation {
                    page1_results: first.results,
                    estimated_total_pages: first.total_pages,
                    estimated_total_results: first.total_results,
                    query_params_used: first_request.params,
                };
                self.observer.needs_confirmation(&confirmation);
                return SearchOutcome::NeedsConfirmation(confirmation);
            }

            report.announced_results += first.total_results;
            let mut batch_records = first.results.len();
            accumulated.extend(first.results);

            let last_page = u32::try_from(first.total_pages.min(max_pages)).unwrap_or(u32::MAX);
            if last_page >= 2 {
                let (records, failed) = self.fetch_remaining(context, last_page).await;
                batch_records += records.len();
                accumulated.extend(records);
                report.skipped_pages.extend(failed);
            }

            tracing::info!(batch = index, records = batch_records, "batch done");
            self.observer.batch_done(index, batch_records);
        }

        report.raw_records = accumulated.len();
        report.entities = merge_entities(accumulated);

        if report.is_partial() {
            tracing::warn!(
                skipped_batches = report.skipped_batches.len(),
                skipped_pages = report.skipped_pages.len(),
                missing = report.missing_results(),
                "search completed with gaps"
            );
        }
        tracing::info!(
            entities = report.entities.len(),
            raw_records = report.raw_records,
            "registry search completed"
        );
        self.observer.search_completed(&report);
        SearchOutcome::Completed(report)
    }

    /// Fetch pages `2..=last_page` of a batch on a bounded set of concurrent workers.
    ///
    /// Returns the records of every page that succeeded, in page order, and
    /// one entry per page that was lost.
    async fn fetch_remaining(
        &self,
        context: &BatchContext,
        last_page: u32,
    ) -> (Vec<BusinessEntity>, Vec<SkippedPage>) {
        let pending = (last_page - 1) as usize;
        let workers = self.config.max_requests_per_second.max(1);
        let timeout = self.config.page_timeout();
        tracing::debug!(
            batch = context.index,
            pending,
            workers,
            "fetching remaining pages"
        );

        let mut pages = stream::iter(2..=last_page)
            .map(|page| {
                let request = context.page_request(page, timeout);
                async move {
                    let outcome = self.source.fetch_page(&request).await;
                    (page, outcome)
                }
            })
            .buffer_unordered(workers);

        let mut fetched: Vec<(u32, Vec<BusinessEntity>)> = Vec::with_capacity(pending);
        let mut failed = Vec::new();
        let mut done = 0;
        while let Some((page, outcome)) = pages.next().await {
            done += 1;
            match outcome {
                Ok(result) => {
                    self.observer
                        .page_done(context.index, page, result.results.len(), done, pending);
                    fetched.push((page, result.results));
                }
                Err(err) => {
                    tracing::warn!(batch = context.index, page, error = %err, "page lost");
                    self.observer.page_failed(context.index, page, &err);
                    failed.push(SkippedPage {
                        batch_index: context.index,
                        page,
                        error: err.to_string(),
                    });
                }
            }
        }

        fetched.sort_unstable_by_key(|(page, _)| *page);
        failed.sort_unstable_by_key(|skipped: &SkippedPage| skipped.page);
        let records: Vec<BusinessEntity> = fetched
            .into_iter()
            .flat_map(|(_, results)| results)
            .collect();
        (records, failed)
    }
}

/// Convenience wrapper: run a search over `batches` without progress reporting.
pub async fn run_batches<S: PageSource>(
    source: &S,
    config: &RegistryConfig,
    batches: &[Vec<String>],
    criteria: &SearchCriteria,
    force_full_fetch: bool,
    code_type: CodeType,
) -> SearchOutcome {
    let params = base_params(config, criteria);
    BatchSearch::new(source, config)
        .run(batches, &params, force_full_fetch, code_type)
        .await
}
