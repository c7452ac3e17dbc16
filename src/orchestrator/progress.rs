//! Progress callbacks for batch searches.
//!
//! Decouples the orchestrator from whatever presents progress to the user
//! (log lines, a terminal spinner, a web status panel). Every method has a
//! no-op default so observers only implement the transitions they care about.

use crate::error::RegistryError;
use crate::types::{Confirmation, SearchReport};

/// Receives orchestrator state transitions.
///
/// Called synchronously from the orchestrator task; implementations should
/// return quickly.
pub trait SearchObserver: Send + Sync {
    /// A batch is about to request its first page.
    fn batch_started(&self, _batch_index: usize, _batch_count: usize, _codes: &[String]) {}

    /// The first page of a batch was fetched.
    fn first_page_fetched(
        &self,
        _batch_index: usize,
        _records: usize,
        _total_pages: u64,
        _total_results: u64,
    ) {
    }

    /// A page in 2..N was fetched. `done` counts pages finished so far out of `pending`.
    fn page_done(
        &self,
        _batch_index: usize,
        _page: u32,
        _records: usize,
        _done: usize,
        _pending: usize,
    ) {
    }

    /// A page in 2..N was lost after its retries.
    fn page_failed(&self, _batch_index: usize, _page: u32, _error: &RegistryError) {}

    /// A batch was skipped because its first page failed.
    fn batch_skipped(&self, _batch_index: usize, _error: &RegistryError) {}

    /// A batch finished; `records` counts what it contributed.
    fn batch_done(&self, _batch_index: usize, _records: usize) {}

    /// The search stopped because the query is too broad.
    fn needs_confirmation(&self, _confirmation: &Confirmation) {}

    /// The search stopped on a fatal first-page failure.
    fn search_failed(&self, _error: &RegistryError) {}

    /// The search finished.
    fn search_completed(&self, _report: &SearchReport) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SearchObserver for NoopObserver {}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::sync::Mutex;

    /// Observer that records every event as a short string, for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<String> {
            self.events.lock().expect("lock").clone()
        }

        fn push(&self, event: String) {
            self.events.lock().expect("lock").push(event);
        }
    }

    impl SearchObserver for RecordingObserver {
        fn batch_started(&self, batch_index: usize, _batch_count: usize, _codes: &[String]) {
            self.push(format!("batch_started:{batch_index}"));
        }

        fn first_page_fetched(
            &self,
            batch_index: usize,
            _records: usize,
            total_pages: u64,
            _total_results: u64,
        ) {
            self.push(format!("first_page:{batch_index}:{total_pages}"));
        }

        fn page_done(
            &self,
            batch_index: usize,
            page: u32,
            _records: usize,
            _done: usize,
            _pending: usize,
        ) {
            self.push(format!("page_done:{batch_index}:{page}"));
        }

        fn page_failed(&self, batch_index: usize, page: u32, _error: &RegistryError) {
            self.push(format!("page_failed:{batch_index}:{page}"));
        }

        fn batch_skipped(&self, batch_index: usize, _error: &RegistryError) {
            self.push(format!("batch_skipped:{batch_index}"));
        }

        fn batch_done(&self, batch_index: usize, records: usize) {
            self.push(format!("batch_done:{batch_index}:{records}"));
        }

        fn needs_confirmation(&self, confirmation: &Confirmation) {
            self.push(format!("needs_confirmation:{}", confirmation.estimated_total_pages));
        }

        fn search_failed(&self, _error: &RegistryError) {
            self.push("search_failed".to_owned());
        }

        fn search_completed(&self, report: &SearchReport) {
            self.push(format!("search_completed:{}", report.entities.len()));
        }
    }
}
