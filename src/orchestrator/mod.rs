//! Search orchestrator: batched probing, bounded page fan-out, merge.
//!
//! This module drives the batch protocol against a page source, merges
//! the records it collects by SIREN, and reports progress to an optional
//! observer.

pub mod dedup;
pub mod progress;
pub mod search;
