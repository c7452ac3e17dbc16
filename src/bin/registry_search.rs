//! CLI driver: search the business registry by location codes or around a point.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use registry_search::{
    CodeType, Confirmation, GeoArea, RegistryClient, RegistryConfig, RegistryError,
    SearchCriteria, SearchObserver, SearchOutcome, SearchReport,
};
use tracing_subscriber::EnvFilter;

/// Search the French business registry by commune or postal code.
#[derive(Parser)]
#[command(name = "registry-search", version, about)]
struct Cli {
    /// Location codes to search (INSEE commune codes unless --postal).
    #[arg(required_unless_present = "near")]
    codes: Vec<String>,

    /// Search around a point instead: `LAT,LONG,RADIUS_KM`.
    #[arg(long, value_parser = parse_area, conflicts_with_all = ["codes", "postal"])]
    near: Option<GeoArea>,

    /// Treat codes as postal codes.
    #[arg(long)]
    postal: bool,

    /// Paginate every batch in full even when the query is very broad.
    #[arg(long)]
    force: bool,

    /// Extra registry filter, e.g. `activite_principale=56.10A`. Repeatable.
    #[arg(short, long = "filter", value_parser = parse_filter)]
    filters: Vec<(String, String)>,

    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.trim().to_owned()))
        }
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}

fn parse_area(raw: &str) -> Result<GeoArea, String> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid number in `{raw}`: {e}"))?;
    match parts[..] {
        [lat, long, radius_km] => {
            let area = GeoArea::new(lat, long, radius_km);
            area.validate().map_err(|e| e.to_string())?;
            Ok(area)
        }
        _ => Err(format!("expected LAT,LONG,RADIUS_KM, got `{raw}`")),
    }
}

/// Logs search progress through `tracing`.
struct LogObserver;

impl SearchObserver for LogObserver {
    fn batch_started(&self, batch_index: usize, batch_count: usize, codes: &[String]) {
        tracing::info!(
            "batch {}/{} ({} codes)",
            batch_index + 1,
            batch_count,
            codes.len()
        );
    }

    fn first_page_fetched(
        &self,
        batch_index: usize,
        records: usize,
        total_pages: u64,
        total_results: u64,
    ) {
        tracing::info!(
            "batch {}: page 1 has {records} records, \
             {total_pages} pages / {total_results} results announced",
            batch_index + 1
        );
    }

    fn page_done(
        &self,
        batch_index: usize,
        page: u32,
        _records: usize,
        done: usize,
        pending: usize,
    ) {
        tracing::debug!(
            "batch {}: page {page} ok ({done}/{pending})",
            batch_index + 1
        );
    }

    fn page_failed(&self, batch_index: usize, page: u32, error: &RegistryError) {
        tracing::warn!("batch {}: page {page} skipped: {error}", batch_index + 1);
    }

    fn batch_skipped(&self, batch_index: usize, error: &RegistryError) {
        tracing::warn!("batch {} skipped: {error}", batch_index + 1);
    }

    fn needs_confirmation(&self, confirmation: &Confirmation) {
        tracing::warn!(
            "query too broad: ~{} results over {} pages; rerun with --force or narrow the area",
            confirmation.estimated_total_results,
            confirmation.estimated_total_pages
        );
    }

    fn search_completed(&self, report: &SearchReport) {
        let missing = report.missing_results();
        if missing > 0 {
            tracing::warn!(
                "{} businesses found; {missing} announced results were not retrieved",
                report.entities.len()
            );
        } else {
            tracing::info!("{} businesses found", report.entities.len());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("registry_search=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => RegistryConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RegistryConfig::default(),
    };
    let client = RegistryClient::new(config).context("invalid configuration")?;

    let criteria: SearchCriteria = cli.filters.into_iter().collect();
    let code_type = if cli.postal {
        CodeType::Postal
    } else {
        CodeType::Commune
    };

    let outcome = match cli.near {
        Some(area) => {
            client
                .search_near_point_with_observer(area, &criteria, cli.force, &LogObserver)
                .await
        }
        None => {
            client
                .search_with_observer(&cli.codes, &criteria, cli.force, code_type, &LogObserver)
                .await
        }
    };

    match outcome {
        SearchOutcome::Completed(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        SearchOutcome::NeedsConfirmation(confirmation) => {
            println!("{}", serde_json::to_string_pretty(&confirmation)?);
            std::process::exit(2);
        }
        SearchOutcome::HardFailure(err) => {
            Err(anyhow::Error::new(err).context("registry search failed"))
        }
    }
}
