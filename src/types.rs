//! Core types for registry pages, business entities and search outcomes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::RegistryError;

/// Static filter parameters merged into every request of a search.
pub type SearchCriteria = BTreeMap<String, String>;

/// Which kind of location code the caller supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeType {
    /// INSEE commune code, sent as `code_commune`.
    Commune,
    /// Postal code, sent as `code_postal`.
    Postal,
}

impl CodeType {
    /// Query parameter under which the joined codes are sent.
    pub fn param_key(&self) -> &'static str {
        match self {
            Self::Commune => "code_commune",
            Self::Postal => "code_postal",
        }
    }
}

impl fmt::Display for CodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commune => f.write_str("commune"),
            Self::Postal => f.write_str("postal"),
        }
    }
}

/// Largest radius the registry accepts for a point search, in kilometres.
pub const MAX_RADIUS_KM: f64 = 50.0;

/// A circular area around a point, for radius searches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoArea {
    /// Latitude in decimal degrees (WGS 84).
    pub lat: f64,
    /// Longitude in decimal degrees (WGS 84).
    pub long: f64,
    /// Radius in kilometres.
    pub radius_km: f64,
}

impl GeoArea {
    pub fn new(lat: f64, long: f64, radius_km: f64) -> Self {
        Self {
            lat,
            long,
            radius_km,
        }
    }

    /// Checks the coordinates and radius before anything is sent.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidQuery`] for a latitude outside
    /// `[-90, 90]`, a longitude outside `[-180, 180]`, or a radius outside
    /// `(0, 50]` km.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(RegistryError::InvalidQuery(format!(
                "latitude {} is out of range",
                self.lat
            )));
        }
        if !self.long.is_finite() || !(-180.0..=180.0).contains(&self.long) {
            return Err(RegistryError::InvalidQuery(format!(
                "longitude {} is out of range",
                self.long
            )));
        }
        if !self.radius_km.is_finite() || self.radius_km <= 0.0 || self.radius_km > MAX_RADIUS_KM {
            return Err(RegistryError::InvalidQuery(format!(
                "radius must be within 0-{MAX_RADIUS_KM} km, got {}",
                self.radius_km
            )));
        }
        Ok(())
    }

    /// The `lat`, `long` and `radius` query parameters.
    pub fn query_params(&self) -> [(String, String); 3] {
        [
            ("lat".to_owned(), self.lat.to_string()),
            ("long".to_owned(), self.long.to_string()),
            ("radius".to_owned(), self.radius_km.to_string()),
        ]
    }
}

impl fmt::Display for GeoArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} km around ({:.4}, {:.4})",
            self.radius_km, self.lat, self.long
        )
    }
}

/// One physical location of a business, as matched by the query filters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EstablishmentMatch {
    /// Establishment identifier (SIRET).
    #[serde(default)]
    pub siret: Option<String>,
    #[serde(default)]
    pub adresse: Option<String>,
    #[serde(default)]
    pub activite_principale: Option<String>,
    /// `A` for active, `F` for closed.
    #[serde(default)]
    pub etat_administratif: Option<String>,
    #[serde(default)]
    pub tranche_effectif_salarie: Option<String>,
    #[serde(default)]
    pub est_siege: Option<bool>,
    /// Every other field returned by the registry, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A legal business entity returned by the registry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BusinessEntity {
    /// Business identifier (SIREN). Records without one are never merged.
    #[serde(default)]
    pub siren: Option<String>,
    #[serde(default)]
    pub nom_complet: Option<String>,
    #[serde(default)]
    pub nom_raison_sociale: Option<String>,
    #[serde(default)]
    pub date_creation: Option<String>,
    #[serde(default)]
    pub activite_principale: Option<String>,
    #[serde(default)]
    pub tranche_effectif_salarie: Option<String>,
    #[serde(default)]
    pub nombre_etablissements_ouverts: Option<u64>,
    /// Yearly financial figures keyed by year, as returned by the registry.
    #[serde(default)]
    pub finances: Option<serde_json::Value>,
    /// Establishments matching the query. A missing or `null` list is empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub matching_etablissements: Vec<EstablishmentMatch>,
    /// Every other field returned by the registry, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<EstablishmentMatch>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<EstablishmentMatch>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default, deserialize_with = "null_as_empty_entities")]
    results: Vec<BusinessEntity>,
    #[serde(default)]
    total_pages: Option<u64>,
    #[serde(default)]
    total_results: Option<u64>,
}

fn null_as_empty_entities<'de, D>(deserializer: D) -> Result<Vec<BusinessEntity>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<BusinessEntity>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One page of registry search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPage")]
pub struct SearchPage {
    pub results: Vec<BusinessEntity>,
    /// Pages announced by the registry for the whole query. Defaults to 1.
    pub total_pages: u64,
    /// Results announced by the registry. Defaults to the page's record count.
    pub total_results: u64,
}

impl From<RawPage> for SearchPage {
    fn from(raw: RawPage) -> Self {
        let count = raw.results.len() as u64;
        Self {
            total_pages: raw.total_pages.unwrap_or(1),
            total_results: raw.total_results.unwrap_or(count),
            results: raw.results,
        }
    }
}

impl SearchPage {
    /// A page with no records that announces no results at all.
    pub fn is_empty_query(&self) -> bool {
        self.results.is_empty() && self.total_results == 0
    }
}

/// A batch whose first page failed, so it was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedBatch {
    pub batch_index: usize,
    pub codes: Vec<String>,
    pub error: String,
}

/// A page (2..N) that failed after its retries and was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedPage {
    pub batch_index: usize,
    pub page: u32,
    pub error: String,
}

/// Result of a search that ran to completion, possibly with gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchReport {
    /// Unique business entities in first-seen order.
    pub entities: Vec<BusinessEntity>,
    /// Raw records retrieved before merging.
    pub raw_records: usize,
    /// Sum of `total_results` announced for the batches that were processed.
    pub announced_results: u64,
    pub skipped_batches: Vec<SkippedBatch>,
    pub skipped_pages: Vec<SkippedPage>,
}

impl SearchReport {
    /// Whether any batch or page was lost along the way.
    pub fn is_partial(&self) -> bool {
        !self.skipped_batches.is_empty() || !self.skipped_pages.is_empty()
    }

    /// How many announced results were not retrieved.
    pub fn missing_results(&self) -> u64 {
        self.announced_results.saturating_sub(self.raw_records as u64)
    }
}

/// Returned when a query is too broad to be paginated in full.
///
/// The caller decides whether to force the full fetch or to break the
/// query down into smaller sub-regions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Confirmation {
    /// Records of the first page, which revealed the query size.
    pub page1_results: Vec<BusinessEntity>,
    pub estimated_total_pages: u64,
    pub estimated_total_results: u64,
    /// Exact parameters sent for that page, `page` included.
    pub query_params_used: Vec<(String, String)>,
}

/// Outcome of a top-level registry search.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// All batches were processed; failed pages or batches are listed in the report.
    Completed(SearchReport),
    /// The query is too broad; nothing past its first page was fetched.
    NeedsConfirmation(Confirmation),
    /// The first page of the first batch failed on a non-forced search.
    HardFailure(RegistryError),
}

impl SearchOutcome {
    /// The completed report, if any.
    pub fn into_report(self) -> Option<SearchReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}
