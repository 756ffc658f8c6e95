//! Record Normalizer
//!
//! Flattens one raw OpenAlex work (arbitrary nested JSON) into one `PaperRow`
//! matching the papers table. Normalization is per-record and carries no state
//! across records.
//!
//! Coercion rules:
//! - Numeric fields accept JSON numbers or numeric strings; anything else
//!   becomes null, then the declared default where one exists.
//! - `primary_topic_score` and `citation_percentile` outside [0.0, 1.0]
//!   become null rather than errors.
//! - Empty strings count as absent.
//!
//! The only failure is a missing or empty OpenAlex identifier.

use crate::error::{PapersError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix stripped from raw work IDs (`https://openalex.org/W123` -> `W123`)
const OPENALEX_ID_PREFIX: &str = "https://openalex.org/";

/// Prefix stripped from raw DOIs
const DOI_PREFIX: &str = "https://doi.org/";

/// One flat row of the papers table, one scalar per column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperRow {
    pub openalex_id: String,       // Unique work ID, sole dedup key
    pub doi: Option<String>,       // Without https://doi.org/ prefix
    pub title: String,             // Falls back to display_name, may be empty
    pub paper_type: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub publication_year: Option<i32>,
    // Flattened primary-topic classification
    pub primary_topic_name: Option<String>,
    pub primary_topic_score: Option<f64>, // [0,1] or null
    pub subfield_name: Option<String>,
    pub field_name: Option<String>,
    pub domain_name: Option<String>,
    // Open access
    pub is_open_access: bool,
    pub oa_status: Option<String>, // gold, green, hybrid, bronze, closed
    // Citation metrics
    pub cited_by_count: i64,              // Defaults to 0
    pub citation_percentile: Option<f64>, // Normalized, [0,1] or null
    pub is_top_1_percent: bool,
    pub is_top_10_percent: bool,
    pub citation_percentile_min: Option<i64>,
    pub citation_percentile_max: Option<i64>,
    pub fwci: Option<f64>, // Field-weighted citation impact, unbounded
    // Collaboration breadth
    pub countries_count: i64,     // Defaults to 0
    pub institutions_count: i64,  // Defaults to 0
}

/// Normalize one raw work into a `PaperRow`.
///
/// The body is the full source-path to column mapping; changing what lands in
/// a column means changing exactly one line here.
///
/// # Errors
///
/// `PapersError::MalformedRecord` when the work has no usable OpenAlex ID.
pub fn normalize(raw: &Value) -> Result<PaperRow> {
    let openalex_id = string_at(raw, "/id")
        .map(|id| id.trim_start_matches(OPENALEX_ID_PREFIX).to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| PapersError::MalformedRecord("work has no OpenAlex ID".to_string()))?;

    Ok(PaperRow {
        openalex_id,
        doi: string_at(raw, "/doi").map(|d| d.trim_start_matches(DOI_PREFIX).to_string()),
        title: string_at(raw, "/title")
            .or_else(|| string_at(raw, "/display_name"))
            .unwrap_or_default(),
        paper_type: string_at(raw, "/type"),
        publication_date: string_at(raw, "/publication_date").and_then(|d| parse_date(&d)),
        publication_year: int_at(raw, "/publication_year").and_then(|y| i32::try_from(y).ok()),
        primary_topic_name: string_at(raw, "/primary_topic/display_name"),
        primary_topic_score: float_at(raw, "/primary_topic/score").filter(in_unit_interval),
        subfield_name: string_at(raw, "/primary_topic/subfield/display_name"),
        field_name: string_at(raw, "/primary_topic/field/display_name"),
        domain_name: string_at(raw, "/primary_topic/domain/display_name"),
        is_open_access: bool_at(raw, "/open_access/is_oa").unwrap_or(false),
        oa_status: string_at(raw, "/open_access/oa_status"),
        cited_by_count: int_at(raw, "/cited_by_count").unwrap_or(0),
        citation_percentile: float_at(raw, "/citation_normalized_percentile/value")
            .filter(in_unit_interval),
        is_top_1_percent: bool_at(raw, "/citation_normalized_percentile/is_in_top_1_percent")
            .unwrap_or(false),
        is_top_10_percent: bool_at(raw, "/citation_normalized_percentile/is_in_top_10_percent")
            .unwrap_or(false),
        citation_percentile_min: int_at(raw, "/cited_by_percentile_year/min"),
        citation_percentile_max: int_at(raw, "/cited_by_percentile_year/max"),
        fwci: float_at(raw, "/fwci"),
        countries_count: int_at(raw, "/countries_distinct_count").unwrap_or(0),
        institutions_count: int_at(raw, "/institutions_distinct_count").unwrap_or(0),
    })
}

/// Non-empty string at a JSON pointer path
fn string_at(raw: &Value, path: &str) -> Option<String> {
    raw.pointer(path)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Integer at a JSON pointer path, coercing floats and numeric strings
fn int_at(raw: &Value, path: &str) -> Option<i64> {
    let value = raw.pointer(path)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .or_else(|| {
            let s = value.as_str()?.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        })
}

/// Float at a JSON pointer path, coercing numeric strings
fn float_at(raw: &Value, path: &str) -> Option<f64> {
    let value = raw.pointer(path)?;
    value
        .as_f64()
        .or_else(|| value.as_str()?.trim().parse::<f64>().ok())
}

/// Boolean at a JSON pointer path
fn bool_at(raw: &Value, path: &str) -> Option<bool> {
    raw.pointer(path).and_then(Value::as_bool)
}

fn in_unit_interval(v: &f64) -> bool {
    (0.0..=1.0).contains(v)
}

/// ISO calendar date or nothing; invalid dates are dropped, not errors
fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}
