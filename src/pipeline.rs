//! Fetch Orchestrator
//!
//! Drives one pipeline run: resolve the topic, walk works pages in source
//! order (field filter first, then subfield, skipping works already seen),
//! normalize and load each page as it arrives, snapshot the raw works, then
//! run the quality checks.
//!
//! Pages already loaded stay committed when a later page fails; the fetch
//! error surfaces after a partial snapshot is written, so the staging file
//! always mirrors what reached the table.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{Days, Local, NaiveDate};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::Result;
use crate::normalize::normalize;
use crate::openalex::{OpenAlexClient, PagedWorks, RetryPolicy, MAX_PER_PAGE};
use crate::quality::{self, QualityReport};
use crate::snapshot;
use crate::store::{LoadReport, PaperStore};

/// Settings for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub topic: String,
    /// Inclusive publication-date window
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub per_page: usize,
    pub retry: RetryPolicy,
    pub snapshot_dir: PathBuf,
    pub skip_checks: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        let today = Local::now().date_naive();
        Self {
            topic: "artificial intelligence".to_string(),
            date_from: today - Days::new(3),
            date_to: today,
            per_page: MAX_PER_PAGE,
            retry: RetryPolicy::default(),
            snapshot_dir: PathBuf::from("temp"),
            skip_checks: false,
        }
    }
}

/// What one run did, for the CLI summary
#[derive(Debug)]
pub struct RunSummary {
    pub topic: String,
    pub pages_fetched: usize,
    /// Unique works fetched across both filters
    pub works_fetched: usize,
    pub report: LoadReport,
    /// Written only when the run fetched anything
    pub snapshot_path: Option<PathBuf>,
    pub quality: Option<QualityReport>,
}

/// Run the full pipeline against an open store.
///
/// An empty result set is a successful no-op. A page failing after retries
/// aborts the remainder; everything loaded before it stays committed.
pub async fn run(
    client: &OpenAlexClient,
    store: &PaperStore,
    options: &PipelineOptions,
) -> Result<RunSummary> {
    info!(
        topic = %options.topic,
        from = %options.date_from,
        to = %options.date_to,
        "Starting pipeline run"
    );

    let topic_filter = client.resolve_topic(&options.topic).await?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut raw_works: Vec<Value> = Vec::new();
    let mut report = LoadReport::default();
    let mut pages_fetched = 0usize;

    for filter_expr in topic_filter.filter_exprs(options.date_from, options.date_to) {
        let mut pager = PagedWorks::new(client, &options.retry, filter_expr, options.per_page);
        loop {
            let page_works = match pager.next_page().await {
                Ok(Some(works)) => works,
                Ok(None) => break,
                Err(e) => {
                    // Keep the audit trail aligned with what was committed
                    if !raw_works.is_empty() {
                        match snapshot::save(
                            &options.snapshot_dir,
                            &options.topic,
                            options.date_from,
                            options.date_to,
                            &raw_works,
                        ) {
                            Ok(path) => warn!(
                                snapshot = %path.display(),
                                "Run aborted, partial snapshot written"
                            ),
                            Err(save_err) => warn!(
                                error = %save_err,
                                "Run aborted and the partial snapshot failed too"
                            ),
                        }
                    }
                    return Err(e);
                }
            };
            pages_fetched += 1;

            let fresh = dedupe_page(page_works, &mut seen);
            if fresh.is_empty() {
                continue;
            }
            report.merge(ingest(store, &fresh)?);
            raw_works.extend(fresh);
            info!(
                pages = pages_fetched,
                unique_works = raw_works.len(),
                "Page ingested"
            );
        }
    }

    let snapshot_path = if raw_works.is_empty() {
        info!("No works in the window, nothing to snapshot");
        None
    } else {
        Some(snapshot::save(
            &options.snapshot_dir,
            &options.topic,
            options.date_from,
            options.date_to,
            &raw_works,
        )?)
    };

    let quality = if options.skip_checks {
        None
    } else {
        Some(quality::run_checks(store)?)
    };

    info!(
        works = raw_works.len(),
        upserted = report.upserted,
        malformed = report.malformed,
        rejected = report.failures.len(),
        "Pipeline run complete"
    );
    Ok(RunSummary {
        topic: options.topic.clone(),
        pages_fetched,
        works_fetched: raw_works.len(),
        report,
        snapshot_path,
        quality,
    })
}

/// Fetch and dedupe every page without touching a store, for fetch-only runs
pub async fn fetch_all(client: &OpenAlexClient, options: &PipelineOptions) -> Result<Vec<Value>> {
    let topic_filter = client.resolve_topic(&options.topic).await?;

    let mut seen = HashSet::new();
    let mut raw_works = Vec::new();
    for filter_expr in topic_filter.filter_exprs(options.date_from, options.date_to) {
        let mut pager = PagedWorks::new(client, &options.retry, filter_expr, options.per_page);
        while let Some(works) = pager.next_page().await? {
            raw_works.extend(dedupe_page(works, &mut seen));
        }
    }
    Ok(raw_works)
}

/// Normalize one batch of raw works and load it. Malformed records are
/// counted and logged, never fatal; per-row rejections ride in the report.
pub fn ingest(store: &PaperStore, works: &[Value]) -> Result<LoadReport> {
    let mut rows = Vec::with_capacity(works.len());
    let mut malformed = 0;
    for work in works {
        match normalize(work) {
            Ok(row) => rows.push(row),
            Err(e) => {
                malformed += 1;
                warn!(error = %e, "Skipping raw work");
            }
        }
    }

    let mut report = store.upsert_batch(&rows)?;
    report.malformed = malformed;
    Ok(report)
}

/// Keep only works whose raw ID has not been seen in this run.
/// Works without an ID pass through for the normalizer to report.
fn dedupe_page(works: Vec<Value>, seen: &mut HashSet<String>) -> Vec<Value> {
    works
        .into_iter()
        .filter(|work| match work.get("id").and_then(Value::as_str) {
            Some(id) => seen.insert(id.to_string()),
            None => true,
        })
        .collect()
}
