//! rustpapers - OpenAlex Papers Tracking Pipeline
//!
//! A Rust microservice for fetching recent works from OpenAlex by topic,
//! snapshotting the raw responses, and loading them into a deduplicated
//! SQLite table that feeds the dashboard.
//!
//! ## Usage
//!
//! ### Full pipeline
//! ```bash
//! rustpapers run --topic "artificial intelligence" --days 3
//! ```
//!
//! ### Fetch-only / load-only
//! ```bash
//! rustpapers fetch --topic "artificial intelligence" --days 7
//! rustpapers load temp/papers_20260101_000000_artificial_intelligence.json
//! ```
//!
//! ### Dashboard reads
//! ```bash
//! rustpapers stats
//! rustpapers search "transformer" --limit 10
//! rustpapers export --output papers.csv
//! ```

use anyhow::{Context, Result};
use chrono::{Days, Local, NaiveDate};
use clap::{Parser, Subcommand};
use rustpapers::openalex::{OpenAlexClient, RetryPolicy, MAX_PER_PAGE};
use rustpapers::pipeline::{self, PipelineOptions};
use rustpapers::store::{default_db_path, PaperStore};
use rustpapers::{quality, snapshot, stats};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// OpenAlex Papers Tracking Pipeline - Rust Microservice
#[derive(Parser)]
#[command(name = "rustpapers")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// SQLite database path (defaults to the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch recent works, snapshot them, and load the database in one run
    Run {
        /// Topic to track
        #[arg(long, default_value = "artificial intelligence")]
        topic: String,

        /// Fetch works published in the last N days
        #[arg(long, default_value = "3")]
        days: u64,

        /// Window start (YYYY-MM-DD, overrides --days)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Window end (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Directory for raw JSON snapshots
        #[arg(long, default_value = "temp")]
        snapshot_dir: PathBuf,

        /// Skip the post-load quality checks
        #[arg(long)]
        skip_checks: bool,

        /// Retry attempts per page
        #[arg(long, default_value = "3")]
        max_retries: u32,

        /// Contact email for the OpenAlex polite pool
        #[arg(long)]
        mailto: Option<String>,
    },

    /// Fetch and snapshot without touching the database
    Fetch {
        /// Topic to track
        #[arg(long, default_value = "artificial intelligence")]
        topic: String,

        /// Fetch works published in the last N days
        #[arg(long, default_value = "3")]
        days: u64,

        /// Window start (YYYY-MM-DD, overrides --days)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Window end (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Directory for raw JSON snapshots
        #[arg(long, default_value = "temp")]
        snapshot_dir: PathBuf,

        /// Retry attempts per page
        #[arg(long, default_value = "3")]
        max_retries: u32,

        /// Contact email for the OpenAlex polite pool
        #[arg(long)]
        mailto: Option<String>,
    },

    /// Load a previously saved snapshot file into the database
    Load {
        /// Snapshot JSON file
        snapshot: PathBuf,
    },

    /// Create the database file and schema
    InitDb,

    /// Run data quality checks against the loaded table
    Check,

    /// Print dashboard statistics
    Stats,

    /// Search paper titles (fuzzy, trigram-backed)
    Search {
        /// Title text to look for
        query: String,

        /// Maximum hits to print
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Export all rows to CSV
    Export {
        /// Output CSV path
        #[arg(short, long, default_value = "papers.csv")]
        output: PathBuf,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let db_path = cli.db.unwrap_or_else(default_db_path);
    info!(db = %db_path.display(), "Using database");

    match cli.command {
        Commands::Run {
            topic,
            days,
            from,
            to,
            snapshot_dir,
            skip_checks,
            max_retries,
            mailto,
        } => {
            let options =
                build_options(topic, days, from, to, snapshot_dir, skip_checks, max_retries)?;
            run_pipeline(&db_path, options, mailto).await
        }
        Commands::Fetch {
            topic,
            days,
            from,
            to,
            snapshot_dir,
            max_retries,
            mailto,
        } => {
            let options = build_options(topic, days, from, to, snapshot_dir, true, max_retries)?;
            run_fetch(options, mailto).await
        }
        Commands::Load { snapshot } => run_load(&db_path, &snapshot),
        Commands::InitDb => run_init_db(&db_path),
        Commands::Check => run_check(&db_path),
        Commands::Stats => run_stats(&db_path),
        Commands::Search { query, limit } => run_search(&db_path, &query, limit),
        Commands::Export { output } => run_export(&db_path, &output),
    }
}

// ============================================================================
// Pipeline
// ============================================================================

async fn run_pipeline(db_path: &Path, options: PipelineOptions, mailto: Option<String>) -> Result<()> {
    let client = build_client(mailto)?;
    let store = PaperStore::open(db_path).context("Failed to open the database")?;

    println!("\n--- Stage 1: Fetch & Load ---");
    println!(
        "Topic: {} | Window: {} to {}",
        options.topic, options.date_from, options.date_to
    );

    let summary = pipeline::run(&client, &store, &options).await?;

    println!("Pages fetched: {}", summary.pages_fetched);
    println!("Unique works: {}", summary.works_fetched);
    println!(
        "Upserted: {} | Malformed: {} | Rejected: {}",
        summary.report.upserted,
        summary.report.malformed,
        summary.report.failures.len()
    );
    for failure in &summary.report.failures {
        println!("  rejected: {}", failure);
    }
    if let Some(path) = &summary.snapshot_path {
        println!("Snapshot: {}", path.display());
    }

    if let Some(report) = &summary.quality {
        println!("\n--- Stage 2: Quality Checks ---");
        print_quality(report);
    }

    println!("\n✓ Pipeline complete. Database: {}", db_path.display());
    Ok(())
}

async fn run_fetch(options: PipelineOptions, mailto: Option<String>) -> Result<()> {
    let client = build_client(mailto)?;

    println!("\n--- Stage 1: Fetch ---");
    println!(
        "Topic: {} | Window: {} to {}",
        options.topic, options.date_from, options.date_to
    );

    let works = pipeline::fetch_all(&client, &options).await?;
    if works.is_empty() {
        println!("No works published in the window.");
        return Ok(());
    }

    let path = snapshot::save(
        &options.snapshot_dir,
        &options.topic,
        options.date_from,
        options.date_to,
        &works,
    )?;
    println!("Fetched {} works.", works.len());
    println!("Snapshot: {}", path.display());
    Ok(())
}

fn run_load(db_path: &Path, snapshot_path: &Path) -> Result<()> {
    let store = PaperStore::open(db_path).context("Failed to open the database")?;

    println!("\n--- Stage 1: Load Snapshot ---");
    let works = snapshot::load(snapshot_path)?;
    println!("Snapshot works: {}", works.len());

    let report = pipeline::ingest(&store, &works)?;
    println!(
        "Upserted: {} | Malformed: {} | Rejected: {}",
        report.upserted,
        report.malformed,
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  rejected: {}", failure);
    }
    println!("Rows in table: {}", store.count()?);
    Ok(())
}

// ============================================================================
// Database Commands
// ============================================================================

fn run_init_db(db_path: &Path) -> Result<()> {
    let store = PaperStore::open(db_path).context("Failed to create the database")?;
    println!(
        "Database ready: {} ({} rows)",
        db_path.display(),
        store.count()?
    );
    Ok(())
}

fn run_check(db_path: &Path) -> Result<()> {
    let store = PaperStore::open(db_path).context("Failed to open the database")?;
    let report = quality::run_checks(&store)?;
    print_quality(&report);
    if !report.passed() {
        anyhow::bail!("Data quality checks failed");
    }
    Ok(())
}

fn run_stats(db_path: &Path) -> Result<()> {
    let store = PaperStore::open(db_path).context("Failed to open the database")?;

    let overview = stats::overview(&store)?;
    println!("\n--- Overview ---");
    println!("Total papers: {}", overview.total_papers);
    println!("Open access: {}", overview.open_access);
    println!("Top 1% cited: {}", overview.top_1_percent);
    println!("Top 10% cited: {}", overview.top_10_percent);
    if let Some(avg) = overview.avg_citations {
        println!(
            "Citations: avg {:.2}, median {:.1}, max {}",
            avg,
            overview.median_citations.unwrap_or(0.0),
            overview.max_citations.unwrap_or(0)
        );
    }

    let years = stats::papers_by_year(&store)?;
    if !years.is_empty() {
        println!("\n--- Papers by Year ---");
        for y in years {
            println!("  {}: {}", y.year, y.count);
        }
    }

    let fields = stats::top_fields(&store, 10)?;
    if !fields.is_empty() {
        println!("\n--- Top Fields ---");
        for f in fields {
            println!("  {}: {}", f.name, f.count);
        }
    }

    let subfields = stats::top_subfields(&store, 10)?;
    if !subfields.is_empty() {
        println!("\n--- Top Subfields ---");
        for s in subfields {
            println!("  {}: {}", s.name, s.count);
        }
    }

    let oa = stats::oa_breakdown(&store)?;
    if !oa.is_empty() {
        println!("\n--- Open Access ---");
        for slice in oa {
            println!("  {}: {} ({:.1}%)", slice.status, slice.count, slice.share);
        }
    }

    let top = stats::top_papers(&store, 10)?;
    if !top.is_empty() {
        println!("\n--- Most Cited ---");
        for paper in top {
            let year = paper
                .publication_year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} citations | {} | {}",
                paper.cited_by_count, year, paper.title
            );
        }
    }

    let collab = stats::collaboration(&store)?;
    println!("\n--- Collaboration ---");
    if let Some(avg) = collab.avg_countries {
        println!(
            "Countries per paper: avg {:.2}, max {}",
            avg,
            collab.max_countries.unwrap_or(0)
        );
    }
    if let Some(avg) = collab.avg_institutions {
        println!(
            "Institutions per paper: avg {:.2}, max {}",
            avg,
            collab.max_institutions.unwrap_or(0)
        );
    }
    println!("Multi-country papers: {}", collab.multi_country);

    let fwci = stats::fwci(&store)?;
    if fwci.with_fwci > 0 {
        println!("\n--- FWCI ---");
        println!(
            "avg {:.2}, median {:.2}, max {:.2} ({} papers)",
            fwci.avg.unwrap_or(0.0),
            fwci.median.unwrap_or(0.0),
            fwci.max.unwrap_or(0.0),
            fwci.with_fwci
        );
    }

    Ok(())
}

fn run_search(db_path: &Path, query: &str, limit: usize) -> Result<()> {
    let store = PaperStore::open(db_path).context("Failed to open the database")?;
    let hits = store.search_titles(query, limit)?;
    if hits.is_empty() {
        println!("No titles match '{}'.", query);
        return Ok(());
    }
    println!("Found {} matching titles:", hits.len());
    for hit in hits {
        let year = hit
            .publication_year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  [{}] {} ({}, {} citations)",
            hit.openalex_id, hit.title, year, hit.cited_by_count
        );
    }
    Ok(())
}

fn run_export(db_path: &Path, output: &Path) -> Result<()> {
    let store = PaperStore::open(db_path).context("Failed to open the database")?;
    let rows = store.all_rows()?;
    save_csv(output, &rows)?;
    println!("Exported {} rows.", rows.len());
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn build_options(
    topic: String,
    days: u64,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    snapshot_dir: PathBuf,
    skip_checks: bool,
    max_retries: u32,
) -> Result<PipelineOptions> {
    let today = Local::now().date_naive();
    let date_to = to.unwrap_or(today);
    let date_from = match from {
        Some(date) => date,
        None => date_to
            .checked_sub_days(Days::new(days))
            .context("Invalid --days value")?,
    };
    Ok(PipelineOptions {
        topic,
        date_from,
        date_to,
        per_page: MAX_PER_PAGE,
        retry: RetryPolicy {
            max_attempts: max_retries,
            ..RetryPolicy::default()
        },
        snapshot_dir,
        skip_checks,
    })
}

fn build_client(mailto: Option<String>) -> Result<OpenAlexClient> {
    let client = match mailto {
        Some(addr) => OpenAlexClient::with_mailto(&addr)?,
        None => OpenAlexClient::new()?,
    };
    Ok(client)
}

fn print_quality(report: &quality::QualityReport) {
    println!("Rows checked: {}", report.total_rows);
    for check in &report.checks {
        let mark = if check.passed() { "✓" } else { "✗" };
        let note = if check.informational && check.violations > 0 {
            " (informational)"
        } else {
            ""
        };
        println!(
            "  {} {} - {} violations{}",
            mark, check.name, check.violations, note
        );
    }
}

/// Save data to CSV file
fn save_csv<T: Serialize>(path: &Path, data: &[T]) -> Result<()> {
    if data.is_empty() {
        println!("No data to save to {:?}", path);
        return Ok(());
    }

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .context("Failed to create CSV writer")?;

    for item in data {
        wtr.serialize(item).context("Failed to write CSV record")?;
    }

    wtr.flush().context("Failed to flush CSV")?;
    println!("Saved: {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_options_resolves_days_window() {
        let options = build_options(
            "artificial intelligence".to_string(),
            3,
            None,
            None,
            PathBuf::from("temp"),
            false,
            3,
        )
        .unwrap();
        assert_eq!(
            options.date_to - options.date_from,
            chrono::Duration::days(3)
        );
        assert_eq!(options.retry.max_attempts, 3);
    }

    #[test]
    fn test_build_options_explicit_window_ignores_days() {
        let from = NaiveDate::from_ymd_opt(2025, 11, 15).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 11, 18).unwrap();
        let options = build_options(
            "artificial intelligence".to_string(),
            200_000_000,
            Some(from),
            Some(to),
            PathBuf::from("temp"),
            false,
            3,
        )
        .unwrap();
        assert_eq!(options.date_from, from);
        assert_eq!(options.date_to, to);
    }

    #[test]
    fn test_build_options_rejects_oversized_day_spans() {
        let err = build_options(
            "artificial intelligence".to_string(),
            200_000_000,
            None,
            None,
            PathBuf::from("temp"),
            false,
            3,
        )
        .unwrap_err();
        assert!(err.to_string().contains("--days"));
    }
}
