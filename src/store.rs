//! Deduplicating Loader
//!
//! `PaperStore` owns the SQLite connection for the papers table. Writes go
//! through `upsert_batch`, keyed on `openalex_id` with last-write-wins
//! semantics: every later sighting of an ID overwrites all columns and
//! refreshes `updated_at`, while `created_at` keeps the first-sight value.
//!
//! A row rejected by a table constraint is recorded in the `LoadReport` and
//! the rest of the batch continues. Nothing here ever deletes rows.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::error::{PapersError, Result};
use crate::normalize::PaperRow;

/// Column list shared by every query that reads full rows back.
/// Order must match `row_to_paper`.
const ROW_COLUMNS: &str = "openalex_id, doi, title, paper_type, publication_date, \
     publication_year, primary_topic_name, primary_topic_score, subfield_name, \
     field_name, domain_name, is_open_access, oa_status, cited_by_count, \
     citation_percentile, is_top_1_percent, is_top_10_percent, \
     citation_percentile_min, citation_percentile_max, fwci, countries_count, \
     institutions_count";

/// Length limits bound what a row may carry; violating one is the per-row
/// failure path, not a batch abort.
const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS papers (
        id INTEGER PRIMARY KEY,
        openalex_id TEXT NOT NULL UNIQUE CHECK (length(openalex_id) <= 255),
        doi TEXT CHECK (doi IS NULL OR length(doi) <= 500),
        title TEXT NOT NULL,
        paper_type TEXT CHECK (paper_type IS NULL OR length(paper_type) <= 50),
        publication_date TEXT,
        publication_year INTEGER,
        primary_topic_name TEXT CHECK (primary_topic_name IS NULL OR length(primary_topic_name) <= 255),
        primary_topic_score REAL,
        subfield_name TEXT CHECK (subfield_name IS NULL OR length(subfield_name) <= 255),
        field_name TEXT CHECK (field_name IS NULL OR length(field_name) <= 255),
        domain_name TEXT CHECK (domain_name IS NULL OR length(domain_name) <= 255),
        is_open_access INTEGER NOT NULL DEFAULT 0,
        oa_status TEXT CHECK (oa_status IS NULL OR length(oa_status) <= 50),
        cited_by_count INTEGER NOT NULL DEFAULT 0,
        citation_percentile REAL,
        is_top_1_percent INTEGER NOT NULL DEFAULT 0,
        is_top_10_percent INTEGER NOT NULL DEFAULT 0,
        citation_percentile_min INTEGER,
        citation_percentile_max INTEGER,
        fwci REAL,
        countries_count INTEGER NOT NULL DEFAULT 0,
        institutions_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
";

const CREATE_INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS idx_papers_publication_date ON papers(publication_date);
    CREATE INDEX IF NOT EXISTS idx_papers_publication_year ON papers(publication_year);
    CREATE INDEX IF NOT EXISTS idx_papers_cited_by_count ON papers(cited_by_count);
    CREATE INDEX IF NOT EXISTS idx_papers_oa_status ON papers(oa_status);
    CREATE INDEX IF NOT EXISTS idx_papers_subfield ON papers(subfield_name);
    CREATE INDEX IF NOT EXISTS idx_papers_field ON papers(field_name);
    CREATE INDEX IF NOT EXISTS idx_papers_topic ON papers(primary_topic_name);
    CREATE INDEX IF NOT EXISTS idx_papers_citation_percentile ON papers(citation_percentile);
    CREATE INDEX IF NOT EXISTS idx_papers_fwci ON papers(fwci);
";

/// External-content FTS over titles, trigram-tokenized for fuzzy search.
/// The triggers keep it in sync with the base table.
const CREATE_FTS: &str = "
    CREATE VIRTUAL TABLE IF NOT EXISTS papers_fts USING fts5(
        title,
        content='papers',
        content_rowid='id',
        tokenize='trigram'
    );

    CREATE TRIGGER IF NOT EXISTS papers_ai AFTER INSERT ON papers BEGIN
        INSERT INTO papers_fts(rowid, title) VALUES (NEW.id, NEW.title);
    END;

    CREATE TRIGGER IF NOT EXISTS papers_ad AFTER DELETE ON papers BEGIN
        INSERT INTO papers_fts(papers_fts, rowid, title) VALUES ('delete', OLD.id, OLD.title);
    END;

    CREATE TRIGGER IF NOT EXISTS papers_au AFTER UPDATE ON papers BEGIN
        INSERT INTO papers_fts(papers_fts, rowid, title) VALUES ('delete', OLD.id, OLD.title);
        INSERT INTO papers_fts(rowid, title) VALUES (NEW.id, NEW.title);
    END;
";

/// `created_at` is deliberately absent from the SET list.
const UPSERT_SQL: &str = "
    INSERT INTO papers (
        openalex_id, doi, title, paper_type, publication_date, publication_year,
        primary_topic_name, primary_topic_score, subfield_name, field_name,
        domain_name, is_open_access, oa_status, cited_by_count,
        citation_percentile, is_top_1_percent, is_top_10_percent,
        citation_percentile_min, citation_percentile_max, fwci,
        countries_count, institutions_count
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
              ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)
    ON CONFLICT(openalex_id) DO UPDATE SET
        doi = excluded.doi,
        title = excluded.title,
        paper_type = excluded.paper_type,
        publication_date = excluded.publication_date,
        publication_year = excluded.publication_year,
        primary_topic_name = excluded.primary_topic_name,
        primary_topic_score = excluded.primary_topic_score,
        subfield_name = excluded.subfield_name,
        field_name = excluded.field_name,
        domain_name = excluded.domain_name,
        is_open_access = excluded.is_open_access,
        oa_status = excluded.oa_status,
        cited_by_count = excluded.cited_by_count,
        citation_percentile = excluded.citation_percentile,
        is_top_1_percent = excluded.is_top_1_percent,
        is_top_10_percent = excluded.is_top_10_percent,
        citation_percentile_min = excluded.citation_percentile_min,
        citation_percentile_max = excluded.citation_percentile_max,
        fwci = excluded.fwci,
        countries_count = excluded.countries_count,
        institutions_count = excluded.institutions_count,
        updated_at = CURRENT_TIMESTAMP
";

/// Outcome of loading one batch. Partial success is normal: rejected rows are
/// carried here instead of aborting the batch.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Rows inserted or overwritten
    pub upserted: usize,
    /// Raw records skipped before reaching the table (no identifier)
    pub malformed: usize,
    /// Per-row rejections, each a `PapersError::Load`
    pub failures: Vec<PapersError>,
}

impl LoadReport {
    /// Fold a later page's report into this one
    pub fn merge(&mut self, other: LoadReport) {
        self.upserted += other.upserted;
        self.malformed += other.malformed;
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.malformed == 0 && self.failures.is_empty()
    }
}

/// One fuzzy title search result
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub openalex_id: String,
    pub title: String,
    pub publication_year: Option<i32>,
    pub cited_by_count: i64,
}

/// Handle to the papers database. Cheap to pass around by reference; all
/// access goes through a scoped mutex guard on the single connection.
pub struct PaperStore {
    connection: Mutex<Connection>,
}

impl PaperStore {
    /// Open (creating if needed) the database at `path` and ensure the schema
    /// exists. Parent directories are created on demand.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::setup(conn)
    }

    /// In-memory store for tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        Self::setup(Connection::open_in_memory()?)
    }

    fn setup(conn: Connection) -> Result<Self> {
        apply_pragmas(&conn)?;
        init_schema(&conn)?;
        Ok(Self {
            connection: Mutex::new(conn),
        })
    }

    /// Scoped access to the connection for this crate's query modules
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply an ordered batch of rows with last-write-wins dedup on
    /// `openalex_id`. Constraint violations skip the row, record a failure
    /// and keep going; everything that succeeded commits together.
    pub fn upsert_batch(&self, rows: &[PaperRow]) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        if rows.is_empty() {
            return Ok(report);
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(UPSERT_SQL)?;
            for row in rows {
                let outcome = stmt.execute(params![
                    row.openalex_id,
                    row.doi,
                    row.title,
                    row.paper_type,
                    row.publication_date,
                    row.publication_year,
                    row.primary_topic_name,
                    row.primary_topic_score,
                    row.subfield_name,
                    row.field_name,
                    row.domain_name,
                    row.is_open_access,
                    row.oa_status,
                    row.cited_by_count,
                    row.citation_percentile,
                    row.is_top_1_percent,
                    row.is_top_10_percent,
                    row.citation_percentile_min,
                    row.citation_percentile_max,
                    row.fwci,
                    row.countries_count,
                    row.institutions_count,
                ]);
                match outcome {
                    Ok(_) => report.upserted += 1,
                    Err(e) => {
                        warn!(
                            openalex_id = %row.openalex_id,
                            error = %e,
                            "Row rejected, continuing batch"
                        );
                        report.failures.push(PapersError::Load {
                            openalex_id: row.openalex_id.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
        tx.commit()?;

        debug!(
            upserted = report.upserted,
            failed = report.failures.len(),
            "Batch committed"
        );
        Ok(report)
    }

    /// Read one row back by its deduplication key
    pub fn get(&self, openalex_id: &str) -> Result<Option<PaperRow>> {
        let conn = self.conn();
        let sql = format!("SELECT {ROW_COLUMNS} FROM papers WHERE openalex_id = ?1");
        let row = conn
            .query_row(&sql, params![openalex_id], row_to_paper)
            .optional()?;
        Ok(row)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.conn();
        let n = conn.query_row("SELECT COUNT(*) FROM papers", [], |r| r.get(0))?;
        Ok(n)
    }

    /// Every row, most-cited first. Used by the CSV export.
    pub fn all_rows(&self) -> Result<Vec<PaperRow>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM papers ORDER BY cited_by_count DESC, openalex_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], row_to_paper)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Fuzzy title search over the trigram index. Trigram tokens need at
    /// least three characters; shorter queries fall back to LIKE.
    pub fn search_titles(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let needle = query.trim();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn();
        if needle.chars().count() < 3 {
            let mut stmt = conn.prepare(
                "SELECT openalex_id, title, publication_year, cited_by_count
                 FROM papers WHERE title LIKE ?1
                 ORDER BY cited_by_count DESC LIMIT ?2",
            )?;
            let hits = stmt
                .query_map(params![format!("%{needle}%"), limit as i64], row_to_hit)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            return Ok(hits);
        }

        // Quote as an FTS5 string so query punctuation is literal
        let phrase = format!("\"{}\"", needle.replace('"', "\"\""));
        let mut stmt = conn.prepare(
            "SELECT p.openalex_id, p.title, p.publication_year, p.cited_by_count
             FROM papers_fts JOIN papers p ON p.id = papers_fts.rowid
             WHERE papers_fts MATCH ?1
             ORDER BY rank LIMIT ?2",
        )?;
        let hits = stmt
            .query_map(params![phrase, limit as i64], row_to_hit)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hits)
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLES)?;
    conn.execute_batch(CREATE_INDEXES)?;
    conn.execute_batch(CREATE_FTS)?;
    Ok(())
}

fn row_to_paper(row: &Row<'_>) -> rusqlite::Result<PaperRow> {
    Ok(PaperRow {
        openalex_id: row.get(0)?,
        doi: row.get(1)?,
        title: row.get(2)?,
        paper_type: row.get(3)?,
        publication_date: row.get(4)?,
        publication_year: row.get(5)?,
        primary_topic_name: row.get(6)?,
        primary_topic_score: row.get(7)?,
        subfield_name: row.get(8)?,
        field_name: row.get(9)?,
        domain_name: row.get(10)?,
        is_open_access: row.get(11)?,
        oa_status: row.get(12)?,
        cited_by_count: row.get(13)?,
        citation_percentile: row.get(14)?,
        is_top_1_percent: row.get(15)?,
        is_top_10_percent: row.get(16)?,
        citation_percentile_min: row.get(17)?,
        citation_percentile_max: row.get(18)?,
        fwci: row.get(19)?,
        countries_count: row.get(20)?,
        institutions_count: row.get(21)?,
    })
}

fn row_to_hit(row: &Row<'_>) -> rusqlite::Result<SearchHit> {
    Ok(SearchHit {
        openalex_id: row.get(0)?,
        title: row.get(1)?,
        publication_year: row.get(2)?,
        cited_by_count: row.get(3)?,
    })
}

/// Default database location under the user data directory
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rustpapers")
        .join("papers.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_row(id: &str) -> PaperRow {
        PaperRow {
            openalex_id: id.to_string(),
            doi: Some(format!("10.1234/{id}")),
            title: format!("Paper {id}"),
            paper_type: Some("article".to_string()),
            publication_date: NaiveDate::from_ymd_opt(2025, 6, 1),
            publication_year: Some(2025),
            field_name: Some("Computer Science".to_string()),
            is_open_access: true,
            oa_status: Some("gold".to_string()),
            cited_by_count: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_open_in_memory_creates_schema() {
        let store = PaperStore::open_in_memory().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        // Re-running the DDL is harmless
        init_schema(&store.conn()).unwrap();
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("papers.db");
        let store = PaperStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_upsert_and_readback() {
        let store = PaperStore::open_in_memory().unwrap();
        let report = store.upsert_batch(&[sample_row("W1")]).unwrap();
        assert_eq!(report.upserted, 1);
        assert!(report.is_clean());

        let row = store.get("W1").unwrap().unwrap();
        assert_eq!(row, sample_row("W1"));
        assert_eq!(store.get("W404").unwrap(), None);
    }

    #[test]
    fn test_same_row_twice_keeps_one() {
        let store = PaperStore::open_in_memory().unwrap();
        store.upsert_batch(&[sample_row("W1")]).unwrap();
        store.upsert_batch(&[sample_row("W1")]).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_last_write_wins_overwrites_all_columns() {
        let store = PaperStore::open_in_memory().unwrap();
        store.upsert_batch(&[sample_row("W1")]).unwrap();

        let mut second = sample_row("W1");
        second.title = "Revised Title".to_string();
        second.cited_by_count = 99;
        second.oa_status = None;
        store.upsert_batch(&[second.clone()]).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let row = store.get("W1").unwrap().unwrap();
        assert_eq!(row.title, "Revised Title");
        assert_eq!(row.cited_by_count, 99);
        assert_eq!(row.oa_status, None);
        assert_eq!(row, second);
    }

    #[test]
    fn test_created_at_survives_overwrite() {
        let store = PaperStore::open_in_memory().unwrap();
        store.upsert_batch(&[sample_row("W1")]).unwrap();
        let created: String = store
            .conn()
            .query_row(
                "SELECT created_at FROM papers WHERE openalex_id = 'W1'",
                [],
                |r| r.get(0),
            )
            .unwrap();

        store.upsert_batch(&[sample_row("W1")]).unwrap();
        let (created_after, updated_after): (String, String) = store
            .conn()
            .query_row(
                "SELECT created_at, updated_at FROM papers WHERE openalex_id = 'W1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();

        assert_eq!(created, created_after);
        assert!(updated_after >= created_after);
    }

    #[test]
    fn test_constraint_violation_skips_row_and_continues() {
        let store = PaperStore::open_in_memory().unwrap();
        let oversized = sample_row(&"W".repeat(300));
        let report = store
            .upsert_batch(&[sample_row("W1"), oversized, sample_row("W2")])
            .unwrap();

        assert_eq!(report.upserted, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_clean());
        match &report.failures[0] {
            PapersError::Load { openalex_id, .. } => {
                assert!(openalex_id.starts_with("WWW"));
            }
            other => panic!("unexpected failure: {other}"),
        }
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_empty_batch_is_a_no_op() {
        let store = PaperStore::open_in_memory().unwrap();
        let report = store.upsert_batch(&[]).unwrap();
        assert_eq!(report.upserted, 0);
        assert!(report.is_clean());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_all_rows_most_cited_first() {
        let store = PaperStore::open_in_memory().unwrap();
        let mut low = sample_row("W1");
        low.cited_by_count = 1;
        let mut high = sample_row("W2");
        high.cited_by_count = 50;
        store.upsert_batch(&[low, high]).unwrap();

        let rows = store.all_rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].openalex_id, "W2");
    }

    #[test]
    fn test_trigram_title_search() {
        let store = PaperStore::open_in_memory().unwrap();
        let mut row = sample_row("W1");
        row.title = "Deep Neural Networks for Vision".to_string();
        let mut other = sample_row("W2");
        other.title = "Quantum Error Correction".to_string();
        store.upsert_batch(&[row, other]).unwrap();

        let hits = store.search_titles("neural net", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].openalex_id, "W1");

        // Search keeps up with overwrites through the sync triggers
        let mut renamed = sample_row("W1");
        renamed.title = "Graph Transformers for Vision".to_string();
        store.upsert_batch(&[renamed]).unwrap();
        assert!(store.search_titles("neural net", 10).unwrap().is_empty());
        assert_eq!(store.search_titles("transformer", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_short_queries_fall_back_to_like() {
        let store = PaperStore::open_in_memory().unwrap();
        let mut row = sample_row("W1");
        row.title = "Explainable AI in Practice".to_string();
        store.upsert_batch(&[row]).unwrap();

        let hits = store.search_titles("AI", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store.search_titles("  ", 10).unwrap().is_empty());
    }
}
