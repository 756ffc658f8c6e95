//! Dashboard read contract.
//!
//! The aggregate queries the dashboard consumes, one function per metric
//! family, all read-only. Medians use the ORDER BY / LIMIT / OFFSET idiom
//! since SQLite has no percentile function.

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::store::PaperStore;

/// Headline totals and citation overview
#[derive(Debug, Clone, PartialEq)]
pub struct Overview {
    pub total_papers: i64,
    pub open_access: i64,
    pub avg_citations: Option<f64>,
    pub median_citations: Option<f64>,
    pub max_citations: Option<i64>,
    pub top_1_percent: i64,
    pub top_10_percent: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct YearCount {
    pub year: i32,
    pub count: i64,
}

/// Shared shape for field and subfield rankings
#[derive(Debug, Clone, PartialEq)]
pub struct NameCount {
    pub name: String,
    pub count: i64,
}

/// One open-access status slice, share in percent of classified papers
#[derive(Debug, Clone, PartialEq)]
pub struct OaSlice {
    pub status: String,
    pub count: i64,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopPaper {
    pub title: String,
    pub publication_year: Option<i32>,
    pub cited_by_count: i64,
    pub field_name: Option<String>,
    pub oa_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollaborationStats {
    pub avg_countries: Option<f64>,
    pub max_countries: Option<i64>,
    pub avg_institutions: Option<f64>,
    pub max_institutions: Option<i64>,
    /// Papers spanning more than one country
    pub multi_country: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FwciStats {
    pub avg: Option<f64>,
    pub median: Option<f64>,
    pub max: Option<f64>,
    /// Papers that have an FWCI at all
    pub with_fwci: i64,
}

pub fn overview(store: &PaperStore) -> Result<Overview> {
    let conn = store.conn();
    Ok(Overview {
        total_papers: count_where(&conn, "1 = 1")?,
        open_access: count_where(&conn, "is_open_access = 1")?,
        avg_citations: conn.query_row("SELECT AVG(cited_by_count) FROM papers", [], |r| r.get(0))?,
        median_citations: column_median(&conn, "cited_by_count")?,
        max_citations: conn.query_row("SELECT MAX(cited_by_count) FROM papers", [], |r| r.get(0))?,
        top_1_percent: count_where(&conn, "is_top_1_percent = 1")?,
        top_10_percent: count_where(&conn, "is_top_10_percent = 1")?,
    })
}

/// Papers per publication year, ascending
pub fn papers_by_year(store: &PaperStore) -> Result<Vec<YearCount>> {
    let conn = store.conn();
    let mut stmt = conn.prepare(
        "SELECT publication_year, COUNT(*) FROM papers \
         WHERE publication_year IS NOT NULL \
         GROUP BY publication_year ORDER BY publication_year",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(YearCount {
                year: r.get(0)?,
                count: r.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn top_fields(store: &PaperStore, limit: usize) -> Result<Vec<NameCount>> {
    grouped_counts(&store.conn(), "field_name", limit)
}

pub fn top_subfields(store: &PaperStore, limit: usize) -> Result<Vec<NameCount>> {
    grouped_counts(&store.conn(), "subfield_name", limit)
}

/// Open-access status distribution over papers that carry a status
pub fn oa_breakdown(store: &PaperStore) -> Result<Vec<OaSlice>> {
    let conn = store.conn();
    let mut stmt = conn.prepare(
        "SELECT oa_status, COUNT(*) AS n FROM papers \
         WHERE oa_status IS NOT NULL \
         GROUP BY oa_status ORDER BY n DESC, oa_status",
    )?;
    let counts = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    Ok(counts
        .into_iter()
        .map(|(status, count)| OaSlice {
            status,
            count,
            share: count as f64 / total as f64 * 100.0,
        })
        .collect())
}

/// Most-cited papers
pub fn top_papers(store: &PaperStore, limit: usize) -> Result<Vec<TopPaper>> {
    let conn = store.conn();
    let mut stmt = conn.prepare(
        "SELECT title, publication_year, cited_by_count, field_name, oa_status \
         FROM papers ORDER BY cited_by_count DESC, openalex_id LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], |r| {
            Ok(TopPaper {
                title: r.get(0)?,
                publication_year: r.get(1)?,
                cited_by_count: r.get(2)?,
                field_name: r.get(3)?,
                oa_status: r.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn collaboration(store: &PaperStore) -> Result<CollaborationStats> {
    let conn = store.conn();
    Ok(CollaborationStats {
        avg_countries: conn.query_row("SELECT AVG(countries_count) FROM papers", [], |r| r.get(0))?,
        max_countries: conn.query_row("SELECT MAX(countries_count) FROM papers", [], |r| r.get(0))?,
        avg_institutions: conn.query_row("SELECT AVG(institutions_count) FROM papers", [], |r| {
            r.get(0)
        })?,
        max_institutions: conn.query_row("SELECT MAX(institutions_count) FROM papers", [], |r| {
            r.get(0)
        })?,
        multi_country: count_where(&conn, "countries_count > 1")?,
    })
}

pub fn fwci(store: &PaperStore) -> Result<FwciStats> {
    let conn = store.conn();
    Ok(FwciStats {
        avg: conn.query_row("SELECT AVG(fwci) FROM papers", [], |r| r.get(0))?,
        median: column_median(&conn, "fwci")?,
        max: conn.query_row("SELECT MAX(fwci) FROM papers", [], |r| r.get(0))?,
        with_fwci: count_where(&conn, "fwci IS NOT NULL")?,
    })
}

fn count_where(conn: &Connection, predicate: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM papers WHERE {predicate}");
    let n = conn.query_row(&sql, [], |r| r.get(0))?;
    Ok(n)
}

fn grouped_counts(conn: &Connection, column: &str, limit: usize) -> Result<Vec<NameCount>> {
    let sql = format!(
        "SELECT {column}, COUNT(*) AS n FROM papers \
         WHERE {column} IS NOT NULL \
         GROUP BY {column} ORDER BY n DESC, {column} LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![limit as i64], |r| {
            Ok(NameCount {
                name: r.get(0)?,
                count: r.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Median of a numeric column, averaging the two middle values for even
/// counts. Empty (or all-null) columns give `None`.
fn column_median(conn: &Connection, column: &str) -> Result<Option<f64>> {
    let sql = format!(
        "SELECT AVG(v) FROM ( \
           SELECT {column} AS v FROM papers WHERE {column} IS NOT NULL \
           ORDER BY {column} \
           LIMIT 2 - (SELECT COUNT(*) FROM papers WHERE {column} IS NOT NULL) % 2 \
           OFFSET (SELECT (COUNT(*) - 1) / 2 FROM papers WHERE {column} IS NOT NULL) \
         )"
    );
    let median = conn.query_row(&sql, [], |r| r.get(0))?;
    Ok(median)
}
