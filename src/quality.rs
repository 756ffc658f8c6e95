//! Data quality checks over the papers table.
//!
//! Each check is a read-only COUNT of rows violating one invariant, passing
//! at zero. Duplicate DOIs are informational only: preprint and version DOIs
//! legitimately collide, so they never fail a run.

use tracing::{info, warn};

use crate::error::Result;
use crate::store::PaperStore;

/// name, violation query, informational
const CHECKS: &[(&str, &str, bool)] = &[
    (
        "missing openalex_id",
        "SELECT COUNT(*) FROM papers WHERE openalex_id IS NULL OR openalex_id = ''",
        false,
    ),
    (
        "missing title",
        "SELECT COUNT(*) FROM papers WHERE title IS NULL OR title = ''",
        false,
    ),
    (
        "negative cited_by_count",
        "SELECT COUNT(*) FROM papers WHERE cited_by_count < 0",
        false,
    ),
    (
        "negative countries_count",
        "SELECT COUNT(*) FROM papers WHERE countries_count < 0",
        false,
    ),
    (
        "negative institutions_count",
        "SELECT COUNT(*) FROM papers WHERE institutions_count < 0",
        false,
    ),
    (
        "citation_percentile out of range",
        "SELECT COUNT(*) FROM papers WHERE citation_percentile < 0 OR citation_percentile > 1",
        false,
    ),
    (
        "primary_topic_score out of range",
        "SELECT COUNT(*) FROM papers WHERE primary_topic_score < 0 OR primary_topic_score > 1",
        false,
    ),
    (
        "negative fwci",
        "SELECT COUNT(*) FROM papers WHERE fwci < 0",
        false,
    ),
    (
        "duplicate openalex_id",
        "SELECT COUNT(*) FROM (SELECT openalex_id FROM papers \
         GROUP BY openalex_id HAVING COUNT(*) > 1)",
        false,
    ),
    (
        "duplicate doi",
        "SELECT COUNT(*) FROM (SELECT doi FROM papers \
         WHERE doi IS NOT NULL AND doi != '' GROUP BY doi HAVING COUNT(*) > 1)",
        true,
    ),
];

/// Outcome of one check
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub violations: i64,
    pub informational: bool,
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        self.informational || self.violations == 0
    }
}

/// All check outcomes plus the table size they ran against
#[derive(Debug, Clone)]
pub struct QualityReport {
    pub total_rows: i64,
    pub checks: Vec<CheckOutcome>,
}

impl QualityReport {
    /// Overall verdict; informational findings never fail it
    pub fn passed(&self) -> bool {
        self.checks.iter().all(CheckOutcome::passed)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.checks.iter().filter(|c| !c.passed())
    }
}

/// Run every check against the store
pub fn run_checks(store: &PaperStore) -> Result<QualityReport> {
    let conn = store.conn();
    let total_rows: i64 = conn.query_row("SELECT COUNT(*) FROM papers", [], |r| r.get(0))?;

    let mut checks = Vec::with_capacity(CHECKS.len());
    for &(name, sql, informational) in CHECKS {
        let violations: i64 = conn.query_row(sql, [], |r| r.get(0))?;
        let outcome = CheckOutcome {
            name,
            violations,
            informational,
        };
        if !outcome.passed() {
            warn!(check = name, violations = violations, "Quality check failed");
        } else if informational && violations > 0 {
            info!(check = name, violations = violations, "Informational finding");
        }
        checks.push(outcome);
    }

    info!(
        total_rows = total_rows,
        failed = checks.iter().filter(|c| !c.passed()).count(),
        "Quality checks complete"
    );
    Ok(QualityReport { total_rows, checks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::PaperRow;

    fn seeded_store() -> PaperStore {
        let store = PaperStore::open_in_memory().unwrap();
        let row = PaperRow {
            openalex_id: "W1".to_string(),
            title: "A well-formed paper".to_string(),
            cited_by_count: 3,
            citation_percentile: Some(0.5),
            ..Default::default()
        };
        store.upsert_batch(&[row]).unwrap();
        store
    }

    #[test]
    fn test_clean_store_passes_everything() {
        let report = run_checks(&seeded_store()).unwrap();
        assert_eq!(report.total_rows, 1);
        assert_eq!(report.checks.len(), CHECKS.len());
        assert!(report.passed());
        assert_eq!(report.failed_checks().count(), 0);
    }

    #[test]
    fn test_flags_negative_counts() {
        let store = seeded_store();
        store
            .conn()
            .execute(
                "INSERT INTO papers (openalex_id, title, cited_by_count) VALUES ('W2', 'Bad', -5)",
                [],
            )
            .unwrap();

        let report = run_checks(&store).unwrap();
        assert!(!report.passed());
        let outcome = report
            .checks
            .iter()
            .find(|c| c.name == "negative cited_by_count")
            .unwrap();
        assert_eq!(outcome.violations, 1);
    }

    #[test]
    fn test_flags_out_of_range_percentile() {
        let store = seeded_store();
        store
            .conn()
            .execute(
                "INSERT INTO papers (openalex_id, title, citation_percentile) \
                 VALUES ('W2', 'Out of range', 1.5)",
                [],
            )
            .unwrap();

        let report = run_checks(&store).unwrap();
        assert!(!report.passed());
        let outcome = report
            .checks
            .iter()
            .find(|c| c.name == "citation_percentile out of range")
            .unwrap();
        assert_eq!(outcome.violations, 1);
    }

    #[test]
    fn test_flags_missing_title() {
        let store = seeded_store();
        store
            .conn()
            .execute(
                "INSERT INTO papers (openalex_id, title) VALUES ('W2', '')",
                [],
            )
            .unwrap();

        let report = run_checks(&store).unwrap();
        let outcome = report
            .checks
            .iter()
            .find(|c| c.name == "missing title")
            .unwrap();
        assert_eq!(outcome.violations, 1);
    }

    #[test]
    fn test_duplicate_doi_stays_informational() {
        let store = seeded_store();
        let mut a = PaperRow {
            openalex_id: "W2".to_string(),
            title: "Preprint".to_string(),
            doi: Some("10.1/shared".to_string()),
            ..Default::default()
        };
        store.upsert_batch(&[a.clone()]).unwrap();
        a.openalex_id = "W3".to_string();
        a.title = "Published version".to_string();
        store.upsert_batch(&[a]).unwrap();

        let report = run_checks(&store).unwrap();
        let outcome = report
            .checks
            .iter()
            .find(|c| c.name == "duplicate doi")
            .unwrap();
        assert_eq!(outcome.violations, 1);
        assert!(outcome.passed());
        assert!(report.passed());
    }
}
