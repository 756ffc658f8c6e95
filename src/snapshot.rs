//! Staging snapshots of raw fetch results.
//!
//! Every fetch writes the raw works, untouched, to a timestamped JSON file
//! before (or alongside) loading. The file is the audit trail for what the
//! API returned; the loader can replay it later with `load`.
//!
//! File name: `papers_{YYYYmmdd_HHMMSS}_{topic}.json`

use crate::error::{PapersError, Result};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Provenance block written at the top of every snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Wall-clock time the snapshot was written (RFC 3339)
    pub timestamp: String,
    /// Topic the fetch was resolved from
    pub topic: String,
    /// Inclusive publication-date window
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub total_papers: usize,
    pub source: String,
}

/// On-disk snapshot envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMeta,
    pub papers: Vec<Value>,
}

/// Write raw works to a new snapshot file under `dir` (created if missing).
///
/// Returns the path of the written file.
pub fn save(
    dir: &Path,
    topic: &str,
    date_from: NaiveDate,
    date_to: NaiveDate,
    papers: &[Value],
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("papers_{}_{}.json", stamp, sanitize_topic(topic)));

    let snapshot = Snapshot {
        metadata: SnapshotMeta {
            timestamp: Local::now().to_rfc3339(),
            topic: topic.to_string(),
            date_from,
            date_to,
            total_papers: papers.len(),
            source: "OpenAlex API".to_string(),
        },
        papers: papers.to_vec(),
    };

    let content = serde_json::to_string_pretty(&snapshot)?;
    std::fs::write(&path, content)?;
    info!("Saved {} raw works to {:?}", papers.len(), path);
    Ok(path)
}

/// Read the raw works back out of a snapshot file.
///
/// Accepts both the `{metadata, papers}` envelope and a bare JSON array;
/// an envelope without a `papers` key counts as empty.
pub fn load(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content)?;
    let papers = match value {
        Value::Array(papers) => papers,
        Value::Object(mut map) => match map.remove("papers") {
            Some(Value::Array(papers)) => papers,
            Some(_) => {
                return Err(PapersError::Config(format!(
                    "snapshot {} has a non-array papers field",
                    path.display()
                )))
            }
            None => {
                warn!("Snapshot {:?} has no papers field", path);
                Vec::new()
            }
        },
        _ => {
            return Err(PapersError::Config(format!(
                "snapshot {} is neither an envelope nor an array",
                path.display()
            )))
        }
    };
    info!("Loaded {} raw works from {:?}", papers.len(), path);
    Ok(papers)
}

/// Lowercased topic with anything non-alphanumeric folded to `_`,
/// safe for file names
fn sanitize_topic(topic: &str) -> String {
    topic
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn window() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2025, 11, 15).unwrap(),
            NaiveDate::from_ymd_opt(2025, 11, 18).unwrap(),
        )
    }

    #[test]
    fn test_save_and_load_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let works = vec![
            json!({ "id": "W1", "title": "First" }),
            json!({ "id": "W2", "title": "Second" }),
        ];
        let (from, to) = window();

        let path = save(dir.path(), "Artificial Intelligence", from, to, &works)?;
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        assert!(name.starts_with("papers_"));
        assert!(name.ends_with("_artificial_intelligence.json"));

        let loaded = load(&path)?;
        assert_eq!(loaded, works);

        // Envelope metadata is intact
        let snapshot: Snapshot = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(snapshot.metadata.topic, "Artificial Intelligence");
        assert_eq!(snapshot.metadata.total_papers, 2);
        assert_eq!(snapshot.metadata.date_from, from);
        assert_eq!(snapshot.metadata.source, "OpenAlex API");
        Ok(())
    }

    #[test]
    fn test_load_bare_array() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bare.json");
        std::fs::write(&path, r#"[{"id": "W1"}]"#)?;
        assert_eq!(load(&path)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_load_envelope_without_papers_is_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("meta_only.json");
        std::fs::write(&path, r#"{"metadata": {"note": "nothing here"}}"#)?;
        assert!(load(&path)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_load_rejects_other_shapes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scalar.json");
        std::fs::write(&path, r#""just a string""#)?;
        assert!(matches!(load(&path), Err(PapersError::Config(_))));
        Ok(())
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = load(Path::new("/nonexistent/snapshot.json")).unwrap_err();
        assert!(matches!(err, PapersError::Io(_)));
    }

    #[test]
    fn test_sanitize_topic() {
        assert_eq!(sanitize_topic("Artificial Intelligence"), "artificial_intelligence");
        assert_eq!(sanitize_topic("  C++ / Systems  "), "c_____systems");
    }
}
