//! JSON coverage report parsing.
//!
//! Reads the `coverage.py json`-style shape: a top-level `files` map keyed
//! by path, each entry carrying `executed_lines` and `missing_lines`
//! arrays. Summary blocks and excluded lines are ignored.

use super::{CoverageError, FileCoverage};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawReport {
    files: BTreeMap<String, RawFile>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    #[serde(default)]
    executed_lines: Vec<usize>,
    #[serde(default)]
    missing_lines: Vec<usize>,
}

pub(super) fn parse(
    report_path: &Path,
    content: &str,
) -> Result<BTreeMap<String, FileCoverage>, CoverageError> {
    let raw: RawReport =
        serde_json::from_str(content).map_err(|e| CoverageError::Malformed {
            path: report_path.to_path_buf(),
            detail: e.to_string(),
        })?;

    if raw.files.is_empty() {
        return Err(CoverageError::Malformed {
            path: report_path.to_path_buf(),
            detail: "report contains no files".to_string(),
        });
    }

    let mut files = BTreeMap::new();
    for (path, entry) in raw.files {
        let covered: std::collections::BTreeSet<usize> =
            entry.executed_lines.into_iter().collect();
        let mut coverable = covered.clone();
        coverable.extend(entry.missing_lines);
        files.insert(path, FileCoverage { covered, coverable });
    }
    Ok(files)
}
