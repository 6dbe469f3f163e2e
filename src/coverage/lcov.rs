//! LCOV tracefile parsing.
//!
//! Only the records the snapshot needs are read: `SF:` opens a file section,
//! `DA:<line>,<hits>` records line execution, `end_of_record` closes the
//! section. Everything else (function/branch records) is skipped.

use super::{CoverageError, FileCoverage};
use std::collections::BTreeMap;
use std::path::Path;

pub(super) fn parse(
    report_path: &Path,
    content: &str,
) -> Result<BTreeMap<String, FileCoverage>, CoverageError> {
    let malformed = |detail: String| CoverageError::Malformed {
        path: report_path.to_path_buf(),
        detail,
    };

    let mut files: BTreeMap<String, FileCoverage> = BTreeMap::new();
    let mut current: Option<(String, FileCoverage)> = None;

    for (idx, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(path) = line.strip_prefix("SF:") {
            if current.is_some() {
                return Err(malformed(format!(
                    "line {}: SF record before end_of_record",
                    idx + 1
                )));
            }
            current = Some((path.trim().to_string(), FileCoverage::default()));
        } else if let Some(rest) = line.strip_prefix("DA:") {
            let (_, coverage) = current
                .as_mut()
                .ok_or_else(|| malformed(format!("line {}: DA record outside SF section", idx + 1)))?;

            let mut parts = rest.splitn(3, ',');
            let line_no: usize = parts
                .next()
                .unwrap_or_default()
                .trim()
                .parse()
                .map_err(|_| malformed(format!("line {}: bad DA line number", idx + 1)))?;
            let hits: u64 = parts
                .next()
                .ok_or_else(|| malformed(format!("line {}: DA record missing hit count", idx + 1)))?
                .trim()
                .parse()
                .map_err(|_| malformed(format!("line {}: bad DA hit count", idx + 1)))?;

            coverage.coverable.insert(line_no);
            if hits > 0 {
                coverage.covered.insert(line_no);
            }
        } else if line == "end_of_record" {
            let (path, coverage) = current
                .take()
                .ok_or_else(|| malformed(format!("line {}: stray end_of_record", idx + 1)))?;
            files.insert(path, coverage);
        }
        // Other record types (TN, FN, FNDA, BRDA, LH, LF...) are ignored.
    }

    if let Some((path, _)) = current {
        return Err(malformed(format!("unterminated record for {}", path)));
    }
    if files.is_empty() {
        return Err(malformed("no SF records found".to_string()));
    }

    Ok(files)
}
