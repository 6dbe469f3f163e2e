//! Coverage report parsing.
//!
//! Decodes the coverage artifact the test command writes into a normalized
//! [`CoverageSnapshot`]. A missing or unreadable artifact is an explicit
//! error, never a zero-coverage snapshot: the controller must be able to
//! tell "no data" apart from "no coverage".

mod json;
mod lcov;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Supported coverage artifact formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CoverageFormat {
    /// LCOV tracefile (`SF:` / `DA:` / `end_of_record`).
    Lcov,
    /// JSON report with per-file executed/missing line arrays
    /// (the shape written by `coverage.py json` style exporters).
    Json,
}

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("coverage report not found at {0}")]
    NoReport(PathBuf),
    #[error("malformed coverage report {path}: {detail}")]
    Malformed { path: PathBuf, detail: String },
    #[error("coverage report {path} has no entry for target file {target}")]
    TargetMissing { path: PathBuf, target: String },
}

/// Line coverage for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    /// Lines that executed at least once (1-indexed).
    pub covered: BTreeSet<usize>,
    /// All instrumentable lines (covered ∪ missed).
    pub coverable: BTreeSet<usize>,
}

impl FileCoverage {
    /// Percentage of coverable lines covered, 0-100. An empty file counts
    /// as fully covered.
    pub fn percentage(&self) -> f64 {
        if self.coverable.is_empty() {
            return 100.0;
        }
        self.covered.len() as f64 / self.coverable.len() as f64 * 100.0
    }

    /// Coverable lines that did not execute, ascending.
    pub fn uncovered(&self) -> Vec<usize> {
        self.coverable.difference(&self.covered).copied().collect()
    }
}

/// Normalized coverage state captured from one test command execution.
///
/// Immutable once captured; a new snapshot is produced per execution.
/// Acceptance decisions read only the target file's percentage; the
/// aggregate is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    /// Per-file coverage keyed by the path as it appears in the report.
    pub files: BTreeMap<String, FileCoverage>,
    /// Report key that resolved to the target source file.
    pub target_key: String,
}

impl CoverageSnapshot {
    /// Coverage of the target source file. The key is resolved at parse
    /// time, so this is only `None` for hand-built snapshots.
    pub fn target(&self) -> Option<&FileCoverage> {
        self.files.get(&self.target_key)
    }

    /// Target-file coverage percentage, the acceptance metric.
    pub fn target_pct(&self) -> f64 {
        self.target().map(FileCoverage::percentage).unwrap_or(0.0)
    }

    /// Uncovered target-file lines, handed to the generation collaborator.
    pub fn uncovered_target_lines(&self) -> Vec<usize> {
        self.target().map(FileCoverage::uncovered).unwrap_or_default()
    }

    /// Project-wide percentage across every file in the report.
    /// Informational only.
    pub fn aggregate_pct(&self) -> f64 {
        let mut covered = 0usize;
        let mut coverable = 0usize;
        for file in self.files.values() {
            covered += file.covered.len();
            coverable += file.coverable.len();
        }
        if coverable == 0 {
            return 100.0;
        }
        covered as f64 / coverable as f64 * 100.0
    }
}

/// Parse the coverage artifact at `report_path` and resolve the entry for
/// `target`, the source file under test.
pub fn parse(
    report_path: &Path,
    format: CoverageFormat,
    target: &Path,
) -> Result<CoverageSnapshot, CoverageError> {
    if !report_path.exists() {
        return Err(CoverageError::NoReport(report_path.to_path_buf()));
    }
    let content = std::fs::read_to_string(report_path)
        .map_err(|_| CoverageError::NoReport(report_path.to_path_buf()))?;

    let files = match format {
        CoverageFormat::Lcov => lcov::parse(report_path, &content)?,
        CoverageFormat::Json => json::parse(report_path, &content)?,
    };

    let target_key = resolve_target_key(&files, target).ok_or_else(|| {
        CoverageError::TargetMissing {
            path: report_path.to_path_buf(),
            target: target.display().to_string(),
        }
    })?;

    Ok(CoverageSnapshot { files, target_key })
}

/// Match the target source file against report keys: exact path first, then
/// path-suffix, then bare file name. Reports commonly record paths relative
/// to the working directory rather than absolute ones.
fn resolve_target_key(files: &BTreeMap<String, FileCoverage>, target: &Path) -> Option<String> {
    let target_str = target.to_string_lossy();
    if files.contains_key(target_str.as_ref()) {
        return Some(target_str.to_string());
    }

    for key in files.keys() {
        if path_suffix_matches(key, &target_str) || path_suffix_matches(&target_str, key) {
            return Some(key.clone());
        }
    }

    let file_name = target.file_name()?.to_str()?;
    files
        .keys()
        .find(|key| {
            Path::new(key)
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n == file_name)
                .unwrap_or(false)
        })
        .cloned()
}

/// Whether `shorter` matches a whole-component suffix of `longer`.
fn path_suffix_matches(longer: &str, shorter: &str) -> bool {
    let longer: Vec<&str> = Path::new(longer)
        .components()
        .map(|c| c.as_os_str().to_str().unwrap_or(""))
        .collect();
    let shorter: Vec<&str> = Path::new(shorter)
        .components()
        .map(|c| c.as_os_str().to_str().unwrap_or(""))
        .collect();
    if shorter.is_empty() || shorter.len() > longer.len() {
        return false;
    }
    longer[longer.len() - shorter.len()..] == shorter[..]
}
