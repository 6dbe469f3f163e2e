//! Failed-test triage.
//!
//! Candidates that keep failing at runtime are worth a second look: some
//! fail because the generated test is wrong, others because they found a
//! real problem in the source. This pass cross-references error output
//! against the source file and flags the interesting ones. The output is
//! advisory only and never gates acceptance.

use crate::candidate::FailedCandidate;
use crate::source::SourceFile;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What a persistent failure looks like, once triaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// The test itself is broken: bad imports, wrong names, bad fixtures.
    TestAuthoring,
    /// The source likely mishandles a boundary or unusual input.
    EdgeCase,
    /// The source likely accepts input it should reject.
    Validation,
    /// The failure pattern suggests a security-relevant path.
    Security,
    /// The failure pattern suggests a performance problem.
    Performance,
    /// A plain behavioral mismatch between test expectation and source.
    Logic,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TestAuthoring => write!(f, "test authoring error"),
            Self::EdgeCase => write!(f, "edge case"),
            Self::Validation => write!(f, "validation"),
            Self::Security => write!(f, "security"),
            Self::Performance => write!(f, "performance"),
            Self::Logic => write!(f, "logic"),
        }
    }
}

/// One triaged failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub candidate_name: String,
    pub kind: IssueKind,
    pub description: String,
}

const AUTHORING_MARKERS: &[&str] = &[
    "ImportError",
    "ModuleNotFoundError",
    "NameError",
    "AttributeError: module",
    "fixture",
    "SyntaxError",
    "IndentationError",
    "Cannot find module",
    "cannot find function",
    "unresolved import",
];

const EDGE_CASE_MARKERS: &[&str] = &[
    "ZeroDivisionError",
    "IndexError",
    "OverflowError",
    "overflow",
    "out of range",
    "out of bounds",
    "panicked",
    "RecursionError",
    "StopIteration",
    "NoneType",
    "unwrap",
];

const VALIDATION_MARKERS: &[&str] = &["ValueError", "TypeError", "invalid", "ValidationError"];

const SECURITY_MARKERS: &[&str] = &["PermissionError", "injection", "traversal", "unsafe"];

const PERFORMANCE_MARKERS: &[&str] = &["Timeout", "timed out", "too slow", "MemoryError"];

/// Classify persistent runtime failures.
///
/// The heuristic reads the captured error text first; when the failure is
/// an assertion mismatch, the source lines the candidate claimed to cover
/// decide between an edge-case flag and a plain logic mismatch.
pub fn classify(failures: &[FailedCandidate], source: &SourceFile) -> Vec<Issue> {
    failures
        .iter()
        .map(|failure| {
            let kind = classify_one(failure, source);
            Issue {
                candidate_name: failure.candidate.name.clone(),
                kind,
                description: describe(failure, kind),
            }
        })
        .collect()
}

fn classify_one(failure: &FailedCandidate, source: &SourceFile) -> IssueKind {
    let output = &failure.error_output;

    if contains_any(output, AUTHORING_MARKERS) {
        return IssueKind::TestAuthoring;
    }
    if contains_any(output, SECURITY_MARKERS) {
        return IssueKind::Security;
    }
    if contains_any(output, PERFORMANCE_MARKERS) {
        return IssueKind::Performance;
    }
    if contains_any(output, EDGE_CASE_MARKERS) {
        return IssueKind::EdgeCase;
    }
    if contains_any(output, VALIDATION_MARKERS) {
        return IssueKind::Validation;
    }

    // Assertion mismatch: look at what the test was aiming at.
    for line_no in &failure.candidate.target_lines {
        if let Some(line) = source.line(*line_no) {
            if line.contains("if ") || line.contains("< ") || line.contains("> ") || line.contains("==") {
                return IssueKind::EdgeCase;
            }
        }
    }
    IssueKind::Logic
}

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.contains(marker))
}

fn describe(failure: &FailedCandidate, kind: IssueKind) -> String {
    let first_error_line = failure
        .error_output
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim();
    match kind {
        IssueKind::TestAuthoring => format!(
            "Generated test appears broken rather than revealing: {}",
            first_error_line
        ),
        _ => format!(
            "Persistent failure suggests a potential {} issue in the source: {}",
            kind, first_error_line
        ),
    }
}

/// Issues that point at the source rather than at the tests themselves.
pub fn source_issues(issues: &[Issue]) -> Vec<&Issue> {
    issues
        .iter()
        .filter(|issue| issue.kind != IssueKind::TestAuthoring)
        .collect()
}

/// Write an advisory Markdown report for triaged failures.
pub fn save_report(issues: &[Issue], failures: &[FailedCandidate], output_file: &Path) -> Result<()> {
    if issues.is_empty() {
        return Ok(());
    }
    if let Some(parent) = output_file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
    }

    let mut out = String::from("# Tests Revealing Potential Source Code Issues\n\n");
    for issue in issues {
        let failure = failures
            .iter()
            .find(|f| f.candidate.name == issue.candidate_name);

        out.push_str(&format!("## Issue Type: {}\n", issue.kind));
        out.push_str(&format!("### Description: {}\n\n", issue.description));
        out.push_str(&format!("**Test Name:** {}\n\n", issue.candidate_name));
        if let Some(failure) = failure {
            if !failure.candidate.target_lines.is_empty() {
                let lines: Vec<String> = failure
                    .candidate
                    .target_lines
                    .iter()
                    .map(|l| l.to_string())
                    .collect();
                out.push_str(&format!("**Lines to Cover:** {}\n\n", lines.join(", ")));
            }
            out.push_str("**Test Code:**\n```\n");
            out.push_str(&failure.candidate.body);
            out.push_str("\n```\n\n");
        }
    }

    std::fs::write(output_file, out)
        .with_context(|| format!("Failed to write triage report {}", output_file.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{Candidate, CandidateTag, RejectReason};
    use tempfile::TempDir;

    fn make_failure(name: &str, output: &str, target_lines: Vec<usize>) -> FailedCandidate {
        FailedCandidate {
            candidate: Candidate {
                name: name.to_string(),
                body: format!("def {}():\n    assert False", name),
                imports: String::new(),
                behavior: String::new(),
                tag: CandidateTag::Other,
                target_lines,
            },
            reason: RejectReason::RuntimeFailure,
            error_output: output.to_string(),
        }
    }

    fn make_source(content: &str) -> SourceFile {
        SourceFile {
            path: "src/calc.py".into(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_classify_import_error_as_authoring() {
        let failures = vec![make_failure(
            "test_a",
            "ImportError while importing test module 'test_calc'",
            vec![],
        )];
        let issues = classify(&failures, &make_source(""));
        assert_eq!(issues[0].kind, IssueKind::TestAuthoring);
    }

    #[test]
    fn test_classify_name_error_as_authoring() {
        let failures = vec![make_failure(
            "test_a",
            "NameError: name 'add_numbrs' is not defined",
            vec![],
        )];
        let issues = classify(&failures, &make_source(""));
        assert_eq!(issues[0].kind, IssueKind::TestAuthoring);
    }

    #[test]
    fn test_classify_zero_division_as_edge_case() {
        let failures = vec![make_failure(
            "test_divide_by_zero",
            "ZeroDivisionError: division by zero",
            vec![],
        )];
        let issues = classify(&failures, &make_source(""));
        assert_eq!(issues[0].kind, IssueKind::EdgeCase);
    }

    #[test]
    fn test_classify_value_error_as_validation() {
        let failures = vec![make_failure(
            "test_bad_input",
            "ValueError: could not convert string to float",
            vec![],
        )];
        let issues = classify(&failures, &make_source(""));
        assert_eq!(issues[0].kind, IssueKind::Validation);
    }

    #[test]
    fn test_classify_timeout_as_performance() {
        let failures = vec![make_failure("test_big", "Timeout >30.0s", vec![])];
        let issues = classify(&failures, &make_source(""));
        assert_eq!(issues[0].kind, IssueKind::Performance);
    }

    #[test]
    fn test_classify_assertion_near_branch_as_edge_case() {
        let source = make_source("def f(x):\n    if x > 0:\n        return 1\n    return 0\n");
        let failures = vec![make_failure(
            "test_boundary",
            "AssertionError: assert f(0) == 1",
            vec![2],
        )];
        let issues = classify(&failures, &source);
        assert_eq!(issues[0].kind, IssueKind::EdgeCase);
    }

    #[test]
    fn test_classify_plain_assertion_as_logic() {
        let source = make_source("def f(x):\n    return x\n");
        let failures = vec![make_failure(
            "test_value",
            "AssertionError: assert f(3) == 4",
            vec![2],
        )];
        let issues = classify(&failures, &source);
        assert_eq!(issues[0].kind, IssueKind::Logic);
    }

    #[test]
    fn test_source_issues_excludes_authoring() {
        let source = make_source("");
        let failures = vec![
            make_failure("test_broken", "NameError: name 'x'", vec![]),
            make_failure("test_real", "ZeroDivisionError", vec![]),
        ];
        let issues = classify(&failures, &source);
        let relevant = source_issues(&issues);
        assert_eq!(relevant.len(), 1);
        assert_eq!(relevant[0].candidate_name, "test_real");
    }

    #[test]
    fn test_save_report_writes_markdown() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("issues").join("report.md");

        let failures = vec![make_failure("test_real", "ZeroDivisionError", vec![4, 5])];
        let issues = classify(&failures, &make_source(""));
        save_report(&issues, &failures, &output).unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        assert!(content.contains("# Tests Revealing Potential Source Code Issues"));
        assert!(content.contains("**Test Name:** test_real"));
        assert!(content.contains("**Lines to Cover:** 4, 5"));
        assert!(content.contains("edge case"));
    }

    #[test]
    fn test_save_report_empty_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("report.md");
        save_report(&[], &[], &output).unwrap();
        assert!(!output.exists());
    }
}
