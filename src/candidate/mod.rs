//! Candidate test records and per-candidate validation outcomes.
//!
//! Candidates arrive from an external generator as loosely structured
//! records. They are validated at this ingress boundary: a record with an
//! empty name or body is dropped before the merger ever sees it.

use serde::{Deserialize, Serialize};

/// Classification tag supplied by the generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateTag {
    HappyPath,
    EdgeCase,
    #[default]
    Other,
}

impl std::fmt::Display for CandidateTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HappyPath => write!(f, "happy_path"),
            Self::EdgeCase => write!(f, "edge_case"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// One proposed unit test, produced by the external generation collaborator
/// and not yet proven to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Test name, e.g. `test_rejects_empty_input`.
    pub name: String,
    /// Full body of the test case.
    pub body: String,
    /// New import lines required by the body, one statement per line.
    #[serde(default)]
    pub imports: String,
    /// Natural-language description of the behavior under test.
    #[serde(default)]
    pub behavior: String,
    #[serde(default)]
    pub tag: CandidateTag,
    /// Source line numbers (1-indexed) this test claims to cover.
    #[serde(default)]
    pub target_lines: Vec<usize>,
}

impl Candidate {
    /// Ingress validation and cleanup.
    ///
    /// Trims surrounding whitespace, strips wrapping quotes some generators
    /// put around the import block, and rejects records with an empty name
    /// or body. Returns `None` for malformed records.
    pub fn sanitize(mut self) -> Option<Self> {
        self.name = self.name.trim().to_string();
        self.body = self.body.trim_end().to_string();

        let mut imports = self.imports.trim().to_string();
        if imports.len() >= 2 && imports.starts_with('"') && imports.ends_with('"') {
            imports = imports[1..imports.len() - 1].trim().to_string();
        }
        self.imports = imports;

        if self.name.is_empty() || self.body.trim().is_empty() {
            return None;
        }
        Some(self)
    }
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The merger could not place the candidate; no test run was spent.
    StructuralReject,
    /// The suite failed to compile/collect with the candidate in place.
    CompileError,
    /// The suite ran and at least one test failed.
    RuntimeFailure,
    /// The run exceeded the wall-clock timeout.
    Timeout,
    /// The coverage artifact was missing or unreadable after the run.
    NoReport,
    /// The suite passed but target-file coverage did not increase.
    NoImprovement,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StructuralReject => write!(f, "structural_reject"),
            Self::CompileError => write!(f, "compile_error"),
            Self::RuntimeFailure => write!(f, "runtime_failure"),
            Self::Timeout => write!(f, "timeout"),
            Self::NoReport => write!(f, "no_report"),
            Self::NoImprovement => write!(f, "no_improvement"),
        }
    }
}

/// Coverage and mutation movement recorded for an accepted candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    pub coverage_before: f64,
    pub coverage_after: f64,
    pub mutation_before: f64,
    pub mutation_after: f64,
}

impl Improvement {
    pub fn coverage_delta(&self) -> f64 {
        self.coverage_after - self.coverage_before
    }
}

/// Outcome of validating one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Accepted {
        delta: Improvement,
    },
    Rejected {
        reason: RejectReason,
        stdout: String,
        stderr: String,
    },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Verdict::Rejected { reason, .. } => Some(*reason),
            Verdict::Accepted { .. } => None,
        }
    }
}

/// Full record of one validation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub candidate: Candidate,
    pub verdict: Verdict,
    pub duration_ms: u64,
}

/// A rejected candidate carried forward as generation/triage context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedCandidate {
    pub candidate: Candidate,
    pub reason: RejectReason,
    /// Captured output, truncated for storage.
    pub error_output: String,
}
