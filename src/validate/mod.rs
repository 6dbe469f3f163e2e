//! Candidate validation.
//!
//! One candidate at a time: stage it into the test file, commit, run the
//! full test command, measure coverage, then keep the commit or roll it
//! back. Every failure stays local to the returned [`ValidationResult`];
//! only filesystem faults on the test file itself propagate.

use crate::candidate::{Candidate, Improvement, RejectReason, ValidationResult, Verdict};
use crate::coverage::{self, CoverageFormat, CoverageSnapshot};
use crate::exec::{self, ExecutionResult};
use crate::language::Framework;
use crate::merge::TestMerger;
use crate::mutation::{self, MutationSnapshot};
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Execution-side configuration for one validation context. Arena mode
/// builds a translated copy of this per working-tree copy.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Directory the test command runs in.
    pub working_dir: PathBuf,
    /// The opaque, user-configured test command.
    pub test_command: String,
    pub timeout: Duration,
    /// Where the command (re)writes the coverage artifact.
    pub report_path: PathBuf,
    pub format: CoverageFormat,
    /// The source file acceptance decisions are scoped to.
    pub target: PathBuf,
    /// Optional mutation report to sample after accepted runs.
    pub mutation_report: Option<PathBuf>,
    /// Truncation limit for stored stdout/stderr.
    pub max_output_bytes: usize,
}

/// A validation result plus the snapshots captured on acceptance, so the
/// caller can advance its baseline without re-running the suite.
#[derive(Debug)]
pub struct ValidationOutcome {
    pub result: ValidationResult,
    pub snapshot: Option<CoverageSnapshot>,
    pub mutation: Option<MutationSnapshot>,
}

/// Decide whether a failed execution is a compile/collection error or a
/// genuine test failure. An assertion failure must never be classified as
/// a compile error.
pub fn classify_failure(framework: Framework, execution: &ExecutionResult) -> RejectReason {
    let combined = execution.combined_output();
    let compile = framework
        .compile_error_markers()
        .iter()
        .any(|marker| combined.contains(marker));
    if compile {
        RejectReason::CompileError
    } else {
        RejectReason::RuntimeFailure
    }
}

/// Validate one candidate against the current committed baseline.
///
/// On rejection the test file is rolled back before returning, so the file
/// observable by the next candidate is always the last accepted state.
pub async fn validate_candidate(
    cfg: &ValidatorConfig,
    merger: &mut TestMerger,
    candidate: &Candidate,
    baseline_coverage: f64,
    baseline_mutation: f64,
) -> Result<ValidationOutcome> {
    // Step 1: stage. A structurally unplaceable candidate costs no test run.
    let staged = match merger.stage(candidate) {
        Ok(staged) => staged,
        Err(e) => {
            tracing::info!("Candidate '{}' rejected before execution: {}", candidate.name, e);
            return Ok(rejected(
                candidate,
                RejectReason::StructuralReject,
                String::new(),
                e.to_string(),
                0,
                cfg.max_output_bytes,
            ));
        }
    };

    // Step 2: commit the staged content and run the full suite.
    merger.commit(staged).await?;
    tracing::debug!(
        "Running test command for candidate '{}': \"{}\"",
        candidate.name,
        cfg.test_command
    );
    let execution = exec::run_test_command(&cfg.working_dir, &cfg.test_command, cfg.timeout).await;
    let duration_ms = execution.duration_ms;

    // Step 3/4: a failed run rolls back, classified by kind.
    if execution.timed_out {
        merger.rollback().await?;
        tracing::info!(
            "Candidate '{}' timed out after {}ms. Rolling back.",
            candidate.name,
            duration_ms
        );
        return Ok(rejected(
            candidate,
            RejectReason::Timeout,
            execution.stdout,
            execution.stderr,
            duration_ms,
            cfg.max_output_bytes,
        ));
    }
    if !execution.success() {
        merger.rollback().await?;
        let reason = classify_failure(merger.layout().framework, &execution);
        tracing::info!("Candidate '{}' rejected: {}. Rolling back.", candidate.name, reason);
        return Ok(rejected(
            candidate,
            reason,
            execution.stdout,
            execution.stderr,
            duration_ms,
            cfg.max_output_bytes,
        ));
    }

    // Step 5: measure. A missing or unreadable artifact is "no data", not
    // "no coverage"; the candidate is rejected without poisoning the state.
    let snapshot = match coverage::parse(&cfg.report_path, cfg.format, &cfg.target) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            merger.rollback().await?;
            tracing::warn!(
                "Coverage unreadable after candidate '{}': {}. Rolling back.",
                candidate.name,
                e
            );
            return Ok(rejected(
                candidate,
                RejectReason::NoReport,
                execution.stdout,
                e.to_string(),
                duration_ms,
                cfg.max_output_bytes,
            ));
        }
    };

    let new_coverage = snapshot.target_pct();
    if new_coverage <= baseline_coverage {
        merger.rollback().await?;
        tracing::info!(
            "Candidate '{}' did not increase coverage ({:.2}% -> {:.2}%). Rolling back.",
            candidate.name,
            baseline_coverage,
            new_coverage
        );
        return Ok(rejected(
            candidate,
            RejectReason::NoImprovement,
            execution.stdout,
            execution.stderr,
            duration_ms,
            cfg.max_output_bytes,
        ));
    }

    // Step 6: accepted. The commit stays; mutation score is sampled as a
    // secondary, reported metric.
    let mutation_snapshot = mutation::load(cfg.mutation_report.as_deref());
    let delta = Improvement {
        coverage_before: baseline_coverage,
        coverage_after: new_coverage,
        mutation_before: baseline_mutation,
        mutation_after: mutation_snapshot.score,
    };
    tracing::info!(
        "Candidate '{}' accepted. Coverage {:.2}% -> {:.2}%",
        candidate.name,
        baseline_coverage,
        new_coverage
    );

    Ok(ValidationOutcome {
        result: ValidationResult {
            candidate: candidate.clone(),
            verdict: Verdict::Accepted { delta },
            duration_ms,
        },
        snapshot: Some(snapshot),
        mutation: Some(mutation_snapshot),
    })
}

fn rejected(
    candidate: &Candidate,
    reason: RejectReason,
    stdout: String,
    stderr: String,
    duration_ms: u64,
    max_output_bytes: usize,
) -> ValidationOutcome {
    ValidationOutcome {
        result: ValidationResult {
            candidate: candidate.clone(),
            verdict: Verdict::Rejected {
                reason,
                stdout: exec::truncate_output(&stdout, max_output_bytes),
                stderr: exec::truncate_output(&stderr, max_output_bytes),
            },
            duration_ms,
        },
        snapshot: None,
        mutation: None,
    }
}
