//! Iteration control.
//!
//! The controller drives the run as an explicit state machine:
//! INIT -> GENERATE -> VALIDATE -> AGGREGATE -> {GENERATE | STOP}, with
//! named stop reasons. It is the sole owner of the run state and the
//! iteration history, and the only component that decides termination.

use crate::candidate::{Candidate, FailedCandidate, RejectReason, ValidationResult, Verdict};
use crate::coverage::{self, CoverageSnapshot};
use crate::db::Database;
use crate::exec;
use crate::generate::{CandidateSource, GenerationContext};
use crate::merge::{TestLayout, TestMerger};
use crate::mutation::{self, MutationSnapshot};
use crate::source::SourceFile;
use crate::triage;
use crate::validate::{self, ValidatorConfig};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// How many times a candidate name must fail at runtime before it is
/// handed to triage.
const TRIAGE_FAILURE_THRESHOLD: u32 = 2;

/// Cooperative cancellation flag shared with signal handlers.
///
/// Cancellation is honored between candidates and between iterations: an
/// in-flight candidate always completes its commit/rollback decision, so
/// the test file is never left mid-mutation.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Why the run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Desired coverage (and mutation score, when tracked) reached.
    TargetsReached,
    /// Iteration budget exhausted before reaching the targets.
    BudgetExhausted,
    /// Two consecutive iterations accepted nothing.
    Stagnation,
    /// Cancellation was requested.
    Cancelled,
}

impl StopReason {
    /// Full success, as opposed to a clean partial-success exit.
    pub fn is_success(&self) -> bool {
        matches!(self, StopReason::TargetsReached)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TargetsReached => write!(f, "targets_reached"),
            Self::BudgetExhausted => write!(f, "budget_exhausted"),
            Self::Stagnation => write!(f, "stagnation"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Loop bounds and thresholds.
#[derive(Debug, Clone)]
pub struct RunLimits {
    pub desired_coverage: f64,
    pub desired_mutation_score: f64,
    pub max_iterations: u32,
    pub max_tests_per_iteration: usize,
    /// Concurrent validation fan-out; 1 = strictly sequential.
    pub fan_out: usize,
    /// Whether a mutation report is configured. When it is not, the
    /// mutation goal is considered met and only coverage gates success.
    pub mutation_tracked: bool,
}

/// One iteration's record. Append-only; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub index: u32,
    pub coverage_before: f64,
    pub coverage_after: f64,
    pub mutation_before: f64,
    pub mutation_after: f64,
    pub results: Vec<ValidationResult>,
    pub elapsed_ms: u64,
}

impl IterationRecord {
    pub fn accepted(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.verdict.is_accepted())
            .count()
    }

    pub fn rejected(&self) -> usize {
        self.results.len() - self.accepted()
    }
}

/// The run's cumulative state, owned solely by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub coverage: f64,
    pub mutation_score: f64,
    pub accepted_total: usize,
    /// Consecutive iterations with zero accepted candidates.
    pub consecutive_empty: u32,
    pub iterations: Vec<IterationRecord>,
}

impl RunState {
    fn new(coverage: f64, mutation_score: f64) -> Self {
        Self {
            coverage,
            mutation_score,
            accepted_total: 0,
            consecutive_empty: 0,
            iterations: Vec::new(),
        }
    }
}

/// Decide whether the run should stop, and why. Checked before each
/// GENERATE phase, in priority order.
pub fn decide_continuation(state: &RunState, limits: &RunLimits) -> Option<StopReason> {
    let coverage_goal = state.coverage >= limits.desired_coverage;
    let mutation_goal =
        !limits.mutation_tracked || state.mutation_score >= limits.desired_mutation_score;
    if coverage_goal && mutation_goal {
        return Some(StopReason::TargetsReached);
    }
    if state.iterations.len() as u32 >= limits.max_iterations {
        return Some(StopReason::BudgetExhausted);
    }
    if state.consecutive_empty >= 2 {
        return Some(StopReason::Stagnation);
    }
    None
}

/// Final run outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub stop_reason: StopReason,
    pub final_coverage: f64,
    pub final_mutation_score: f64,
    pub accepted_total: usize,
    pub iterations: Vec<IterationRecord>,
}

/// State machine steps. `Validate` and `Aggregate` carry the data flowing
/// between phases.
enum Step {
    Generate,
    Validate(Vec<Candidate>),
    Aggregate {
        results: Vec<ValidationResult>,
        elapsed_ms: u64,
    },
    Stop(StopReason),
}

/// The iteration controller.
pub struct Controller {
    cfg: ValidatorConfig,
    limits: RunLimits,
    source: SourceFile,
    merger: TestMerger,
    candidates: Box<dyn CandidateSource>,
    db: Option<Database>,
    cancel: CancelToken,
    /// Where triage reports are written; `None` disables the pass.
    triage_dir: Option<PathBuf>,
    /// Runtime-failure counts per candidate name, across iterations.
    failure_counts: HashMap<String, u32>,
    /// Failures from the previous iteration, fed back to the generator.
    last_failures: Vec<FailedCandidate>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: ValidatorConfig,
        limits: RunLimits,
        source: SourceFile,
        merger: TestMerger,
        candidates: Box<dyn CandidateSource>,
        db: Option<Database>,
        cancel: CancelToken,
        triage_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            cfg,
            limits,
            source,
            merger,
            candidates,
            db,
            cancel,
            triage_dir,
            failure_counts: HashMap::new(),
            last_failures: Vec::new(),
        }
    }

    /// Run to a stop condition.
    ///
    /// Only a failing baseline escalates: a baseline test run that fails,
    /// or a baseline coverage artifact that is missing or unreadable,
    /// halts the run with an error and produces no iteration record.
    /// Everything after INIT exits cleanly with a [`RunSummary`].
    pub async fn run(mut self) -> Result<RunSummary> {
        // INIT: establish the baseline.
        tracing::info!(
            "Running baseline test command: \"{}\"",
            self.cfg.test_command
        );
        let execution =
            exec::run_test_command(&self.cfg.working_dir, &self.cfg.test_command, self.cfg.timeout)
                .await;
        if !execution.success() {
            bail!(
                "Baseline test command failed (exit code {:?}). Are you sure the command is correct? \"{}\"\nStdout:\n{}\nStderr:\n{}",
                execution.exit_code,
                self.cfg.test_command,
                execution.stdout,
                execution.stderr
            );
        }

        let snapshot = coverage::parse(&self.cfg.report_path, self.cfg.format, &self.cfg.target)
            .context("Cannot establish baseline coverage")?;
        let mutation_snapshot = mutation::load(self.cfg.mutation_report.as_deref());

        let mut state = RunState::new(snapshot.target_pct(), mutation_snapshot.score);
        let mut current_snapshot = snapshot;
        let mut current_mutation = mutation_snapshot;

        tracing::info!(
            "Initial coverage: {:.2}% (aggregate {:.2}%), mutation score: {:.2}%",
            state.coverage,
            current_snapshot.aggregate_pct(),
            state.mutation_score
        );
        tracing::info!("Desired coverage: {:.2}%", self.limits.desired_coverage);

        let run_id = match &self.db {
            Some(db) => Some(
                db.insert_run(
                    &self.source.path.display().to_string(),
                    &self.merger.path().display().to_string(),
                    &self.cfg.test_command,
                    self.limits.desired_coverage,
                    self.limits.desired_mutation_score,
                )
                .await?,
            ),
            None => None,
        };

        let mut step = Step::Generate;
        let stop_reason = loop {
            step = match step {
                Step::Generate => {
                    if self.cancel.is_cancelled() {
                        Step::Stop(StopReason::Cancelled)
                    } else if let Some(reason) = decide_continuation(&state, &self.limits) {
                        Step::Stop(reason)
                    } else {
                        let ctx = self.generation_context(&state, &current_snapshot, &current_mutation);
                        let batch = self.candidates.next_batch(&ctx).await?;
                        tracing::info!(
                            "Iteration {}: validating {} candidate(s)",
                            state.iterations.len() + 1,
                            batch.len()
                        );
                        Step::Validate(batch)
                    }
                }
                Step::Validate(batch) => {
                    let started = Instant::now();
                    let results = if self.limits.fan_out > 1 && batch.len() > 1 {
                        self.validate_arena(&batch, &mut state, &mut current_snapshot, &mut current_mutation)
                            .await?
                    } else {
                        self.validate_sequential(&batch, &mut state, &mut current_snapshot, &mut current_mutation)
                            .await?
                    };
                    Step::Aggregate {
                        results,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }
                }
                Step::Aggregate {
                    results,
                    elapsed_ms,
                } => {
                    self.aggregate(results, elapsed_ms, &mut state, run_id).await?;
                    Step::Generate
                }
                Step::Stop(reason) => break reason,
            };
        };

        if let (Some(db), Some(run_id)) = (&self.db, run_id) {
            db.finish_run(run_id, &stop_reason.to_string(), state.coverage, state.mutation_score)
                .await?;
        }

        self.log_final(&state, stop_reason);
        Ok(RunSummary {
            stop_reason,
            final_coverage: state.coverage,
            final_mutation_score: state.mutation_score,
            accepted_total: state.accepted_total,
            iterations: state.iterations,
        })
    }

    fn generation_context(
        &self,
        state: &RunState,
        snapshot: &CoverageSnapshot,
        mutation_snapshot: &MutationSnapshot,
    ) -> GenerationContext {
        let layout = self.merger.layout();
        GenerationContext {
            source_numbered: self.source.numbered(),
            test_file_content: self.merger.committed().to_string(),
            language: layout.language,
            framework: layout.framework,
            test_count: layout.test_count,
            header_indent: layout.header_indent.unwrap_or(0),
            uncovered_lines: snapshot.uncovered_target_lines(),
            coverage_pct: state.coverage,
            desired_coverage: self.limits.desired_coverage,
            mutation_score: state.mutation_score,
            desired_mutation_score: self.limits.desired_mutation_score,
            prior_failures: self.last_failures.clone(),
            mutation_survivors: mutation_snapshot.survivor_summary(),
            max_candidates: self.limits.max_tests_per_iteration,
        }
    }

    /// Baseline mode: one candidate validated end to end before the next
    /// begins. Accepted candidates stay committed, so later candidates in
    /// the batch chain on the improved baseline.
    async fn validate_sequential(
        &mut self,
        batch: &[Candidate],
        state: &mut RunState,
        current_snapshot: &mut CoverageSnapshot,
        current_mutation: &mut MutationSnapshot,
    ) -> Result<Vec<ValidationResult>> {
        let mut results = Vec::with_capacity(batch.len());
        for candidate in batch {
            if self.cancel.is_cancelled() {
                tracing::info!("Cancellation requested; finishing iteration early");
                break;
            }
            let outcome = validate::validate_candidate(
                &self.cfg,
                &mut self.merger,
                candidate,
                state.coverage,
                state.mutation_score,
            )
            .await?;

            if outcome.result.verdict.is_accepted() {
                if let Some(snapshot) = outcome.snapshot {
                    state.coverage = snapshot.target_pct();
                    *current_snapshot = snapshot;
                }
                if let Some(mutation_snapshot) = outcome.mutation {
                    state.mutation_score = mutation_snapshot.score;
                    *current_mutation = mutation_snapshot;
                }
                state.accepted_total += 1;
            }
            results.push(outcome.result);
        }
        Ok(results)
    }

    /// Optional fan-out mode: every candidate is validated concurrently
    /// against the common iteration baseline in its own working-tree copy,
    /// then arena-accepted candidates are re-validated into the canonical
    /// tree in candidate-submission order. The arena pass filters; the
    /// canonical pass decides, which keeps the merge order deterministic
    /// and the monotonicity invariant intact.
    async fn validate_arena(
        &mut self,
        batch: &[Candidate],
        state: &mut RunState,
        current_snapshot: &mut CoverageSnapshot,
        current_mutation: &mut MutationSnapshot,
    ) -> Result<Vec<ValidationResult>> {
        let test_rel = self
            .merger
            .path()
            .strip_prefix(&self.cfg.working_dir)
            .map(Path::to_path_buf);
        let test_rel = match test_rel {
            Ok(rel) => rel,
            Err(_) => {
                tracing::warn!(
                    "Test file {} is outside the working directory; falling back to sequential validation",
                    self.merger.path().display()
                );
                return self
                    .validate_sequential(batch, state, current_snapshot, current_mutation)
                    .await;
            }
        };

        let baseline_coverage = state.coverage;
        let baseline_mutation = state.mutation_score;
        let layout = self.merger.layout().clone();
        let committed = self.merger.committed().to_string();

        let mut handles = Vec::with_capacity(batch.len());
        for candidate in batch.iter().cloned() {
            let cfg = self.cfg.clone();
            let layout = layout.clone();
            let committed = committed.clone();
            let test_rel = test_rel.clone();
            handles.push(tokio::spawn(async move {
                arena_validate(
                    cfg,
                    layout,
                    committed,
                    test_rel,
                    candidate,
                    baseline_coverage,
                    baseline_mutation,
                )
                .await
            }));
        }

        // Join in submission order; a panicked arena task reads as a
        // rejected candidate, not an aborted iteration.
        let mut arena_results = Vec::with_capacity(handles.len());
        for (candidate, handle) in batch.iter().zip(handles) {
            let result = match handle.await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    tracing::warn!("Arena validation failed for '{}': {}", candidate.name, e);
                    ValidationResult {
                        candidate: candidate.clone(),
                        verdict: Verdict::Rejected {
                            reason: RejectReason::RuntimeFailure,
                            stdout: String::new(),
                            stderr: e.to_string(),
                        },
                        duration_ms: 0,
                    }
                }
                Err(e) => {
                    tracing::warn!("Arena task for '{}' panicked: {}", candidate.name, e);
                    ValidationResult {
                        candidate: candidate.clone(),
                        verdict: Verdict::Rejected {
                            reason: RejectReason::RuntimeFailure,
                            stdout: String::new(),
                            stderr: e.to_string(),
                        },
                        duration_ms: 0,
                    }
                }
            };
            arena_results.push(result);
        }

        // Merge back: re-validate arena winners against the canonical tree,
        // chaining the baseline, in candidate-submission order.
        let mut results = Vec::with_capacity(arena_results.len());
        for result in arena_results {
            if !result.verdict.is_accepted() {
                results.push(result);
                continue;
            }
            let outcome = validate::validate_candidate(
                &self.cfg,
                &mut self.merger,
                &result.candidate,
                state.coverage,
                state.mutation_score,
            )
            .await?;
            if outcome.result.verdict.is_accepted() {
                if let Some(snapshot) = outcome.snapshot {
                    state.coverage = snapshot.target_pct();
                    *current_snapshot = snapshot;
                }
                if let Some(mutation_snapshot) = outcome.mutation {
                    state.mutation_score = mutation_snapshot.score;
                    *current_mutation = mutation_snapshot;
                }
                state.accepted_total += 1;
            }
            results.push(outcome.result);
        }
        Ok(results)
    }

    /// AGGREGATE: append the iteration record, persist it, refresh the
    /// failure context for the next GENERATE, and triage persistent
    /// runtime failures.
    async fn aggregate(
        &mut self,
        results: Vec<ValidationResult>,
        elapsed_ms: u64,
        state: &mut RunState,
        run_id: Option<i64>,
    ) -> Result<()> {
        let index = state.iterations.len() as u32;
        let coverage_before = state
            .iterations
            .last()
            .map(|r| r.coverage_after)
            .unwrap_or_else(|| {
                // First iteration: reconstruct from the earliest delta.
                results
                    .iter()
                    .find_map(|r| match &r.verdict {
                        Verdict::Accepted { delta } => Some(delta.coverage_before),
                        Verdict::Rejected { .. } => None,
                    })
                    .unwrap_or(state.coverage)
            });
        let mutation_before = state
            .iterations
            .last()
            .map(|r| r.mutation_after)
            .unwrap_or(state.mutation_score);

        let record = IterationRecord {
            index,
            coverage_before,
            coverage_after: state.coverage,
            mutation_before,
            mutation_after: state.mutation_score,
            results,
            elapsed_ms,
        };

        tracing::info!(
            "Iteration {} complete: {} accepted, {} rejected, coverage {:.2}% -> {:.2}%",
            index + 1,
            record.accepted(),
            record.rejected(),
            record.coverage_before,
            record.coverage_after
        );

        if let (Some(db), Some(run_id)) = (&self.db, run_id) {
            db.insert_iteration(
                run_id,
                index,
                record.coverage_before,
                record.coverage_after,
                record.mutation_before,
                record.mutation_after,
                record.accepted(),
                record.rejected(),
                record.elapsed_ms,
            )
            .await?;
            for result in &record.results {
                db.insert_attempt(run_id, index, result).await?;
            }
        }

        if record.accepted() == 0 {
            state.consecutive_empty += 1;
        } else {
            state.consecutive_empty = 0;
        }

        // Failure context for the next generation request.
        self.last_failures = record
            .results
            .iter()
            .filter_map(|result| match &result.verdict {
                Verdict::Rejected {
                    reason,
                    stdout,
                    stderr,
                } => Some(FailedCandidate {
                    candidate: result.candidate.clone(),
                    reason: *reason,
                    error_output: format!("{}{}", stdout, stderr),
                }),
                Verdict::Accepted { .. } => None,
            })
            .collect();

        self.triage_persistent_failures();

        state.iterations.push(record);
        Ok(())
    }

    /// Classify runtime failures that persisted across retries and write
    /// the advisory report. Advisory output only.
    fn triage_persistent_failures(&mut self) {
        let Some(triage_dir) = &self.triage_dir else {
            return;
        };

        let mut persistent = Vec::new();
        for failure in &self.last_failures {
            if failure.reason != RejectReason::RuntimeFailure {
                continue;
            }
            let count = self
                .failure_counts
                .entry(failure.candidate.name.clone())
                .and_modify(|c| *c += 1)
                .or_insert(1);
            if *count >= TRIAGE_FAILURE_THRESHOLD {
                persistent.push(failure.clone());
            }
        }
        if persistent.is_empty() {
            return;
        }

        tracing::info!(
            "Analyzing {} persistent failed test(s) for potential source code issues",
            persistent.len()
        );
        let issues = triage::classify(&persistent, &self.source);
        let relevant: Vec<_> = triage::source_issues(&issues).into_iter().cloned().collect();
        if relevant.is_empty() {
            return;
        }

        let file_name = format!(
            "failed_test_analysis_{}.md",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        );
        let output = triage_dir.join(file_name);
        match triage::save_report(&relevant, &persistent, &output) {
            Ok(()) => tracing::info!(
                "Found {} test(s) revealing potential source issues; report at {}",
                relevant.len(),
                output.display()
            ),
            Err(e) => tracing::warn!("Failed to write triage report: {}", e),
        }
    }

    fn log_final(&self, state: &RunState, stop_reason: StopReason) {
        match stop_reason {
            StopReason::TargetsReached => tracing::info!(
                "Reached target coverage of {:.2}% (current: {:.2}%) in {} iteration(s)",
                self.limits.desired_coverage,
                state.coverage,
                state.iterations.len()
            ),
            StopReason::BudgetExhausted => tracing::info!(
                "Reached maximum iteration limit without achieving desired coverage. Current coverage: {:.2}%, mutation score: {:.2}%",
                state.coverage,
                state.mutation_score
            ),
            StopReason::Stagnation => tracing::info!(
                "No progress for two consecutive iterations; stopping at {:.2}% coverage",
                state.coverage
            ),
            StopReason::Cancelled => tracing::info!(
                "Run cancelled at {:.2}% coverage after {} iteration(s)",
                state.coverage,
                state.iterations.len()
            ),
        }
        tracing::info!(
            "Accepted {} candidate(s) total across {} iteration(s)",
            state.accepted_total,
            state.iterations.len()
        );
        for record in &state.iterations {
            tracing::info!(
                "  iteration {}: {} accepted, {} rejected",
                record.index + 1,
                record.accepted(),
                record.rejected()
            );
        }
    }
}

/// Validate one candidate in an isolated copy of the working tree.
async fn arena_validate(
    cfg: ValidatorConfig,
    layout: TestLayout,
    committed: String,
    test_rel: PathBuf,
    candidate: Candidate,
    baseline_coverage: f64,
    baseline_mutation: f64,
) -> Result<ValidationResult> {
    let arena = copy_tree_to_temp(&cfg.working_dir).await?;
    let arena_root = arena.path().to_path_buf();

    let arena_cfg = ValidatorConfig {
        report_path: rebase(&cfg.report_path, &cfg.working_dir, &arena_root),
        mutation_report: cfg
            .mutation_report
            .as_ref()
            .map(|p| rebase(p, &cfg.working_dir, &arena_root)),
        working_dir: arena_root.clone(),
        ..cfg
    };

    let arena_test_path = arena_root.join(test_rel);
    let mut merger = TestMerger::with_content(&arena_test_path, committed, layout);

    let outcome = validate::validate_candidate(
        &arena_cfg,
        &mut merger,
        &candidate,
        baseline_coverage,
        baseline_mutation,
    )
    .await?;

    // The arena TempDir is dropped here, cleaning up the copy.
    Ok(outcome.result)
}

/// Translate a path under `from_root` to the same location under
/// `to_root`. Relative paths attach to `to_root` directly.
fn rebase(path: &Path, from_root: &Path, to_root: &Path) -> PathBuf {
    match path.strip_prefix(from_root) {
        Ok(rel) => to_root.join(rel),
        Err(_) if path.is_relative() => to_root.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Copy a working tree to a temporary directory for isolated validation.
///
/// Returns the TempDir handle (which auto-cleans on drop).
async fn copy_tree_to_temp(root: &Path) -> Result<tempfile::TempDir> {
    let root = root.to_path_buf();

    // fs_extra::dir::copy is synchronous
    let temp_dir = tokio::task::spawn_blocking(move || -> Result<tempfile::TempDir> {
        let temp_dir = tempfile::TempDir::with_prefix("covpilot-")?;

        let options = fs_extra::dir::CopyOptions {
            overwrite: false,
            skip_exist: false,
            buffer_size: 64 * 1024, // 64KB buffer
            copy_inside: true,
            content_only: true,
            depth: 0, // Unlimited depth
        };

        fs_extra::dir::copy(&root, temp_dir.path(), &options)
            .map_err(|e| anyhow::anyhow!("Failed to copy working tree: {}", e))?;

        Ok(temp_dir)
    })
    .await??;

    Ok(temp_dir)
}
