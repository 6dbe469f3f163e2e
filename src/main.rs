mod candidate;
mod config;
mod controller;
mod coverage;
mod db;
mod exec;
mod generate;
mod language;
mod merge;
mod mutation;
mod source;
mod triage;
mod validate;

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::controller::{CancelToken, Controller, RunLimits};
use crate::coverage::CoverageFormat;
use crate::db::Database;
use crate::generate::FileCandidateSource;
use crate::merge::TestMerger;
use crate::source::SourceFile;
use crate::validate::ValidatorConfig;

#[derive(Parser)]
#[command(name = "covpilot")]
#[command(version)]
#[command(about = "Coverage-driven unit test synthesis")]
struct Cli {
    /// Path to the source file under test
    #[arg(long)]
    source_file: PathBuf,

    /// Path to the existing test file
    #[arg(long)]
    test_file: PathBuf,

    /// Where the evolving test file is written; defaults to editing the
    /// test file in place
    #[arg(long)]
    test_file_output: Option<PathBuf>,

    /// Project root; the test command runs here
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// YAML file of candidate test records to validate
    #[arg(long)]
    candidates: PathBuf,

    /// Full test command, run with `sh -c` (overrides .covpilot.toml)
    #[arg(long)]
    test_command: Option<String>,

    /// Coverage report path the test command writes
    #[arg(long)]
    coverage_report: Option<PathBuf>,

    /// Coverage report format
    #[arg(long, value_enum)]
    coverage_format: Option<CoverageFormat>,

    /// Optional mutation report path (YAML)
    #[arg(long)]
    mutation_report: Option<PathBuf>,

    /// Target coverage percentage
    #[arg(long)]
    desired_coverage: Option<f64>,

    /// Target mutation score percentage
    #[arg(long)]
    desired_mutation_score: Option<f64>,

    /// Iteration budget
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Candidates validated per iteration
    #[arg(long)]
    max_tests_per_iteration: Option<usize>,

    /// Concurrent validation fan-out; 1 = sequential
    #[arg(long)]
    fan_out: Option<usize>,

    /// Wall-clock timeout per test run, in seconds
    #[arg(long)]
    timeout_seconds: Option<u64>,

    /// Attempts database path
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Disable the attempts database
    #[arg(long)]
    no_db: bool,

    /// Disable the failed-test triage pass
    #[arg(long)]
    no_triage: bool,

    /// Exit with code 2 if desired coverage is not reached
    #[arg(long)]
    strict_coverage: bool,

    /// Exit with code 3 if desired mutation score is not reached
    #[arg(long)]
    strict_mutation_score: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Validate the input paths up front.
    if !cli.source_file.is_file() {
        bail!("Source file not found at {}", cli.source_file.display());
    }
    if !cli.test_file.is_file() {
        bail!("Test file not found at {}", cli.test_file.display());
    }
    if !cli.project_root.is_dir() {
        bail!("Project root not found at {}", cli.project_root.display());
    }

    let file_config = Config::load(&cli.project_root)?;

    // CLI overrides the project config file.
    let test_command = cli
        .test_command
        .or(file_config.exec.test_command.clone())
        .context("No test command given (use --test-command or .covpilot.toml)")?;
    let report_path = cli
        .coverage_report
        .or(file_config.coverage.report_path.clone())
        .context("No coverage report path given (use --coverage-report or .covpilot.toml)")?;
    let report_path = resolve(&cli.project_root, report_path);
    let format = cli.coverage_format.unwrap_or(file_config.coverage.format);
    let mutation_report = cli
        .mutation_report
        .or(file_config.coverage.mutation_report.clone())
        .map(|p| resolve(&cli.project_root, p));
    let timeout = Duration::from_secs(
        cli.timeout_seconds.unwrap_or(file_config.exec.timeout_seconds),
    );

    // Work on a copy of the test file when an output path is given; the
    // original is left untouched.
    let test_file = match &cli.test_file_output {
        Some(output) => {
            std::fs::copy(&cli.test_file, output).with_context(|| {
                format!("Failed to copy test file to {}", output.display())
            })?;
            output.clone()
        }
        None => cli.test_file.clone(),
    };

    let limits = RunLimits {
        desired_coverage: cli
            .desired_coverage
            .unwrap_or(file_config.run.desired_coverage),
        desired_mutation_score: cli
            .desired_mutation_score
            .unwrap_or(file_config.run.desired_mutation_score),
        max_iterations: cli.max_iterations.unwrap_or(file_config.run.max_iterations),
        max_tests_per_iteration: cli
            .max_tests_per_iteration
            .unwrap_or(file_config.run.max_tests_per_iteration),
        fan_out: cli.fan_out.unwrap_or(file_config.run.fan_out).max(1),
        mutation_tracked: mutation_report.is_some(),
    };

    let validator_cfg = ValidatorConfig {
        working_dir: cli.project_root.clone(),
        test_command,
        timeout,
        report_path,
        format,
        target: cli.source_file.clone(),
        mutation_report,
        max_output_bytes: file_config.exec.max_output_bytes,
    };

    let source = SourceFile::load(&cli.source_file)?;
    let merger = TestMerger::open(&test_file).await?;
    tracing::info!(
        "Test file {}: {} ({}), {} existing test(s)",
        test_file.display(),
        merger.layout().language,
        merger.layout().framework,
        merger.layout().test_count
    );

    let candidates = FileCandidateSource::from_path(&cli.candidates)?;

    let database = if cli.no_db {
        None
    } else {
        let db_path = cli.db_path.unwrap_or_else(|| file_config.database_path());
        let db = Database::new(&db_path).await?;
        db.run_migrations().await?;
        tracing::info!("Recording attempts to {}", db_path.display());
        Some(db)
    };

    let triage_dir = if cli.no_triage {
        None
    } else {
        Some(cli.project_root.join("potential_source_issues"))
    };

    // Ctrl-C requests a graceful stop: the in-flight candidate finishes
    // its commit/rollback decision before the run winds down.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Cancellation requested, stopping after the current candidate");
                cancel.cancel();
            }
        });
    }

    let strict_coverage = cli.strict_coverage;
    let strict_mutation_score = cli.strict_mutation_score;
    let desired_coverage = limits.desired_coverage;
    let desired_mutation_score = limits.desired_mutation_score;
    let mutation_tracked = limits.mutation_tracked;

    let controller = Controller::new(
        validator_cfg,
        limits,
        source,
        merger,
        Box::new(candidates),
        database,
        cancel,
        triage_dir,
    );

    let summary = controller.run().await?;

    if strict_coverage && summary.final_coverage < desired_coverage {
        tracing::error!(
            "Desired coverage of {:.2}% not reached (current: {:.2}%)",
            desired_coverage,
            summary.final_coverage
        );
        std::process::exit(2);
    }
    if strict_mutation_score
        && mutation_tracked
        && summary.final_mutation_score < desired_mutation_score
    {
        tracing::error!(
            "Desired mutation score of {:.2}% not reached (current: {:.2}%)",
            desired_mutation_score,
            summary.final_mutation_score
        );
        std::process::exit(3);
    }

    Ok(())
}

/// Resolve a possibly relative path against the project root.
fn resolve(project_root: &std::path::Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        project_root.join(path)
    }
}
