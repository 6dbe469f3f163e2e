//! SQLite persistence of runs, iterations, and candidate attempts.
//!
//! The database is the audit trail: every validated candidate leaves an
//! attempt row whether or not it was accepted, and the iteration history
//! can be re-read after the fact for reporting.

mod models;

pub use models::*;

use crate::candidate::{ValidationResult, Verdict};
use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;

/// Database wrapper for SQLite operations.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .with_context(|| format!("Failed to connect to database: {}", database_url))?;

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_file TEXT NOT NULL,
                test_file TEXT NOT NULL,
                test_command TEXT NOT NULL,
                desired_coverage REAL NOT NULL,
                desired_mutation_score REAL NOT NULL,
                stop_reason TEXT,
                final_coverage REAL,
                final_mutation_score REAL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                finished_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create runs table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS iterations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL,
                iteration INTEGER NOT NULL,
                coverage_before REAL NOT NULL,
                coverage_after REAL NOT NULL,
                mutation_before REAL NOT NULL,
                mutation_after REAL NOT NULL,
                accepted INTEGER NOT NULL,
                rejected INTEGER NOT NULL,
                elapsed_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (run_id) REFERENCES runs(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create iterations table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL,
                iteration INTEGER NOT NULL,
                candidate_name TEXT NOT NULL,
                tag TEXT NOT NULL,
                verdict TEXT NOT NULL,
                reject_reason TEXT,
                coverage_delta REAL,
                stdout TEXT,
                stderr TEXT,
                duration_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (run_id) REFERENCES runs(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create attempts table")?;

        Ok(())
    }

    /// Record the start of a run.
    pub async fn insert_run(
        &self,
        source_file: &str,
        test_file: &str,
        test_command: &str,
        desired_coverage: f64,
        desired_mutation_score: f64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO runs (source_file, test_file, test_command, desired_coverage, desired_mutation_score)
            VALUES (?, ?, ?, ?, ?) RETURNING id
            "#,
        )
        .bind(source_file)
        .bind(test_file)
        .bind(test_command)
        .bind(desired_coverage)
        .bind(desired_mutation_score)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert run")?;

        Ok(sqlx::Row::get(&result, "id"))
    }

    /// Mark a run as finished.
    pub async fn finish_run(
        &self,
        run_id: i64,
        stop_reason: &str,
        final_coverage: f64,
        final_mutation_score: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE runs
            SET stop_reason = ?, final_coverage = ?, final_mutation_score = ?,
                finished_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(stop_reason)
        .bind(final_coverage)
        .bind(final_mutation_score)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("Failed to finish run")?;

        Ok(())
    }

    /// Record one iteration's aggregate numbers.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_iteration(
        &self,
        run_id: i64,
        iteration: u32,
        coverage_before: f64,
        coverage_after: f64,
        mutation_before: f64,
        mutation_after: f64,
        accepted: usize,
        rejected: usize,
        elapsed_ms: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO iterations
                (run_id, iteration, coverage_before, coverage_after,
                 mutation_before, mutation_after, accepted, rejected, elapsed_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(iteration as i64)
        .bind(coverage_before)
        .bind(coverage_after)
        .bind(mutation_before)
        .bind(mutation_after)
        .bind(accepted as i64)
        .bind(rejected as i64)
        .bind(elapsed_ms as i64)
        .execute(&self.pool)
        .await
        .context("Failed to insert iteration")?;

        Ok(())
    }

    /// Record one candidate validation attempt.
    pub async fn insert_attempt(
        &self,
        run_id: i64,
        iteration: u32,
        result: &ValidationResult,
    ) -> Result<()> {
        let (verdict, reject_reason, coverage_delta, stdout, stderr) = match &result.verdict {
            Verdict::Accepted { delta } => (
                "accepted",
                None,
                Some(delta.coverage_delta()),
                None,
                None,
            ),
            Verdict::Rejected {
                reason,
                stdout,
                stderr,
            } => (
                "rejected",
                Some(reason.to_string()),
                None,
                Some(stdout.clone()),
                Some(stderr.clone()),
            ),
        };

        sqlx::query(
            r#"
            INSERT INTO attempts
                (run_id, iteration, candidate_name, tag, verdict, reject_reason,
                 coverage_delta, stdout, stderr, duration_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(iteration as i64)
        .bind(&result.candidate.name)
        .bind(result.candidate.tag.to_string())
        .bind(verdict)
        .bind(reject_reason)
        .bind(coverage_delta)
        .bind(stdout)
        .bind(stderr)
        .bind(result.duration_ms as i64)
        .execute(&self.pool)
        .await
        .context("Failed to insert attempt")?;

        Ok(())
    }

    /// All iterations of a run, in order.
    pub async fn get_iterations(&self, run_id: i64) -> Result<Vec<IterationRow>> {
        let rows = sqlx::query_as::<_, IterationRow>(
            "SELECT * FROM iterations WHERE run_id = ? ORDER BY iteration",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch iterations")?;

        Ok(rows)
    }

    /// All attempts of a run, in insertion order.
    pub async fn get_attempts(&self, run_id: i64) -> Result<Vec<AttemptRow>> {
        let rows = sqlx::query_as::<_, AttemptRow>(
            "SELECT * FROM attempts WHERE run_id = ? ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch attempts")?;

        Ok(rows)
    }

    /// A run by id.
    pub async fn get_run(&self, run_id: i64) -> Result<RunRow> {
        let row = sqlx::query_as::<_, RunRow>("SELECT * FROM runs WHERE id = ?")
            .bind(run_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to fetch run")?;

        Ok(row)
    }
}
