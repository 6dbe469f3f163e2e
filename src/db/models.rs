use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A synthesis run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunRow {
    pub id: i64,
    pub source_file: String,
    pub test_file: String,
    pub test_command: String,
    pub desired_coverage: f64,
    pub desired_mutation_score: f64,
    /// Stop reason, set when the run finishes.
    pub stop_reason: Option<String>,
    pub final_coverage: Option<f64>,
    pub final_mutation_score: Option<f64>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

/// One iteration of a run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IterationRow {
    pub id: i64,
    pub run_id: i64,
    pub iteration: i64,
    pub coverage_before: f64,
    pub coverage_after: f64,
    pub mutation_before: f64,
    pub mutation_after: f64,
    pub accepted: i64,
    pub rejected: i64,
    pub elapsed_ms: i64,
    pub created_at: String,
}

/// One candidate validation attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttemptRow {
    pub id: i64,
    pub run_id: i64,
    pub iteration: i64,
    pub candidate_name: String,
    pub tag: String,
    /// "accepted" or "rejected".
    pub verdict: String,
    pub reject_reason: Option<String>,
    pub coverage_delta: Option<f64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub duration_ms: i64,
    pub created_at: String,
}
