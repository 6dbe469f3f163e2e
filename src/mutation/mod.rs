//! Mutation score tracking.
//!
//! The mutation report is an optional, secondary signal: it is read into a
//! [`MutationSnapshot`] and reported alongside coverage, but never gates
//! candidate acceptance. The expected report shape is the YAML written by
//! mut.py-style runners: a top-level `mutation_score` plus a `mutations`
//! list whose entries carry a `status` and nested per-operator records.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// A mutant the current suite failed to kill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurvivingMutant {
    /// 1-indexed source line the mutation was applied to.
    pub line: usize,
    /// Operator abbreviation from the report (e.g. "ROR").
    pub operator: String,
}

/// Aggregate mutation state captured from one report. Immutable per capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationSnapshot {
    /// Mutation score 0-100.
    pub score: f64,
    pub survivors: Vec<SurvivingMutant>,
}

impl MutationSnapshot {
    /// Snapshot used when no mutation report is configured or present.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Human-readable survivor summary handed to the generation
    /// collaborator so it can target the lines the suite misses.
    pub fn survivor_summary(&self) -> String {
        if self.survivors.is_empty() {
            return String::new();
        }
        let mut lines = vec![format!("Mutation score: {:.2}%", self.score)];
        lines.push("Surviving mutants:".to_string());
        for (idx, mutant) in self.survivors.iter().enumerate() {
            lines.push(format!(
                "{}) line {}, operator: {}",
                idx + 1,
                mutant.line,
                operator_full_name(&mutant.operator)
            ));
        }
        lines.join("\n")
    }
}

/// Expand a mutation operator abbreviation to its full name.
pub fn operator_full_name(abbreviation: &str) -> &'static str {
    match abbreviation.to_ascii_uppercase().as_str() {
        "AOD" => "Arithmetic Operator Deletion",
        "AOR" => "Arithmetic Operator Replacement",
        "ASR" => "Assignment Operator Replacement",
        "BCR" => "Break Continue Replacement",
        "COD" => "Conditional Operator Deletion",
        "CRP" => "Comparison Replacement",
        "DDL" => "Decorator Deletion",
        "EHD" => "Exception Handler Deletion",
        "EXS" => "Exception Swallowing",
        "LCR" => "Logical Connector Replacement",
        "LOD" => "Logical Operator Deletion",
        "ROR" => "Relational Operator Replacement",
        "RSI" => "Raise Statement Insertion",
        "SCR" => "Slice Range Creation",
        "SIR" => "Slice Index Remove",
        "ZIL" => "Zero Iteration Loop",
        _ => "Unknown operator",
    }
}

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default)]
    mutation_score: f64,
    #[serde(default)]
    mutations: Vec<RawMutation>,
}

#[derive(Debug, Deserialize)]
struct RawMutation {
    #[serde(default)]
    status: String,
    #[serde(default)]
    mutations: Vec<RawOperator>,
}

#[derive(Debug, Deserialize)]
struct RawOperator {
    #[serde(default)]
    lineno: usize,
    #[serde(default)]
    operator: String,
}

/// Load a mutation snapshot from an optional report path.
///
/// A missing file or an unreadable report yields the empty snapshot with a
/// warning: the mutation metric is advisory and must never halt the run.
pub fn load(report_path: Option<&Path>) -> MutationSnapshot {
    let Some(path) = report_path else {
        return MutationSnapshot::empty();
    };
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!("No mutation report at {}: {}", path.display(), e);
            return MutationSnapshot::empty();
        }
    };
    match parse(&content) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!("Ignoring malformed mutation report {}: {}", path.display(), e);
            MutationSnapshot::empty()
        }
    }
}

/// Parse the mut.py-style YAML report body.
pub fn parse(content: &str) -> anyhow::Result<MutationSnapshot> {
    let raw: RawReport = serde_yaml::from_str(content)?;

    let mut survivors = Vec::new();
    for mutation in &raw.mutations {
        if mutation.status != "survived" {
            continue;
        }
        for op in &mutation.mutations {
            survivors.push(SurvivingMutant {
                line: op.lineno,
                operator: op.operator.clone(),
            });
        }
    }

    Ok(MutationSnapshot {
        score: raw.mutation_score,
        survivors,
    })
}
