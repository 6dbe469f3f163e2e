//! The external generation collaborator seam.
//!
//! The controller never authors tests; it asks a [`CandidateSource`] for a
//! batch, handing it everything a generator needs to target the remaining
//! coverage gaps. The LLM pipeline that usually sits behind this trait is
//! out of scope here; [`FileCandidateSource`] serves pre-authored candidate
//! records from a YAML file so the binary runs end to end without it.

use crate::candidate::{Candidate, FailedCandidate};
use crate::language::{Framework, Language};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;

/// Everything the generation collaborator is given for one batch request.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    /// Source file content with 1-indexed line numbers.
    pub source_numbered: String,
    /// Current committed test file content.
    pub test_file_content: String,
    pub language: Language,
    pub framework: Framework,
    pub test_count: usize,
    pub header_indent: usize,
    /// Target-file lines not yet covered, ascending.
    pub uncovered_lines: Vec<usize>,
    pub coverage_pct: f64,
    pub desired_coverage: f64,
    pub mutation_score: f64,
    pub desired_mutation_score: f64,
    /// Candidates rejected in the previous iteration, with error excerpts.
    pub prior_failures: Vec<FailedCandidate>,
    /// Summary of mutants the suite failed to kill, empty if none.
    pub mutation_survivors: String,
    /// Upper bound on the batch size.
    pub max_candidates: usize,
}

/// Produces batches of candidate tests for the controller to validate.
#[async_trait]
pub trait CandidateSource: Send {
    /// Return up to `ctx.max_candidates` candidates, in the order they
    /// should be validated. An empty batch is a valid answer and reads as
    /// "nothing left to propose".
    async fn next_batch(&mut self, ctx: &GenerationContext) -> Result<Vec<Candidate>>;
}

/// Serves candidates from an ordered YAML file, batch by batch.
///
/// The file holds the same record shape the model pipeline produces:
/// a YAML sequence of candidates with `name`, `body`, optional `imports`,
/// `behavior`, `tag`, and `target_lines`. Malformed records are dropped at
/// ingress with a warning.
pub struct FileCandidateSource {
    queue: VecDeque<Candidate>,
}

impl FileCandidateSource {
    /// Load candidates from a YAML file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read candidates file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse candidates from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let raw: Vec<Candidate> =
            serde_yaml::from_str(content).context("Failed to parse candidates YAML")?;

        let total = raw.len();
        let queue: VecDeque<Candidate> = raw
            .into_iter()
            .filter_map(|candidate| {
                let name = candidate.name.clone();
                let clean = candidate.sanitize();
                if clean.is_none() {
                    tracing::warn!("Dropping malformed candidate record '{}'", name);
                }
                clean
            })
            .collect();

        tracing::info!("Loaded {} candidate(s) ({} malformed dropped)", queue.len(), total - queue.len());
        Ok(Self { queue })
    }

    /// Candidates not yet served.
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

#[async_trait]
impl CandidateSource for FileCandidateSource {
    async fn next_batch(&mut self, ctx: &GenerationContext) -> Result<Vec<Candidate>> {
        let take = ctx.max_candidates.min(self.queue.len());
        Ok(self.queue.drain(..take).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateTag;

    fn make_context(max_candidates: usize) -> GenerationContext {
        GenerationContext {
            source_numbered: String::new(),
            test_file_content: String::new(),
            language: Language::Python,
            framework: Framework::Pytest,
            test_count: 0,
            header_indent: 0,
            uncovered_lines: vec![],
            coverage_pct: 0.0,
            desired_coverage: 90.0,
            mutation_score: 0.0,
            desired_mutation_score: 70.0,
            prior_failures: vec![],
            mutation_survivors: String::new(),
            max_candidates,
        }
    }

    const CANDIDATES_YAML: &str = r#"
- name: test_one
  body: |
    def test_one():
        assert True
  tag: happy_path
- name: test_two
  body: |
    def test_two():
        assert True
  imports: import math
- name: test_three
  body: |
    def test_three():
        assert True
"#;

    #[test]
    fn test_from_yaml_loads_all() {
        let source = FileCandidateSource::from_yaml(CANDIDATES_YAML).unwrap();
        assert_eq!(source.remaining(), 3);
    }

    #[test]
    fn test_from_yaml_drops_malformed_records() {
        let yaml = r#"
- name: test_ok
  body: "def test_ok():\n    pass"
- name: ""
  body: "def test_anon():\n    pass"
- name: test_empty_body
  body: "   "
"#;
        let source = FileCandidateSource::from_yaml(yaml).unwrap();
        assert_eq!(source.remaining(), 1);
    }

    #[test]
    fn test_from_yaml_invalid_errors() {
        assert!(FileCandidateSource::from_yaml("not: a: list").is_err());
    }

    #[test]
    fn test_from_yaml_preserves_order_and_tags() {
        let source = FileCandidateSource::from_yaml(CANDIDATES_YAML).unwrap();
        let first = source.queue.front().unwrap();
        assert_eq!(first.name, "test_one");
        assert_eq!(first.tag, CandidateTag::HappyPath);
    }

    #[tokio::test]
    async fn test_next_batch_respects_max() {
        let mut source = FileCandidateSource::from_yaml(CANDIDATES_YAML).unwrap();
        let ctx = make_context(2);

        let batch = source.next_batch(&ctx).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].name, "test_one");
        assert_eq!(batch[1].name, "test_two");
        assert_eq!(source.remaining(), 1);
    }

    #[tokio::test]
    async fn test_next_batch_drains_to_empty() {
        let mut source = FileCandidateSource::from_yaml(CANDIDATES_YAML).unwrap();
        let ctx = make_context(10);

        let batch = source.next_batch(&ctx).await.unwrap();
        assert_eq!(batch.len(), 3);

        let batch = source.next_batch(&ctx).await.unwrap();
        assert!(batch.is_empty());
    }
}
