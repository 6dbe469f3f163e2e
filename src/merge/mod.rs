//! Test file merging.
//!
//! The merger is the only writer of the test file. A candidate is first
//! staged (a pure textual insertion producing the full new file content),
//! then committed to disk; a rejected candidate is rolled back to the
//! previous committed version, byte for byte. Structural analysis of the
//! test file (language, framework, header indentation, test count) runs
//! once and is cached for the whole run.

use crate::candidate::Candidate;
use crate::language::{Framework, Language};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    /// The candidate cannot be structurally placed. The candidate is
    /// dropped before any test run is spent on it.
    #[error("candidate cannot be placed: {0}")]
    StructuralReject(String),
}

/// Compute a SHA256 hash of the content.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Structural profile of the test file, derived once up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestLayout {
    pub language: Language,
    pub framework: Framework,
    /// Number of existing test cases.
    pub test_count: usize,
    /// Leading spaces expected on a test header line. `None` when the
    /// indentation could not be determined; staging then rejects.
    pub header_indent: Option<usize>,
}

impl TestLayout {
    /// Analyze a test file's structure.
    pub fn analyze(path: &Path, content: &str) -> Self {
        let language = Language::detect(path);
        let framework = Framework::detect(language, content);

        let headers: Vec<&str> = content
            .lines()
            .filter(|line| framework.is_test_header(line))
            .collect();

        Self {
            language,
            framework,
            test_count: headers.len(),
            header_indent: detect_header_indent(&headers),
        }
    }
}

/// Pick the indentation new test headers should use: the most common
/// indentation among existing headers, zero when there are none. Tab
/// indentation is reported as undetectable since candidate bodies are
/// re-indented with spaces.
fn detect_header_indent(headers: &[&str]) -> Option<usize> {
    if headers.is_empty() {
        return Some(0);
    }

    let mut counts: std::collections::BTreeMap<usize, usize> = std::collections::BTreeMap::new();
    for header in headers {
        let leading: String = header
            .chars()
            .take_while(|c| c.is_whitespace())
            .collect();
        if leading.contains('\t') {
            return None;
        }
        *counts.entry(leading.len()).or_insert(0) += 1;
    }

    // Most common indent; ties resolve to the smaller indent.
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(indent, _)| indent)
}

/// A staged candidate: the full new file content, not yet written anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staged {
    pub content: String,
    pub test_lines_added: usize,
    pub import_lines_added: usize,
}

#[derive(Debug, Clone)]
struct Version {
    content: String,
    hash: String,
}

/// The single writer of the test file.
///
/// Holds the authoritative in-memory buffer; disk always equals the last
/// committed version between operations. Version history guarantees that
/// `rollback` restores exactly the prior committed content.
pub struct TestMerger {
    path: PathBuf,
    layout: TestLayout,
    versions: Vec<Version>,
}

impl TestMerger {
    /// Open a test file, snapshot it as version zero, and analyze layout.
    pub async fn open(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read test file {}", path.display()))?;
        let layout = TestLayout::analyze(path, &content);
        Ok(Self::with_content(path, content, layout))
    }

    /// Construct a merger over known content with a pre-computed layout.
    /// Used for arena copies so the structural analysis is not repeated.
    pub fn with_content(path: &Path, content: String, layout: TestLayout) -> Self {
        let hash = compute_hash(&content);
        Self {
            path: path.to_path_buf(),
            layout,
            versions: vec![Version { content, hash }],
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &TestLayout {
        &self.layout
    }

    /// The last committed content. Version zero always exists.
    pub fn committed(&self) -> &str {
        self.versions.last().map(|v| v.content.as_str()).unwrap_or_default()
    }

    /// Hash of the last committed content.
    pub fn committed_hash(&self) -> &str {
        self.versions.last().map(|v| v.hash.as_str()).unwrap_or_default()
    }

    /// Number of committed versions, including the original.
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// Build the full-file text with the candidate inserted.
    ///
    /// Pure with respect to the committed buffer: staging the same candidate
    /// twice against the same baseline yields identical content. Nothing is
    /// written until `commit`.
    pub fn stage(&self, candidate: &Candidate) -> Result<Staged, MergeError> {
        let indent = self.layout.header_indent.ok_or_else(|| {
            MergeError::StructuralReject("test header indentation undetectable".to_string())
        })?;
        if candidate.body.trim().is_empty() {
            return Err(MergeError::StructuralReject("empty candidate body".to_string()));
        }

        let committed = self.committed();
        let line_ending = if committed.contains("\r\n") { "\r\n" } else { "\n" };
        let had_trailing_newline = committed.ends_with('\n') || committed.is_empty();

        let mut lines: Vec<String> = committed.lines().map(str::to_string).collect();
        let (tests_after, imports_after) = self.insertion_points(&lines);

        // Re-indent the candidate body to the detected header indentation.
        let body = reindent(&candidate.body, indent);
        let mut body_lines: Vec<String> = Vec::new();
        body_lines.push(String::new());
        body_lines.extend(body.lines().map(str::to_string));
        let test_lines_added = body_lines.len();

        // Insert the test block first; the import block goes in above it,
        // so its insertion index is unaffected.
        let insert_at = tests_after.min(lines.len());
        for (offset, line) in body_lines.into_iter().enumerate() {
            lines.insert(insert_at + offset, line);
        }

        // Insert new import lines, deduplicated against existing content.
        let existing: std::collections::HashSet<&str> =
            committed.lines().map(str::trim).collect();
        let new_imports: Vec<String> = candidate
            .imports
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !existing.contains(line))
            .map(str::to_string)
            .collect();
        let import_lines_added = new_imports.len();
        let import_at = imports_after.min(lines.len());
        for (offset, line) in new_imports.into_iter().enumerate() {
            lines.insert(import_at + offset, line);
        }

        let mut content = lines.join(line_ending);
        if had_trailing_newline && !content.is_empty() {
            content.push_str(line_ending);
        }

        Ok(Staged {
            content,
            test_lines_added,
            import_lines_added,
        })
    }

    /// Where to insert, as "after line N" indices (0 = top of file).
    /// Tests go at the end of the existing suite, imports after the last
    /// top-level import statement.
    fn insertion_points(&self, lines: &[String]) -> (usize, usize) {
        let imports_after = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| self.layout.language.is_import_line(line))
            .map(|(idx, _)| idx + 1)
            .last()
            .unwrap_or(0);

        // Rust test modules close with a brace; new tests go inside it.
        let tests_after = if self.layout.language == Language::Rust
            && lines.iter().any(|l| l.trim_start().starts_with("mod tests"))
        {
            lines
                .iter()
                .rposition(|line| line.trim() == "}")
                .unwrap_or(lines.len())
        } else {
            lines.len()
        };

        (tests_after, imports_after)
    }

    /// Write staged content to disk and record it as the new committed
    /// version.
    pub async fn commit(&mut self, staged: Staged) -> Result<()> {
        tokio::fs::write(&self.path, &staged.content)
            .await
            .with_context(|| format!("Failed to write test file {}", self.path.display()))?;
        let hash = compute_hash(&staged.content);
        self.versions.push(Version {
            content: staged.content,
            hash,
        });
        Ok(())
    }

    /// Restore the immediately prior committed version, on disk and in the
    /// buffer. A rollback past version zero is a no-op.
    pub async fn rollback(&mut self) -> Result<()> {
        if self.versions.len() <= 1 {
            return Ok(());
        }
        self.versions.pop();
        let content = self.committed().to_string();
        tokio::fs::write(&self.path, &content)
            .await
            .with_context(|| {
                format!("Failed to restore test file {}", self.path.display())
            })?;
        Ok(())
    }
}

/// Shift every line of `body` right so its first line starts at `indent`
/// spaces. Bodies already indented at least that far are left unchanged.
fn reindent(body: &str, indent: usize) -> String {
    let trimmed = body.trim_matches('\n');
    let initial = trimmed.len() - trimmed.trim_start_matches(' ').len();
    let delta = indent.saturating_sub(initial);
    if delta == 0 {
        return trimmed.to_string();
    }
    let pad = " ".repeat(delta);
    trimmed
        .lines()
        .map(|line| {
            if line.is_empty() {
                line.to_string()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateTag;
    use tempfile::TempDir;

    fn make_candidate(name: &str, body: &str, imports: &str) -> Candidate {
        Candidate {
            name: name.to_string(),
            body: body.to_string(),
            imports: imports.to_string(),
            behavior: String::new(),
            tag: CandidateTag::Other,
            target_lines: vec![],
        }
    }

    async fn open_merger(temp: &TempDir, file_name: &str, content: &str) -> TestMerger {
        let path = temp.path().join(file_name);
        tokio::fs::write(&path, content).await.unwrap();
        TestMerger::open(&path).await.unwrap()
    }

    const PYTEST_FILE: &str = "\
import pytest

from calc import add


def test_add_basic():
    assert add(1, 2) == 3
";

    // =========================================================================
    // TestLayout tests
    // =========================================================================

    #[test]
    fn test_analyze_pytest_layout() {
        let layout = TestLayout::analyze(Path::new("test_calc.py"), PYTEST_FILE);
        assert_eq!(layout.language, Language::Python);
        assert_eq!(layout.framework, Framework::Pytest);
        assert_eq!(layout.test_count, 1);
        assert_eq!(layout.header_indent, Some(0));
    }

    #[test]
    fn test_analyze_class_based_indent() {
        let content = "\
import unittest

class TestCalc(unittest.TestCase):
    def test_one(self):
        pass

    def test_two(self):
        pass
";
        let layout = TestLayout::analyze(Path::new("test_calc.py"), content);
        assert_eq!(layout.framework, Framework::Unittest);
        assert_eq!(layout.test_count, 2);
        assert_eq!(layout.header_indent, Some(4));
    }

    #[test]
    fn test_analyze_empty_file() {
        let layout = TestLayout::analyze(Path::new("test_calc.py"), "");
        assert_eq!(layout.test_count, 0);
        assert_eq!(layout.header_indent, Some(0));
    }

    #[test]
    fn test_analyze_tab_indent_undetectable() {
        let content = "class TestCalc:\n\tdef test_one(self):\n\t\tpass\n";
        let layout = TestLayout::analyze(Path::new("test_calc.py"), content);
        assert_eq!(layout.header_indent, None);
    }

    #[test]
    fn test_detect_header_indent_majority_wins() {
        let headers = vec!["    def test_a():", "    def test_b():", "def test_c():"];
        assert_eq!(detect_header_indent(&headers), Some(4));
    }

    // =========================================================================
    // stage tests
    // =========================================================================

    #[tokio::test]
    async fn test_stage_appends_test_at_end() {
        let temp = TempDir::new().unwrap();
        let merger = open_merger(&temp, "test_calc.py", PYTEST_FILE).await;

        let candidate = make_candidate(
            "test_add_negative",
            "def test_add_negative():\n    assert add(-1, -2) == -3",
            "",
        );
        let staged = merger.stage(&candidate).unwrap();

        assert!(staged.content.ends_with(
            "def test_add_negative():\n    assert add(-1, -2) == -3\n"
        ));
        assert_eq!(staged.test_lines_added, 3);
        // Existing content is untouched.
        assert!(staged.content.starts_with("import pytest\n"));
        assert!(staged.content.contains("def test_add_basic():"));
    }

    #[tokio::test]
    async fn test_stage_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let merger = open_merger(&temp, "test_calc.py", PYTEST_FILE).await;

        let candidate = make_candidate(
            "test_add_zero",
            "def test_add_zero():\n    assert add(0, 0) == 0",
            "import math",
        );
        let first = merger.stage(&candidate).unwrap();
        let second = merger.stage(&candidate).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_stage_inserts_imports_after_import_block() {
        let temp = TempDir::new().unwrap();
        let merger = open_merger(&temp, "test_calc.py", PYTEST_FILE).await;

        let candidate = make_candidate(
            "test_sqrt",
            "def test_sqrt():\n    assert math.sqrt(4) == 2",
            "import math",
        );
        let staged = merger.stage(&candidate).unwrap();

        let lines: Vec<&str> = staged.content.lines().collect();
        let math_idx = lines.iter().position(|l| *l == "import math").unwrap();
        let from_idx = lines
            .iter()
            .position(|l| *l == "from calc import add")
            .unwrap();
        // New import lands right after the last existing import.
        assert_eq!(math_idx, from_idx + 1);
        assert_eq!(staged.import_lines_added, 1);
    }

    #[tokio::test]
    async fn test_stage_deduplicates_existing_imports() {
        let temp = TempDir::new().unwrap();
        let merger = open_merger(&temp, "test_calc.py", PYTEST_FILE).await;

        let candidate = make_candidate(
            "test_again",
            "def test_again():\n    assert add(2, 2) == 4",
            "import pytest\nimport math",
        );
        let staged = merger.stage(&candidate).unwrap();

        assert_eq!(staged.import_lines_added, 1);
        assert_eq!(
            staged.content.matches("import pytest").count(),
            1,
            "existing import must not be duplicated"
        );
        assert!(staged.content.contains("import math"));
    }

    #[tokio::test]
    async fn test_stage_reindents_body_for_class_methods() {
        let temp = TempDir::new().unwrap();
        let content = "\
import unittest

class TestCalc(unittest.TestCase):
    def test_one(self):
        self.assertEqual(1, 1)
";
        let merger = open_merger(&temp, "test_calc.py", content).await;

        let candidate = make_candidate(
            "test_two",
            "def test_two(self):\n    self.assertEqual(2, 2)",
            "",
        );
        let staged = merger.stage(&candidate).unwrap();
        assert!(staged.content.contains("    def test_two(self):"));
        assert!(staged.content.contains("        self.assertEqual(2, 2)"));
    }

    #[tokio::test]
    async fn test_stage_rust_inserts_inside_test_module() {
        let temp = TempDir::new().unwrap();
        let content = "\
use crate::add;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic() {
        assert_eq!(add(1, 2), 3);
    }
}
";
        let merger = open_merger(&temp, "calc_test.rs", content).await;

        let candidate = make_candidate(
            "test_negative",
            "    #[test]\n    fn test_negative() {\n        assert_eq!(add(-1, 1), 0);\n    }",
            "",
        );
        let staged = merger.stage(&candidate).unwrap();

        // New test lands before the closing brace of the module.
        let close_idx = staged.content.rfind("\n}").unwrap();
        let test_idx = staged.content.find("fn test_negative").unwrap();
        assert!(test_idx < close_idx);
    }

    #[tokio::test]
    async fn test_stage_rejects_when_indent_undetectable() {
        let temp = TempDir::new().unwrap();
        let content = "class TestCalc:\n\tdef test_one(self):\n\t\tpass\n";
        let merger = open_merger(&temp, "test_calc.py", content).await;

        let candidate = make_candidate("test_two", "def test_two(self):\n    pass", "");
        let result = merger.stage(&candidate);
        assert!(matches!(result, Err(MergeError::StructuralReject(_))));
    }

    #[tokio::test]
    async fn test_stage_rejects_blank_body() {
        let temp = TempDir::new().unwrap();
        let merger = open_merger(&temp, "test_calc.py", PYTEST_FILE).await;

        let candidate = make_candidate("test_blank", "   \n  ", "");
        assert!(matches!(
            merger.stage(&candidate),
            Err(MergeError::StructuralReject(_))
        ));
    }

    #[tokio::test]
    async fn test_stage_empty_test_file() {
        let temp = TempDir::new().unwrap();
        let merger = open_merger(&temp, "test_new.py", "").await;

        let candidate = make_candidate(
            "test_first",
            "def test_first():\n    assert True",
            "from calc import add",
        );
        let staged = merger.stage(&candidate).unwrap();
        assert!(staged.content.contains("from calc import add"));
        assert!(staged.content.contains("def test_first():"));
    }

    // =========================================================================
    // commit / rollback tests
    // =========================================================================

    #[tokio::test]
    async fn test_commit_writes_disk_and_versions() {
        let temp = TempDir::new().unwrap();
        let mut merger = open_merger(&temp, "test_calc.py", PYTEST_FILE).await;
        let path = merger.path().to_path_buf();

        let candidate = make_candidate("test_more", "def test_more():\n    assert True", "");
        let staged = merger.stage(&candidate).unwrap();
        let staged_content = staged.content.clone();
        merger.commit(staged).await.unwrap();

        assert_eq!(merger.version_count(), 2);
        assert_eq!(merger.committed(), staged_content);
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk, staged_content);
    }

    #[tokio::test]
    async fn test_rollback_restores_byte_identical_content() {
        let temp = TempDir::new().unwrap();
        let mut merger = open_merger(&temp, "test_calc.py", PYTEST_FILE).await;
        let path = merger.path().to_path_buf();
        let before = merger.committed().to_string();
        let before_hash = merger.committed_hash().to_string();

        let candidate = make_candidate("test_more", "def test_more():\n    assert True", "");
        let staged = merger.stage(&candidate).unwrap();
        merger.commit(staged).await.unwrap();
        merger.rollback().await.unwrap();

        assert_eq!(merger.committed(), before);
        assert_eq!(merger.committed_hash(), before_hash);
        assert_eq!(merger.version_count(), 1);
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk, before);
    }

    #[tokio::test]
    async fn test_rollback_at_version_zero_is_noop() {
        let temp = TempDir::new().unwrap();
        let mut merger = open_merger(&temp, "test_calc.py", PYTEST_FILE).await;
        merger.rollback().await.unwrap();
        assert_eq!(merger.version_count(), 1);
        assert_eq!(merger.committed(), PYTEST_FILE);
    }

    #[tokio::test]
    async fn test_sequential_commits_accumulate() {
        let temp = TempDir::new().unwrap();
        let mut merger = open_merger(&temp, "test_calc.py", PYTEST_FILE).await;

        let first = make_candidate("test_a", "def test_a():\n    assert True", "");
        let staged = merger.stage(&first).unwrap();
        merger.commit(staged).await.unwrap();

        let second = make_candidate("test_b", "def test_b():\n    assert True", "");
        let staged = merger.stage(&second).unwrap();
        merger.commit(staged).await.unwrap();

        let content = merger.committed();
        let a_idx = content.find("def test_a").unwrap();
        let b_idx = content.find("def test_b").unwrap();
        assert!(a_idx < b_idx, "accepted tests append in order");
        assert_eq!(merger.version_count(), 3);
    }

    #[tokio::test]
    async fn test_rollback_only_removes_latest() {
        let temp = TempDir::new().unwrap();
        let mut merger = open_merger(&temp, "test_calc.py", PYTEST_FILE).await;

        let first = make_candidate("test_a", "def test_a():\n    assert True", "");
        let staged = merger.stage(&first).unwrap();
        merger.commit(staged).await.unwrap();
        let after_first = merger.committed().to_string();

        let second = make_candidate("test_b", "def test_b():\n    assert True", "");
        let staged = merger.stage(&second).unwrap();
        merger.commit(staged).await.unwrap();
        merger.rollback().await.unwrap();

        assert_eq!(merger.committed(), after_first);
        assert!(merger.committed().contains("def test_a"));
        assert!(!merger.committed().contains("def test_b"));
    }

    // =========================================================================
    // reindent tests
    // =========================================================================

    #[test]
    fn test_reindent_adds_needed_indent() {
        let body = "def test_x(self):\n    pass";
        let result = reindent(body, 4);
        assert_eq!(result, "    def test_x(self):\n        pass");
    }

    #[test]
    fn test_reindent_zero_indent_unchanged() {
        let body = "def test_x():\n    pass";
        assert_eq!(reindent(body, 0), body);
    }

    #[test]
    fn test_reindent_already_indented_unchanged() {
        let body = "    def test_x(self):\n        pass";
        assert_eq!(reindent(body, 4), body);
    }

    #[test]
    fn test_reindent_preserves_blank_lines() {
        let body = "def test_x(self):\n\n    pass";
        let result = reindent(body, 4);
        assert_eq!(result, "    def test_x(self):\n\n        pass");
    }

    #[test]
    fn test_compute_hash_stable() {
        assert_eq!(compute_hash("abc"), compute_hash("abc"));
        assert_ne!(compute_hash("abc"), compute_hash("abd"));
    }
}
