//! Read-only view of the source file under test.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// The source file whose coverage the run is trying to raise.
///
/// Content is snapshotted once at startup and never re-read: acceptance
/// decisions must be made against a stable view even if an external editor
/// touches the file mid-run.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub content: String,
}

impl SourceFile {
    /// Load and snapshot the source file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read source file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            content,
        })
    }

    /// The file name component, used to match entries in coverage reports.
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Line-numbered rendering (1-indexed), handed to the generation
    /// collaborator and used when reporting target lines.
    pub fn numbered(&self) -> String {
        let mut out = String::with_capacity(self.content.len() + self.content.lines().count() * 6);
        for (idx, line) in self.content.lines().enumerate() {
            out.push_str(&format!("{}: {}\n", idx + 1, line));
        }
        out
    }

    /// Fetch a single line (1-indexed), if it exists.
    pub fn line(&self, number: usize) -> Option<&str> {
        if number == 0 {
            return None;
        }
        self.content.lines().nth(number - 1)
    }
}
