//! Language and test-framework detection.
//!
//! The validation loop itself is language-agnostic: the test command is an
//! opaque shell invocation. Language and framework only inform structural
//! placement of candidate code and the classification of failure output.

use std::path::Path;

/// Source languages the structural analyzer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    Rust,
    JavaScript,
    Go,
    Unknown,
}

impl Language {
    /// Detect the language from a file extension.
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") => Language::Python,
            Some("rs") => Language::Rust,
            Some("js") | Some("jsx") | Some("ts") | Some("tsx") | Some("mjs") => {
                Language::JavaScript
            }
            Some("go") => Language::Go,
            _ => Language::Unknown,
        }
    }

    /// Human-readable name for the language.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::Rust => "Rust",
            Language::JavaScript => "JavaScript",
            Language::Go => "Go",
            Language::Unknown => "Unknown",
        }
    }

    /// Whether a top-level line is an import statement in this language.
    pub fn is_import_line(&self, line: &str) -> bool {
        let trimmed = line.trim_start();
        if trimmed.len() != line.len() {
            // Indented lines are never top-level imports.
            return false;
        }
        match self {
            Language::Python => trimmed.starts_with("import ") || trimmed.starts_with("from "),
            Language::Rust => trimmed.starts_with("use ") || trimmed.starts_with("extern crate "),
            Language::JavaScript => {
                trimmed.starts_with("import ")
                    || (trimmed.starts_with("const ") && trimmed.contains("require("))
            }
            Language::Go => trimmed.starts_with("import"),
            Language::Unknown => false,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Test frameworks recognized in existing test files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framework {
    Pytest,
    Unittest,
    CargoTest,
    Jest,
    GoTest,
    Unknown,
}

impl Framework {
    /// Detect the framework from test file content, given the language.
    pub fn detect(language: Language, content: &str) -> Self {
        match language {
            Language::Python => {
                if content.contains("unittest.TestCase") || content.contains("(TestCase)") {
                    Framework::Unittest
                } else {
                    Framework::Pytest
                }
            }
            Language::Rust => Framework::CargoTest,
            Language::JavaScript => Framework::Jest,
            Language::Go => Framework::GoTest,
            Language::Unknown => Framework::Unknown,
        }
    }

    /// Human-readable name for the framework.
    pub fn name(&self) -> &'static str {
        match self {
            Framework::Pytest => "pytest",
            Framework::Unittest => "unittest",
            Framework::CargoTest => "cargo test",
            Framework::Jest => "jest",
            Framework::GoTest => "go test",
            Framework::Unknown => "unknown",
        }
    }

    /// Whether a line opens a test case in this framework.
    pub fn is_test_header(&self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self {
            Framework::Pytest => {
                trimmed.starts_with("def test_") || trimmed.starts_with("async def test_")
            }
            Framework::Unittest => trimmed.starts_with("def test"),
            Framework::CargoTest => {
                trimmed.starts_with("#[test]") || trimmed.starts_with("#[tokio::test]")
            }
            Framework::Jest => {
                trimmed.starts_with("it(")
                    || trimmed.starts_with("it.each(")
                    || trimmed.starts_with("test(")
                    || trimmed.starts_with("test.each(")
            }
            Framework::GoTest => trimmed.starts_with("func Test"),
            Framework::Unknown => false,
        }
    }

    /// Output markers that indicate the suite never ran the tests: the file
    /// failed to compile, import, or collect. Used to tell COMPILE_ERROR
    /// rejections apart from RUNTIME_FAILURE ones.
    pub fn compile_error_markers(&self) -> &'static [&'static str] {
        match self {
            Framework::Pytest | Framework::Unittest => &[
                "errors during collection",
                "error during collection",
                "ImportError while importing",
                "ModuleNotFoundError",
                "SyntaxError",
                "IndentationError",
            ],
            Framework::CargoTest => &["error[E", "could not compile"],
            Framework::Jest => &[
                "SyntaxError",
                "Cannot find module",
                "Test suite failed to run",
            ],
            Framework::GoTest => &["build failed", "[build failed]", "syntax error"],
            Framework::Unknown => &["SyntaxError"],
        }
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
