//! Run configuration.
//!
//! Defaults live in an optional `.covpilot.toml` at the project root; CLI
//! arguments override whatever the file sets. An absent or empty file means
//! all defaults.

use crate::coverage::CoverageFormat;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project-level configuration loaded from `.covpilot.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Iteration loop settings.
    #[serde(default)]
    pub run: RunSection,

    /// Test command execution settings.
    #[serde(default)]
    pub exec: ExecSection,

    /// Coverage artifact settings.
    #[serde(default)]
    pub coverage: CoverageSection,

    /// Data directory (where the attempts database is stored).
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Target coverage percentage for the source file.
    #[serde(default = "default_desired_coverage")]
    pub desired_coverage: f64,

    /// Target mutation score percentage. Reported, not gating.
    #[serde(default = "default_desired_mutation_score")]
    pub desired_mutation_score: f64,

    /// Iteration budget.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Candidate batch size requested per iteration.
    #[serde(default = "default_max_tests_per_iteration")]
    pub max_tests_per_iteration: usize,

    /// Concurrent validation fan-out. 1 = strictly sequential.
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecSection {
    /// The full test command, run with `sh -c` in the project root.
    #[serde(default)]
    pub test_command: Option<String>,

    /// Wall-clock timeout per test run, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Truncation limit for stored test output (bytes).
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageSection {
    /// Path the test command writes the coverage artifact to.
    #[serde(default)]
    pub report_path: Option<PathBuf>,

    /// Artifact format.
    #[serde(default = "default_format")]
    pub format: CoverageFormat,

    /// Optional mutation report path (YAML).
    #[serde(default)]
    pub mutation_report: Option<PathBuf>,
}

impl Default for CoverageSection {
    fn default() -> Self {
        Self {
            report_path: None,
            format: default_format(),
            mutation_report: None,
        }
    }
}

// Default value functions
fn default_desired_coverage() -> f64 {
    90.0
}

fn default_desired_mutation_score() -> f64 {
    70.0
}

fn default_max_iterations() -> u32 {
    10
}

fn default_max_tests_per_iteration() -> usize {
    4
}

fn default_fan_out() -> usize {
    1
}

fn default_timeout_seconds() -> u64 {
    300 // 5 minutes
}

fn default_max_output_bytes() -> usize {
    10000
}

fn default_format() -> CoverageFormat {
    CoverageFormat::Lcov
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            desired_coverage: default_desired_coverage(),
            desired_mutation_score: default_desired_mutation_score(),
            max_iterations: default_max_iterations(),
            max_tests_per_iteration: default_max_tests_per_iteration(),
            fan_out: default_fan_out(),
        }
    }
}

impl Config {
    /// Load configuration from `<project_root>/.covpilot.toml`, or defaults
    /// if the file does not exist.
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".covpilot.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            ProjectDirs::from("com", "covpilot", "covpilot")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".covpilot"))
        })
    }

    /// Get the attempts database file path.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("covpilot.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // =========================================================================
    // Default value tests
    // =========================================================================

    #[test]
    fn test_default_run_section() {
        let section = RunSection::default();
        assert_eq!(section.desired_coverage, 90.0);
        assert_eq!(section.desired_mutation_score, 70.0);
        assert_eq!(section.max_iterations, 10);
        assert_eq!(section.max_tests_per_iteration, 4);
        assert_eq!(section.fan_out, 1);
    }

    #[test]
    fn test_default_exec_section() {
        let section = ExecSection::default();
        assert!(section.test_command.is_none());
        // serde defaults apply on parse, struct Default is derived.
        let parsed: ExecSection = toml::from_str("").unwrap();
        assert_eq!(parsed.timeout_seconds, 300);
        assert_eq!(parsed.max_output_bytes, 10000);
    }

    // =========================================================================
    // Config parsing tests
    // =========================================================================

    #[test]
    fn test_parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.run.desired_coverage, 90.0);
        assert!(config.exec.test_command.is_none());
        assert!(config.coverage.report_path.is_none());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[run]
desired_coverage = 85.0
max_iterations = 3

[exec]
test_command = "pytest --cov=src --cov-report=lcov"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.run.desired_coverage, 85.0);
        assert_eq!(config.run.max_iterations, 3);
        // Unset fields fall back to defaults.
        assert_eq!(config.run.max_tests_per_iteration, 4);
        assert_eq!(
            config.exec.test_command.as_deref(),
            Some("pytest --cov=src --cov-report=lcov")
        );
        assert_eq!(config.exec.timeout_seconds, 300);
    }

    #[test]
    fn test_parse_coverage_section() {
        let toml = r#"
[coverage]
report_path = "coverage.json"
format = "json"
mutation_report = "mut_report.yaml"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.coverage.report_path,
            Some(PathBuf::from("coverage.json"))
        );
        assert_eq!(config.coverage.format, CoverageFormat::Json);
        assert_eq!(
            config.coverage.mutation_report,
            Some(PathBuf::from("mut_report.yaml"))
        );
    }

    // =========================================================================
    // File I/O tests
    // =========================================================================

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let temp = TempDir::new().unwrap();
        let config = Config::load(temp.path()).unwrap();
        assert_eq!(config.run.desired_coverage, 90.0);
    }

    #[test]
    fn test_load_empty_file_returns_defaults() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".covpilot.toml"), "  \n").unwrap();
        let config = Config::load(temp.path()).unwrap();
        assert_eq!(config.run.max_iterations, 10);
    }

    #[test]
    fn test_load_valid_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".covpilot.toml"),
            "[run]\nfan_out = 4\n",
        )
        .unwrap();
        let config = Config::load(temp.path()).unwrap();
        assert_eq!(config.run.fan_out, 4);
    }

    #[test]
    fn test_load_invalid_toml_errors() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".covpilot.toml"), "invalid {{{{ toml").unwrap();
        assert!(Config::load(temp.path()).is_err());
    }

    #[test]
    fn test_data_dir_with_custom() {
        let config = Config {
            data_dir: Some("/custom/path".into()),
            ..Default::default()
        };
        assert_eq!(config.data_dir(), PathBuf::from("/custom/path"));
    }

    #[test]
    fn test_database_path() {
        let config = Config {
            data_dir: Some("/test/data".into()),
            ..Default::default()
        };
        assert_eq!(config.database_path(), PathBuf::from("/test/data/covpilot.db"));
    }
}
