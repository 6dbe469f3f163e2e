//! Test command execution.
//!
//! Runs the externally configured test command in the project working
//! directory and captures its outcome. The executor is agnostic to language
//! and framework; its only contract with the rest of the system is the exit
//! code and the captured output.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

/// Outcome of one test command execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Exit code of the command, `None` if it could not be spawned or was
    /// killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// The run exceeded the wall-clock timeout. Reported distinctly and
    /// never conflated with a logical test failure.
    pub timed_out: bool,
}

impl ExecutionResult {
    /// Whether the suite passed: exit code 0 within the timeout.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Combined stdout + stderr, in that order.
    pub fn combined_output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Run a shell command with a wall-clock timeout.
///
/// The command is executed via `sh -c` to support shell features like pipes.
pub async fn run_test_command(
    working_dir: &Path,
    command: &str,
    timeout: Duration,
) -> ExecutionResult {
    let start = Instant::now();

    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(c) => c,
        Err(e) => {
            return ExecutionResult {
                exit_code: None,
                stdout: String::new(),
                stderr: format!("Failed to spawn command: {}", e),
                duration_ms: start.elapsed().as_millis() as u64,
                timed_out: false,
            };
        }
    };

    let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(output)) => ExecutionResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            timed_out: false,
        },
        Ok(Err(e)) => ExecutionResult {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("Command execution error: {}", e),
            duration_ms,
            timed_out: false,
        },
        Err(_) => {
            tracing::debug!("Test command timed out after {:?}", timeout);
            ExecutionResult {
                exit_code: None,
                stdout: String::new(),
                stderr: format!("Command timed out after {} seconds", timeout.as_secs()),
                duration_ms,
                timed_out: true,
            }
        }
    }
}

/// Truncate captured output before storing it in results.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        output.to_string()
    } else {
        let mut end = max_bytes;
        while end > 0 && !output.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...(truncated)", &output[..end])
    }
}
