//! Running target files
//!
//! The loop only needs one thing from an executor: run a file and say whether
//! it failed, with the text to show the model. `PythonExecutor` is the
//! concrete implementation used by the CLI.

use crate::util::{run_command_with_timeout, truncate};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Marker Python prints at the start of an uncaught exception report.
pub const FAILURE_MARKER: &str = "Traceback";

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_OUTPUT_CHARS: usize = 20_000;

/// Outcome of running one target file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Trimmed stdout on success, the failure trace otherwise
    pub output: String,
    pub failed: bool,
}

impl Execution {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            failed: false,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            failed: true,
        }
    }

    /// Failure text for signature tracking and prompts, `None` when clean.
    pub fn failure_text(&self) -> Option<&str> {
        self.failed.then_some(self.output.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to start `{program}` for {file}: {source}")]
    Spawn {
        program: String,
        file: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs a single target file. Calls must not affect each other.
pub trait Executor: Send + Sync {
    fn run(&self, file: &str) -> Result<Execution, ExecutorError>;
}

/// Runs `<interpreter> <file>` from inside the project directory.
#[derive(Debug, Clone)]
pub struct PythonExecutor {
    code_dir: PathBuf,
    interpreter: String,
    timeout: Duration,
}

impl PythonExecutor {
    pub fn new(code_dir: impl AsRef<Path>) -> Self {
        Self {
            code_dir: code_dir.as_ref().to_path_buf(),
            interpreter: "python".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Executor for PythonExecutor {
    fn run(&self, file: &str) -> Result<Execution, ExecutorError> {
        let mut command = Command::new(&self.interpreter);
        command.current_dir(&self.code_dir).arg(file);

        let result = run_command_with_timeout(&mut command, self.timeout).map_err(|source| {
            ExecutorError::Spawn {
                program: self.interpreter.clone(),
                file: file.to_string(),
                source,
            }
        })?;

        let execution = classify(
            &result.stdout,
            &result.stderr,
            result.success(),
            result.timed_out,
            self.timeout,
        );
        debug!(file, failed = execution.failed, "executed target");
        Ok(execution)
    }
}

/// Decide pass/fail from captured output.
///
/// A clean exit is judged by stdout alone, so a program that logs a handled
/// exception to stderr and exits 0 passes. Any other exit is judged by
/// stderr. A run killed for taking too long always fails.
fn classify(
    stdout: &str,
    stderr: &str,
    exited_ok: bool,
    timed_out: bool,
    timeout: Duration,
) -> Execution {
    if timed_out {
        let mut text = stderr.trim().to_string();
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!(
            "{}: execution timed out after {}s",
            FAILURE_MARKER,
            timeout.as_secs()
        ));
        return Execution::failed(truncate(&text, MAX_OUTPUT_CHARS));
    }

    let output = truncate(if exited_ok { stdout } else { stderr }.trim(), MAX_OUTPUT_CHARS);
    if output.contains(FAILURE_MARKER) {
        Execution::failed(output)
    } else {
        Execution::passed(output)
    }
}
