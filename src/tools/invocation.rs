//! Invocation request and result types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Number of stderr lines kept in a failure report
pub const STDERR_TAIL_LINES: usize = 20;

/// Error types for launching or talking to an external tool
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("{0} is not supported by this invoker")]
    Unsupported(&'static str),
}

/// A fully rendered command ready to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Shell command line
    pub command: String,

    /// Directory the command runs in
    pub working_dir: PathBuf,

    /// Environment variables added to the process
    pub env: HashMap<String, String>,
}

impl Invocation {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Outcome of running a tool to completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Exit code (None when the process was killed by a signal)
    pub exit_code: Option<i32>,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Wall-clock duration
    pub duration: Duration,
}

impl InvocationResult {
    pub fn new(exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last lines of stderr, used in failure reports
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self.stderr.trim_end().lines().collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        lines[start..].join("\n")
    }
}
