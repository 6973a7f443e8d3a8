//! Step and stage error kinds

use crate::tools::ToolError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Classification of a step failure, reported alongside stage results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ToolFailure,
    TimeoutFailure,
    UnreadyFailure,
    ConditionFailure,
    ArtifactMissing,
    GateRejected,
    Cancelled,
    Spawn,
}

/// Why a step did not succeed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    /// The invoked tool exited non-zero
    #[error("tool exited with {}: {stderr_tail}", exit_code.map(|c| format!("code {}", c)).unwrap_or_else(|| "a signal".to_string()))]
    ToolFailure {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    /// A gate or bounded wait ran past its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A readiness probe never succeeded within its attempt bound
    #[error("not ready after {attempts} attempts")]
    Unready { attempts: u32 },

    /// A required precondition was absent
    #[error("condition not met: {0}")]
    Condition(String),

    /// An expected artifact was not produced
    #[error("artifact '{name}' missing at {}", path.display())]
    ArtifactMissing { name: String, path: PathBuf },

    /// A quality gate returned a failing verdict
    #[error("quality gate rejected: {0}")]
    GateRejected(String),

    /// The run was cancelled while this step was blocked
    #[error("cancelled")]
    Cancelled,

    /// The tool could not be launched at all
    #[error("failed to launch tool: {0}")]
    Spawn(String),
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::ToolFailure { .. } => ErrorKind::ToolFailure,
            StepError::Timeout(_) => ErrorKind::TimeoutFailure,
            StepError::Unready { .. } => ErrorKind::UnreadyFailure,
            StepError::Condition(_) => ErrorKind::ConditionFailure,
            StepError::ArtifactMissing { .. } => ErrorKind::ArtifactMissing,
            StepError::GateRejected(_) => ErrorKind::GateRejected,
            StepError::Cancelled => ErrorKind::Cancelled,
            StepError::Spawn(_) => ErrorKind::Spawn,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Cancelled)
    }
}

impl From<ToolError> for StepError {
    fn from(error: ToolError) -> Self {
        StepError::Spawn(error.to_string())
    }
}
