//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run has not started
    Pending,
    /// Stages are executing
    Running,
    /// Every stage succeeded
    Succeeded,
    /// A stage failed
    Failed,
    /// The run was cancelled externally
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        }
    }

    /// Inverse of `as_str`
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            "aborted" => Some(RunStatus::Aborted),
            _ => None,
        }
    }
}

/// Status of a single stage within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
            StageStatus::Aborted => "aborted",
        }
    }
}

/// Engine state machine
///
/// `NotStarted -> Running(0) -> ... -> Running(n-1) -> Succeeded`, with
/// `Failed` and `Aborted` reachable from any `Running(i)`. Terminal states
/// are sticky: every transition out of them is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Running(usize),
    Succeeded,
    Failed,
    Aborted,
}

impl EngineState {
    /// Begin a run over `total` stages. A run with no stages succeeds at once.
    pub fn start(&mut self, total: usize) -> bool {
        if *self != EngineState::NotStarted {
            return false;
        }
        *self = if total == 0 {
            EngineState::Succeeded
        } else {
            EngineState::Running(0)
        };
        true
    }

    /// Move past the current stage after it succeeded
    pub fn advance(&mut self, total: usize) -> bool {
        match *self {
            EngineState::Running(i) if i + 1 < total => {
                *self = EngineState::Running(i + 1);
                true
            }
            EngineState::Running(_) => {
                *self = EngineState::Succeeded;
                true
            }
            _ => false,
        }
    }

    pub fn fail(&mut self) -> bool {
        if let EngineState::Running(_) = self {
            *self = EngineState::Failed;
            true
        } else {
            false
        }
    }

    pub fn abort(&mut self) -> bool {
        if let EngineState::Running(_) = self {
            *self = EngineState::Aborted;
            true
        } else {
            false
        }
    }


    pub fn run_status(&self) -> RunStatus {
        match self {
            EngineState::NotStarted => RunStatus::Pending,
            EngineState::Running(_) => RunStatus::Running,
            EngineState::Succeeded => RunStatus::Succeeded,
            EngineState::Failed => RunStatus::Failed,
            EngineState::Aborted => RunStatus::Aborted,
        }
    }
}

/// Bookkeeping for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current run status
    pub status: RunStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When the terminal status was assigned
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of declared stages
    pub total_stages: usize,

    /// Number of stages that finished successfully
    pub completed_stages: usize,

    /// The stage that stopped the run, if any
    pub failed_stage: Option<String>,

    /// The step within `failed_stage` that failed
    pub failed_step: Option<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: RunStatus::Pending,
            started_at: None,
            completed_at: None,
            total_stages: 0,
            completed_stages: 0,
            failed_stage: None,
            failed_step: None,
        }
    }

    /// Mark the run as started
    pub fn start(&mut self, total_stages: usize) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_stages = total_stages;
    }

    /// Assign the terminal status. Only the first call has any effect.
    pub fn finish(&mut self, status: RunStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        true
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
