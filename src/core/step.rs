//! Step domain model

use crate::core::condition::Predicate;
use crate::tools::{StatusRange, ToolKind};
use std::collections::BTreeMap;
use std::time::Duration;

/// A single unit of work inside a stage
#[derive(Debug, Clone)]
pub struct Step {
    /// Name used in logs and failure reports
    pub name: String,

    /// A failing best-effort step is recorded but does not fail its stage
    pub best_effort: bool,

    /// What the step does
    pub action: StepAction,
}

/// The kinds of work a step can do
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Run a tool to completion
    Run(ToolCall),
    /// Pick exactly one variant and run its steps
    Branch(Branch),
    /// Poll an endpoint until it reports ready
    WaitFor(Readiness),
    /// Poll a verdict endpoint under a deadline
    Gate(QualityGate),
    /// Record (and optionally require) a produced file
    Artifact(ArtifactCheck),
    /// Fail unless a predicate holds
    Require(Predicate),
    /// Start a long-running process and track it under a handle
    Start(BackgroundCall),
    /// Stop a tracked process
    Stop { handle: String },
}

/// An invocation of an external tool
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool: ToolKind,
    pub command: String,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
}

/// Mutually exclusive step variants
#[derive(Debug, Clone)]
pub struct Branch {
    pub name: String,
    /// Position within the stage (`2`, `2/maven/0`, ...); names may repeat, this does not
    pub path: String,
    pub variants: Vec<Variant>,
    /// Steps to run when no variant matches; None makes a miss a failure
    pub otherwise: Option<Vec<Step>>,
}

#[derive(Debug, Clone)]
pub struct Variant {
    pub label: String,
    pub when: Predicate,
    pub steps: Vec<Step>,
}

/// Readiness probe against an HTTP endpoint
#[derive(Debug, Clone)]
pub struct Readiness {
    pub url: String,
    pub interval: Duration,
    pub max_attempts: u32,
    pub expect_status: StatusRange,
}

/// Quality gate polled under an overall deadline
#[derive(Debug, Clone)]
pub struct QualityGate {
    pub url: String,
    /// Dotted JSON path holding the verdict
    pub field: String,
    pub pass: Vec<String>,
    pub fail: Vec<String>,
    pub interval: Duration,
    pub max_attempts: u32,
    pub timeout: Duration,
    /// An advisory gate logs its failure instead of failing the stage
    pub advisory: bool,
}

/// A file a step expects to exist
#[derive(Debug, Clone)]
pub struct ArtifactCheck {
    pub name: String,
    pub path: String,
    pub required: bool,
}

/// A process started in the background
#[derive(Debug, Clone)]
pub struct BackgroundCall {
    pub handle: String,
    pub tool: ToolKind,
    pub command: String,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
}

impl Step {
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            best_effort: false,
            action,
        }
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    /// Shorthand for a `run` step
    pub fn run(name: impl Into<String>, tool: ToolKind, command: impl Into<String>) -> Self {
        Self::new(
            name,
            StepAction::Run(ToolCall {
                tool,
                command: command.into(),
                env: BTreeMap::new(),
                working_dir: None,
            }),
        )
    }

    /// Handles started anywhere in this step (including branch variants)
    pub fn started_handles(&self) -> Vec<&str> {
        match &self.action {
            StepAction::Start(call) => vec![call.handle.as_str()],
            StepAction::Branch(branch) => branch
                .variants
                .iter()
                .flat_map(|v| v.steps.iter())
                .chain(branch.otherwise.iter().flatten())
                .flat_map(|s| s.started_handles())
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl StepAction {
    /// Short verb used for default step names
    pub fn verb(&self) -> &'static str {
        match self {
            StepAction::Run(_) => "run",
            StepAction::Branch(_) => "branch",
            StepAction::WaitFor(_) => "wait_for",
            StepAction::Gate(_) => "gate",
            StepAction::Artifact(_) => "artifact",
            StepAction::Require(_) => "require",
            StepAction::Start(_) => "start",
            StepAction::Stop { .. } => "stop",
        }
    }
}
