//! Branch predicates and their evaluation

use crate::core::{context::ExecutionContext, state::StageStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A predicate over the execution context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// A file or directory exists, relative to the working directory
    FileExists(String),
    /// An environment variable of the run has exactly this value
    EnvEquals { name: String, value: String },
    /// A run variable is defined and non-empty
    VariableSet(String),
    /// A stage of this run already succeeded
    StageSucceeded(String),
    /// A stage of this run already failed
    StageFailed(String),
    /// An artifact with this name was recorded
    ArtifactRecorded(String),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::FileExists(path) => write!(f, "file_exists({})", path),
            Predicate::EnvEquals { name, value } => write!(f, "env {} == {:?}", name, value),
            Predicate::VariableSet(name) => write!(f, "variable_set({})", name),
            Predicate::StageSucceeded(stage) => write!(f, "stage_succeeded({})", stage),
            Predicate::StageFailed(stage) => write!(f, "stage_failed({})", stage),
            Predicate::ArtifactRecorded(name) => write!(f, "artifact_recorded({})", name),
            Predicate::All(items) => write_list(f, "all", items),
            Predicate::Any(items) => write_list(f, "any", items),
            Predicate::Not(inner) => write!(f, "not({})", inner),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, name: &str, items: &[Predicate]) -> fmt::Result {
    write!(f, "{}(", name)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(")")
}

/// Resolves predicates against a context.
///
/// Evaluation reads only the context (and the files under its working
/// directory), so the same context always selects the same branch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, predicate: &Predicate, context: &ExecutionContext) -> bool {
        match predicate {
            Predicate::FileExists(path) => context.resolve_path(path).exists(),
            Predicate::EnvEquals { name, value } => {
                context.env.get(name).is_some_and(|v| v == value)
            }
            Predicate::VariableSet(name) => {
                context.get_variable(name).is_some_and(|v| !v.is_empty())
            }
            Predicate::StageSucceeded(stage) => {
                context.stage_status(stage) == Some(StageStatus::Succeeded)
            }
            Predicate::StageFailed(stage) => {
                context.stage_status(stage) == Some(StageStatus::Failed)
            }
            Predicate::ArtifactRecorded(name) => context.artifact(name).is_some(),
            Predicate::All(items) => items.iter().all(|p| self.evaluate(p, context)),
            Predicate::Any(items) => items.iter().any(|p| self.evaluate(p, context)),
            Predicate::Not(inner) => !self.evaluate(inner, context),
        }
    }
}
