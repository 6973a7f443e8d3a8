//! stagegate - a staged build, test, scan and deploy pipeline runner

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod tools;

// Re-export commonly used types
pub use core::{ExecutionContext, Pipeline, RunStatus, Stage, Step, StepError};
pub use execution::{ExecutionEvent, PipelineEngine, RunOutcome};
pub use tools::{ToolInvoker, ToolKind, Toolbox};
