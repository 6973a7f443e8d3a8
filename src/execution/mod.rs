//! Pipeline execution engine

pub mod engine;
pub mod events;
pub mod gate;
pub mod hooks;
pub mod poll;
pub mod stage_runner;

pub use engine::{PipelineEngine, RunOutcome};
pub use events::{EventBus, EventHandler, ExecutionEvent};
pub use gate::{GateController, GateDecision};
pub use hooks::{HookDispatcher, HookPhase, HookRecord, HookReport};
pub use poll::{PollResult, PollWaiter, ProbeStatus};
pub use stage_runner::{StageResult, StageRunner, StepFailure};
