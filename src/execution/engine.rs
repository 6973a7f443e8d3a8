//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    core::{EngineState, ExecutionContext, Pipeline, RunStatus, StageStatus},
    execution::{
        events::{EventBus, ExecutionEvent},
        hooks::{HookDispatcher, HookReport},
        stage_runner::{StageResult, StageRunner, StepFailure},
    },
    tools::Toolbox,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Everything a finished run reports
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub execution_id: Uuid,
    pub pipeline: String,
    pub status: RunStatus,
    /// The stage that stopped the run
    pub failed_stage: Option<String>,
    pub failed_step: Option<String>,
    /// The failure that stopped the run
    pub error: Option<StepFailure>,
    /// One entry per stage that ran, in order
    pub stages: Vec<StageResult>,
    /// Pipeline-level post actions
    pub hooks: HookReport,
    pub artifacts: BTreeMap<String, PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Duration,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Succeeded => 0,
            RunStatus::Aborted => 130,
            _ => 1,
        }
    }
}

/// Main pipeline execution engine
pub struct PipelineEngine {
    toolbox: Toolbox,
    events: EventBus,
}

impl PipelineEngine {
    pub fn new(toolbox: Toolbox) -> Self {
        Self {
            toolbox,
            events: EventBus::new(),
        }
    }

    pub fn toolbox(&self) -> &Toolbox {
        &self.toolbox
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler);
    }

    /// Run every stage in declaration order, stopping at the first failure.
    ///
    /// Post hooks are dispatched exactly once, after the terminal status is
    /// fixed, and processes still tracked in the context are stopped last.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let started = Instant::now();
        let total = pipeline.stages.len();
        let execution_id = context.execution_id();

        info!("Starting pipeline: {} ({})", pipeline.name, execution_id);
        self.events.emit(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline.name.clone(),
            total_stages: total,
        });

        let mut state = EngineState::NotStarted;
        state.start(total);
        context.run.start(total);

        let runner = StageRunner::new(&self.toolbox, &self.events);
        let mut stages = Vec::with_capacity(total);
        let mut failure: Option<StepFailure> = None;

        while let EngineState::Running(index) = state {
            let stage = &pipeline.stages[index];

            if cancel.is_cancelled() {
                warn!("Run cancelled before stage '{}'", stage.name);
                state.abort();
                break;
            }

            info!("Stage {}/{}: {}", index + 1, total, stage.name);
            self.events.emit(ExecutionEvent::StageStarted {
                stage: stage.name.clone(),
                index,
            });

            let result = runner.run(stage, context, cancel).await;

            self.events.emit(ExecutionEvent::StageFinished {
                stage: stage.name.clone(),
                status: result.status,
                error: result.error.as_ref().map(|f| f.error.to_string()),
                duration: result.duration,
            });

            match result.status {
                StageStatus::Succeeded => {
                    context.run.completed_stages += 1;
                    state.advance(total);
                }
                StageStatus::Aborted => {
                    warn!("Stage '{}' aborted", stage.name);
                    self.record_failure(context, &result, &mut failure);
                    state.abort();
                }
                _ if stage.advisory => {
                    warn!("Advisory stage '{}' failed, continuing", stage.name);
                    state.advance(total);
                }
                _ => {
                    error!("Stage '{}' failed, stopping the run", stage.name);
                    self.record_failure(context, &result, &mut failure);
                    state.fail();
                }
            }

            stages.push(result);
        }

        let status = state.run_status();
        context.run.finish(status);
        info!("Pipeline {} finished: {}", pipeline.name, status.as_str());

        // Cleanup still has to run after a cancellation
        let hook_token = if cancel.is_cancelled() {
            CancellationToken::new()
        } else {
            cancel.clone()
        };

        let hooks = HookDispatcher::new(&self.toolbox)
            .dispatch(&pipeline.hooks, status, context, &hook_token)
            .await;
        if !pipeline.hooks.is_empty() {
            self.events.emit(ExecutionEvent::HooksDispatched {
                scope: pipeline.name.clone(),
                count: hooks.len(),
                failures: hooks.failures().count(),
            });
        }

        self.stop_remaining(context).await;

        self.events.emit(ExecutionEvent::PipelineFinished {
            execution_id,
            status,
        });

        RunOutcome {
            execution_id,
            pipeline: pipeline.name.clone(),
            status,
            failed_stage: context.run.failed_stage.clone(),
            failed_step: context.run.failed_step.clone(),
            error: failure,
            stages,
            hooks,
            artifacts: context.artifacts.clone(),
            started_at: context.run.started_at,
            completed_at: context.run.completed_at,
            duration: started.elapsed(),
        }
    }

    fn record_failure(
        &self,
        context: &mut ExecutionContext,
        result: &StageResult,
        failure: &mut Option<StepFailure>,
    ) {
        context.run.failed_stage = Some(result.stage.clone());
        context.run.failed_step = result.error.as_ref().map(|f| f.step.clone());
        *failure = result.error.clone();
    }

    /// Stop processes no stage or hook stopped
    async fn stop_remaining(&self, context: &mut ExecutionContext) {
        for (name, mut process) in context.drain_handles() {
            warn!("Stopping leftover process '{}' (pid {:?})", name, process.id());
            if let Err(e) = process.stop().await {
                warn!("Failed to stop '{}': {}", name, e);
            }
        }
    }
}
