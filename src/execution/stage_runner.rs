//! Stage runner - executes one stage's steps and its post actions

use crate::{
    core::{
        ArtifactCheck, Branch, ConditionEvaluator, ExecutionContext, QualityGate, Readiness,
        RunStatus, Stage, StageStatus, Step, StepAction, StepError,
    },
    execution::{
        events::{EventBus, ExecutionEvent},
        gate::{GateController, GateDecision},
        hooks::{HookDispatcher, HookReport},
        poll::{PollWaiter, ProbeStatus},
    },
    tools::{read_verdict, GateVerdict, Toolbox},
};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A step that failed, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: StepError,
}

fn serialize_error<S: serde::Serializer>(error: &StepError, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&error.to_string())
}

/// Result of running one stage
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: String,
    pub status: StageStatus,
    /// The failure that stopped the stage
    pub error: Option<StepFailure>,
    /// Attempts made at the step list
    pub attempts: u32,
    /// Best-effort steps that failed during the last attempt
    pub best_effort_failures: Vec<StepFailure>,
    /// Stage-scoped post actions that ran
    pub hooks: HookReport,
    pub duration: Duration,
}

impl StageResult {
    pub fn succeeded(&self) -> bool {
        self.status == StageStatus::Succeeded
    }
}

/// What a finished step asks of the runner
enum StepOutcome<'s> {
    Done,
    /// Run these steps next (a branch's chosen variant)
    Expand(&'s [Step]),
}

/// Per-attempt bookkeeping, readable after the attempt is dropped
#[derive(Debug, Default)]
struct Attempt {
    current_step: String,
    best_effort_failures: Vec<StepFailure>,
}

/// Executes stages against a toolbox
pub struct StageRunner<'a> {
    toolbox: &'a Toolbox,
    events: &'a EventBus,
    evaluator: ConditionEvaluator,
}

impl<'a> StageRunner<'a> {
    pub fn new(toolbox: &'a Toolbox, events: &'a EventBus) -> Self {
        Self {
            toolbox,
            events,
            evaluator: ConditionEvaluator::new(),
        }
    }

    /// Run a stage to completion, including its post actions
    pub async fn run(
        &self,
        stage: &Stage,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> StageResult {
        let started = Instant::now();
        context.set_stage_status(&stage.name, StageStatus::Running);
        context.enter_stage(&stage.name);

        let mut attempts = 0;
        let (outcome, best_effort_failures) = loop {
            attempts += 1;
            let mut attempt = Attempt::default();
            let outcome = self.run_attempt(stage, context, cancel, &mut attempt).await;

            match outcome {
                Err(failure)
                    if !failure.error.is_cancelled() && attempts < stage.retry.attempts =>
                {
                    warn!(
                        "Stage '{}' failed at '{}' (attempt {}/{}): {}",
                        stage.name, failure.step, attempts, stage.retry.attempts, failure.error
                    );
                    self.events.emit(ExecutionEvent::StageRetrying {
                        stage: stage.name.clone(),
                        attempt: attempts + 1,
                        max_attempts: stage.retry.attempts,
                    });

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            break (
                                Err(StepFailure { step: failure.step, error: StepError::Cancelled }),
                                attempt.best_effort_failures,
                            );
                        }
                        _ = tokio::time::sleep(stage.retry.delay) => {}
                    }
                }
                outcome => break (outcome, attempt.best_effort_failures),
            }
        };

        let status = match &outcome {
            Ok(()) => StageStatus::Succeeded,
            Err(failure) if failure.error.is_cancelled() => StageStatus::Aborted,
            Err(_) => StageStatus::Failed,
        };
        context.set_stage_status(&stage.name, status);

        let hooks = self.dispatch_hooks(stage, status, context, cancel).await;
        context.leave_stage();

        StageResult {
            stage: stage.name.clone(),
            status,
            error: outcome.err(),
            attempts,
            best_effort_failures,
            hooks,
            duration: started.elapsed(),
        }
    }

    /// One pass over the step list, bounded by the stage timeout
    async fn run_attempt(
        &self,
        stage: &Stage,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
        attempt: &mut Attempt,
    ) -> Result<(), StepFailure> {
        let Some(timeout) = stage.timeout else {
            return self.run_steps(stage, context, cancel, attempt).await;
        };

        let steps = self.run_steps(stage, context, cancel, attempt);
        let decision = GateController::new(timeout).with_timeout(cancel, steps).await;
        match decision {
            GateDecision::Completed(result) => result,
            GateDecision::TimedOut { after } => {
                error!("Stage '{}' timed out after {:?}", stage.name, after);
                Err(StepFailure {
                    step: attempt.current_step.clone(),
                    error: StepError::Timeout(after),
                })
            }
            GateDecision::Cancelled => Err(StepFailure {
                step: attempt.current_step.clone(),
                error: StepError::Cancelled,
            }),
        }
    }

    async fn run_steps(
        &self,
        stage: &Stage,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
        attempt: &mut Attempt,
    ) -> Result<(), StepFailure> {
        let mut queue: VecDeque<&Step> = stage.steps.iter().collect();

        while let Some(step) = queue.pop_front() {
            attempt.current_step = step.name.clone();

            if cancel.is_cancelled() {
                return Err(StepFailure {
                    step: step.name.clone(),
                    error: StepError::Cancelled,
                });
            }

            info!("[{}] {}", stage.name, step.name);
            self.events.emit(ExecutionEvent::StepStarted {
                stage: stage.name.clone(),
                step: step.name.clone(),
            });

            match self.run_step(stage, step, context, cancel).await {
                Ok(outcome) => {
                    if let StepOutcome::Expand(steps) = outcome {
                        for next in steps.iter().rev() {
                            queue.push_front(next);
                        }
                    }
                    self.step_finished(stage, step, None);
                }
                Err(error) if step.best_effort && !error.is_cancelled() => {
                    warn!(
                        "[{}] Step '{}' failed (best effort, continuing): {}",
                        stage.name, step.name, error
                    );
                    self.step_finished(stage, step, Some(&error));
                    attempt.best_effort_failures.push(StepFailure {
                        step: step.name.clone(),
                        error,
                    });
                }
                Err(error) => {
                    if !error.is_cancelled() {
                        error!("[{}] Step '{}' failed: {}", stage.name, step.name, error);
                    }
                    self.step_finished(stage, step, Some(&error));
                    return Err(StepFailure {
                        step: step.name.clone(),
                        error,
                    });
                }
            }
        }

        Ok(())
    }

    fn step_finished(&self, stage: &Stage, step: &Step, error: Option<&StepError>) {
        self.events.emit(ExecutionEvent::StepFinished {
            stage: stage.name.clone(),
            step: step.name.clone(),
            success: error.is_none(),
            best_effort: step.best_effort,
            error: error.map(|e| e.to_string()),
        });
    }

    async fn run_step<'s>(
        &self,
        stage: &Stage,
        step: &'s Step,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome<'s>, StepError> {
        match &step.action {
            StepAction::Run(call) => {
                let invocation =
                    context.invocation(&call.command, &call.env, call.working_dir.as_deref());
                debug!("[{}] {} tool: {}", step.name, call.tool, invocation.command);

                let result = self
                    .toolbox
                    .invoke(&step.name, call.tool, &invocation, step.best_effort, cancel)
                    .await?;

                if result.success() {
                    Ok(StepOutcome::Done)
                } else {
                    Err(StepError::ToolFailure {
                        exit_code: result.exit_code,
                        stderr_tail: result.stderr_tail(),
                    })
                }
            }
            StepAction::Branch(branch) => self.select_variant(stage, branch, context),
            StepAction::WaitFor(readiness) => {
                self.wait_for(readiness, context, cancel).await?;
                Ok(StepOutcome::Done)
            }
            StepAction::Gate(gate) => {
                match self.quality_gate(gate, context, cancel).await {
                    Err(error) if gate.advisory && !error.is_cancelled() => {
                        warn!("[{}] Advisory gate did not pass: {}", step.name, error);
                    }
                    result => result?,
                }
                Ok(StepOutcome::Done)
            }
            StepAction::Artifact(check) => {
                self.check_artifact(check, context)?;
                Ok(StepOutcome::Done)
            }
            StepAction::Require(predicate) => {
                if self.evaluator.evaluate(predicate, context) {
                    Ok(StepOutcome::Done)
                } else {
                    Err(StepError::Condition(format!("requirement not met: {}", predicate)))
                }
            }
            StepAction::Start(call) => {
                let invocation =
                    context.invocation(&call.command, &call.env, call.working_dir.as_deref());
                let process = self.toolbox.spawn(call.tool, &invocation).await?;
                info!(
                    "[{}] Started '{}' (pid {:?}): {}",
                    step.name,
                    call.handle,
                    process.id(),
                    invocation.command
                );

                if let Some(mut previous) = context.insert_handle(call.handle.clone(), process) {
                    warn!("Replacing running process '{}'", call.handle);
                    if let Err(e) = previous.stop().await {
                        warn!("Failed to stop previous '{}': {}", call.handle, e);
                    }
                }
                Ok(StepOutcome::Done)
            }
            StepAction::Stop { handle } => {
                match context.take_handle(handle) {
                    Some(mut process) => {
                        info!("[{}] Stopping '{}' (pid {:?})", step.name, handle, process.id());
                        process.stop().await?;
                    }
                    None => debug!("Process '{}' is not running", handle),
                }
                Ok(StepOutcome::Done)
            }
        }
    }

    /// Resolve a branch to the steps of exactly one variant.
    ///
    /// The choice is made once per run and recorded in the context; a stage
    /// retry reuses it.
    fn select_variant<'s>(
        &self,
        stage: &Stage,
        branch: &'s Branch,
        context: &mut ExecutionContext,
    ) -> Result<StepOutcome<'s>, StepError> {
        let chosen = match context.selection(&stage.name, &branch.path) {
            Some(selection) => selection.variant.clone(),
            None => {
                let chosen = branch
                    .variants
                    .iter()
                    .find(|v| self.evaluator.evaluate(&v.when, context))
                    .map(|v| v.label.clone());

                if chosen.is_none() && branch.otherwise.is_none() {
                    return Err(StepError::Condition(format!(
                        "no variant of '{}' matched",
                        branch.name
                    )));
                }

                info!(
                    "[{}] Branch '{}' -> {}",
                    stage.name,
                    branch.name,
                    chosen.as_deref().unwrap_or("otherwise")
                );
                context.record_selection(&stage.name, branch, chosen.clone());
                self.events.emit(ExecutionEvent::BranchSelected {
                    stage: stage.name.clone(),
                    branch: branch.name.clone(),
                    variant: chosen.clone(),
                });
                chosen
            }
        };

        let steps = match chosen {
            Some(label) => branch
                .variants
                .iter()
                .find(|v| v.label == label)
                .map(|v| v.steps.as_slice())
                .ok_or_else(|| {
                    StepError::Condition(format!("variant '{}' of '{}' not found", label, branch.name))
                })?,
            None => branch.otherwise.as_deref().unwrap_or_default(),
        };

        Ok(StepOutcome::Expand(steps))
    }

    async fn wait_for(
        &self,
        readiness: &Readiness,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<(), StepError> {
        let url = context.render(&readiness.url);
        let http = self.toolbox.http();
        let range = readiness.expect_status;

        let result = PollWaiter::new(readiness.interval, readiness.max_attempts)
            .wait_for(
                |attempt| {
                    let url = url.as_str();
                    async move {
                        match http.get_status(url).await {
                            Ok(status) if range.contains(status) => ProbeStatus::Ready,
                            Ok(status) => {
                                debug!("{} returned {} (attempt {})", url, status, attempt);
                                ProbeStatus::NotReady
                            }
                            Err(e) => {
                                debug!("{} unreachable (attempt {}): {}", url, attempt, e);
                                ProbeStatus::NotReady
                            }
                        }
                    }
                },
                cancel,
            )
            .await?;

        if result.ready {
            info!("{} ready after {} probe(s)", url, result.attempts_used);
            Ok(())
        } else {
            Err(StepError::Unready {
                attempts: result.attempts_used,
            })
        }
    }

    async fn quality_gate(
        &self,
        gate: &QualityGate,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<(), StepError> {
        let url = context.render(&gate.url);
        let http = self.toolbox.http();

        let waiter = PollWaiter::new(gate.interval, gate.max_attempts);
        let poll = waiter.wait_for(
            |attempt| {
                let url = url.as_str();
                async move {
                    match http.get_json(url).await {
                        Ok(document) => match read_verdict(&document, &gate.field, &gate.pass, &gate.fail) {
                            GateVerdict::Pass => ProbeStatus::Ready,
                            GateVerdict::Fail(verdict) => ProbeStatus::Rejected(verdict),
                            GateVerdict::Pending => {
                                debug!("Quality gate pending (attempt {})", attempt);
                                ProbeStatus::NotReady
                            }
                        },
                        Err(e) => {
                            debug!("Quality gate unreachable (attempt {}): {}", attempt, e);
                            ProbeStatus::NotReady
                        }
                    }
                }
            },
            cancel,
        );

        let decision = GateController::new(gate.timeout).with_timeout(cancel, poll).await;
        match decision {
            GateDecision::Completed(result) => {
                let result = result?;
                if result.ready {
                    info!("Quality gate passed after {} poll(s)", result.attempts_used);
                    Ok(())
                } else if let Some(verdict) = result.rejection {
                    Err(StepError::GateRejected(verdict))
                } else {
                    Err(StepError::Unready {
                        attempts: result.attempts_used,
                    })
                }
            }
            GateDecision::TimedOut { after } => Err(StepError::Timeout(after)),
            GateDecision::Cancelled => Err(StepError::Cancelled),
        }
    }

    fn check_artifact(&self, check: &ArtifactCheck, context: &mut ExecutionContext) -> Result<(), StepError> {
        let path = context.resolve_path(&check.path);

        if path.exists() {
            debug!("Artifact '{}' at {}", check.name, path.display());
            context.record_artifact(check.name.clone(), path);
            Ok(())
        } else if check.required {
            Err(StepError::ArtifactMissing {
                name: check.name.clone(),
                path,
            })
        } else {
            warn!("Artifact '{}' not found at {}", check.name, path.display());
            Ok(())
        }
    }

    /// Stage-scoped post actions. After a cancellation they run under a
    /// fresh token so cleanup can proceed.
    async fn dispatch_hooks(
        &self,
        stage: &Stage,
        status: StageStatus,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> HookReport {
        if stage.hooks.is_empty() {
            return HookReport::default();
        }

        let outcome = match status {
            StageStatus::Succeeded => RunStatus::Succeeded,
            StageStatus::Aborted => RunStatus::Aborted,
            _ => RunStatus::Failed,
        };
        let token = if cancel.is_cancelled() {
            CancellationToken::new()
        } else {
            cancel.clone()
        };

        let report = HookDispatcher::new(self.toolbox)
            .dispatch(&stage.hooks, outcome, context, &token)
            .await;

        self.events.emit(ExecutionEvent::HooksDispatched {
            scope: stage.name.clone(),
            count: report.len(),
            failures: report.failures().count(),
        });
        report
    }
}
