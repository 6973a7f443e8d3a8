//! Post-action dispatch

use crate::core::{ExecutionContext, HookAction, HookSet, RunStatus, StepError};
use crate::tools::{Notification, Toolbox};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Which hook list an action came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    Always,
    Success,
    Failure,
}

/// Result of one hook action
#[derive(Debug, Clone, Serialize)]
pub struct HookRecord {
    pub phase: HookPhase,
    pub action: String,
    /// Set when the action failed
    pub error: Option<String>,
}

/// Everything a dispatch ran
#[derive(Debug, Clone, Default, Serialize)]
pub struct HookReport {
    pub records: Vec<HookRecord>,
}

impl HookReport {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &HookRecord> {
        self.records.iter().filter(|r| r.error.is_some())
    }
}

/// Runs always-hooks, then the success or failure set for an outcome.
///
/// Hook failures are logged and reported; they never change the outcome.
pub struct HookDispatcher<'a> {
    toolbox: &'a Toolbox,
}

impl<'a> HookDispatcher<'a> {
    pub fn new(toolbox: &'a Toolbox) -> Self {
        Self { toolbox }
    }

    pub async fn dispatch(
        &self,
        hooks: &HookSet,
        outcome: RunStatus,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> HookReport {
        let mut report = HookReport::default();
        if hooks.is_empty() {
            return report;
        }

        debug!("Dispatching {} hook(s) for outcome {}", hooks.len(), outcome.as_str());

        let (phase, selected) = if outcome == RunStatus::Succeeded {
            (HookPhase::Success, &hooks.success)
        } else {
            (HookPhase::Failure, &hooks.failure)
        };

        for (phase, action) in hooks
            .always
            .iter()
            .map(|a| (HookPhase::Always, a))
            .chain(selected.iter().map(|a| (phase, a)))
        {
            let error = self.run_action(action, context, cancel).await.err();
            if let Some(error) = &error {
                warn!("Hook '{}' failed: {}", action.describe(), error);
            }
            report.records.push(HookRecord {
                phase,
                action: action.describe(),
                error,
            });
        }

        report
    }

    async fn run_action(
        &self,
        action: &HookAction,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<(), String> {
        match action {
            HookAction::Run(call) => {
                let invocation =
                    context.invocation(&call.command, &call.env, call.working_dir.as_deref());
                self.toolbox
                    .invoke("hook", call.tool, &invocation, false, cancel)
                    .await
                    .map(|_| ())
                    .map_err(|e: StepError| e.to_string())
            }
            HookAction::Notify(template) => {
                let notification = Notification {
                    subject: context.render(&template.subject),
                    body: context.render(&template.body),
                    recipient: context.render(&template.recipient),
                };
                self.toolbox
                    .notifier()
                    .send(&notification)
                    .await
                    .map_err(|e| e.to_string())
            }
            HookAction::Stop { handle } => match context.take_handle(handle) {
                Some(mut process) => {
                    info!("Stopping '{}' (pid {:?})", handle, process.id());
                    process.stop().await.map_err(|e| e.to_string())
                }
                None => {
                    debug!("Process '{}' is not running", handle);
                    Ok(())
                }
            },
        }
    }
}
