//! Post-run hook definitions

use crate::core::step::ToolCall;

/// Hook actions keyed by outcome
#[derive(Debug, Clone, Default)]
pub struct HookSet {
    /// Run under every outcome, first
    pub always: Vec<HookAction>,
    /// Run only when the outcome is success
    pub success: Vec<HookAction>,
    /// Run when the outcome is failure or abort
    pub failure: Vec<HookAction>,
}

impl HookSet {
    pub fn is_empty(&self) -> bool {
        self.always.is_empty() && self.success.is_empty() && self.failure.is_empty()
    }

    pub fn len(&self) -> usize {
        self.always.len() + self.success.len() + self.failure.len()
    }
}

/// A single post action
#[derive(Debug, Clone)]
pub enum HookAction {
    /// Run a command
    Run(ToolCall),
    /// Send a notification; fields are templates
    Notify(NotificationTemplate),
    /// Stop a tracked background process
    Stop { handle: String },
}

impl HookAction {
    pub fn describe(&self) -> String {
        match self {
            HookAction::Run(call) => format!("run `{}`", call.command),
            HookAction::Notify(template) => format!("notify {}", template.recipient),
            HookAction::Stop { handle } => format!("stop {}", handle),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationTemplate {
    pub subject: String,
    pub body: String,
    pub recipient: String,
}
