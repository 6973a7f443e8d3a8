//! Stage domain model

use crate::core::{hook::HookSet, step::Step};
use std::time::Duration;

/// A named phase of the pipeline
#[derive(Debug, Clone)]
pub struct Stage {
    /// Stage name, unique within a pipeline
    pub name: String,

    /// Steps, executed in order
    pub steps: Vec<Step>,

    /// Stage-scoped post actions
    pub hooks: HookSet,

    /// How often the step list may be attempted
    pub retry: RetryPolicy,

    /// Bound on one attempt of the step list
    pub timeout: Option<Duration>,

    /// A failing advisory stage is reported but does not stop the run
    pub advisory: bool,
}

/// Stage-level retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1)
    pub attempts: u32,

    /// Pause between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl Stage {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
            hooks: HookSet::default(),
            retry: RetryPolicy::none(),
            timeout: None,
            advisory: false,
        }
    }

    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry = RetryPolicy {
            attempts: attempts.max(1),
            delay,
        };
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn advisory(mut self) -> Self {
        self.advisory = true;
        self
    }
}
