//! Execution events and their delivery

use crate::core::{RunStatus, StageStatus};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        total_stages: usize,
    },
    StageStarted {
        stage: String,
        index: usize,
    },
    StageRetrying {
        stage: String,
        attempt: u32,
        max_attempts: u32,
    },
    StepStarted {
        stage: String,
        step: String,
    },
    StepFinished {
        stage: String,
        step: String,
        success: bool,
        best_effort: bool,
        error: Option<String>,
    },
    BranchSelected {
        stage: String,
        branch: String,
        variant: Option<String>,
    },
    StageFinished {
        stage: String,
        status: StageStatus,
        error: Option<String>,
        duration: Duration,
    },
    HooksDispatched {
        /// Stage name, or the pipeline name for run-level hooks
        scope: String,
        count: usize,
        failures: usize,
    },
    PipelineFinished {
        execution_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Delivers events synchronously to every registered handler, in
/// registration order
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.push(Arc::new(handler));
        }
    }

    pub fn emit(&self, event: ExecutionEvent) {
        // Clone the list so a handler may subscribe without deadlocking
        let handlers = match self.handlers.lock() {
            Ok(handlers) => handlers.clone(),
            Err(_) => return,
        };
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.handlers.lock().map(|h| h.len()).unwrap_or_default();
        f.debug_struct("EventBus").field("handlers", &count).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handlers_receive_events_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            bus.subscribe(move |event| {
                if let ExecutionEvent::StageStarted { stage, .. } = event {
                    seen.lock().unwrap().push(format!("{}:{}", tag, stage));
                }
            });
        }

        bus.emit(ExecutionEvent::StageStarted {
            stage: "Build".to_string(),
            index: 0,
        });

        assert_eq!(*seen.lock().unwrap(), vec!["first:Build", "second:Build"]);
    }
}
