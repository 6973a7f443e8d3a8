//! Deadline-bounded operations

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How a gated operation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision<T> {
    /// The operation finished before the deadline
    Completed(T),
    /// The deadline passed first; the operation was dropped
    TimedOut { after: Duration },
    /// The run was cancelled while waiting
    Cancelled,
}

impl<T> GateDecision<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, GateDecision::Completed(_))
    }
}

/// Races an operation against a deadline
#[derive(Debug, Clone, Copy)]
pub struct GateController {
    timeout: Duration,
}

impl GateController {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Drive `operation` until it finishes, the deadline passes, or `cancel`
    /// fires. The operation is polled before the deadline, so one that is
    /// ready exactly at the deadline completes.
    pub async fn with_timeout<F>(&self, cancel: &CancellationToken, operation: F) -> GateDecision<F::Output>
    where
        F: Future,
    {
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        tokio::pin!(operation);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => GateDecision::Cancelled,
            output = &mut operation => GateDecision::Completed(output),
            _ = &mut deadline => {
                warn!("Operation timed out after {:?}", self.timeout);
                GateDecision::TimedOut { after: self.timeout }
            }
        }
    }
}
