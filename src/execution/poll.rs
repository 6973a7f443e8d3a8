//! Bounded fixed-interval polling

use crate::core::StepError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a single probe observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    /// The condition holds; stop polling
    Ready,
    /// Not yet; try again after the interval
    NotReady,
    /// The condition can never hold (e.g. a failing verdict); stop polling
    Rejected(String),
}

/// Outcome of a polling loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub ready: bool,
    pub attempts_used: u32,
    /// Set when a probe rejected outright
    pub rejection: Option<String>,
}

impl PollResult {
    fn ready(attempts_used: u32) -> Self {
        Self {
            ready: true,
            attempts_used,
            rejection: None,
        }
    }

    fn exhausted(attempts_used: u32) -> Self {
        Self {
            ready: false,
            attempts_used,
            rejection: None,
        }
    }
}

/// Probes a condition every `interval`, at most `max_attempts` times
#[derive(Debug, Clone, Copy)]
pub struct PollWaiter {
    interval: Duration,
    max_attempts: u32,
}

impl PollWaiter {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Run the polling loop.
    ///
    /// `probe` receives the 1-based attempt number. There is no sleep before
    /// the first probe or after the last one. Running out of attempts is
    /// not an error; cancellation is.
    pub async fn wait_for<F, Fut>(
        &self,
        mut probe: F,
        cancel: &CancellationToken,
    ) -> Result<PollResult, StepError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ProbeStatus>,
    {
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(StepError::Cancelled),
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }

            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StepError::Cancelled),
                status = probe(attempt) => status,
            };

            debug!("Probe {}/{}: {:?}", attempt, self.max_attempts, status);

            match status {
                ProbeStatus::Ready => return Ok(PollResult::ready(attempt)),
                ProbeStatus::Rejected(reason) => {
                    return Ok(PollResult {
                        ready: false,
                        attempts_used: attempt,
                        rejection: Some(reason),
                    })
                }
                ProbeStatus::NotReady => {}
            }
        }

        Ok(PollResult::exhausted(self.max_attempts))
    }
}
