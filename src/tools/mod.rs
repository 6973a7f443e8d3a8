//! External tool capabilities
//!
//! The engine never builds, scans or deploys anything itself. Every external
//! action goes through one of the traits in this module, so tests can swap
//! any capability for a fake.

pub mod audit;
pub mod invocation;
pub mod notify;
pub mod probe;
pub mod subprocess;

use crate::core::error::StepError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

pub use audit::AuditLog;
pub use invocation::{Invocation, InvocationResult, ToolError};
pub use notify::{CommandNotifier, LogNotifier, Notification, NotificationSender, NotifyError};
pub use probe::{read_verdict, GateVerdict, HttpClient, ReqwestClient, StatusRange};
pub use subprocess::ShellInvoker;

/// Capability a `run` step asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Build,
    Test,
    Analysis,
    Scanner,
    Deploy,
    #[default]
    Generic,
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolKind::Build => "build",
            ToolKind::Test => "test",
            ToolKind::Analysis => "analysis",
            ToolKind::Scanner => "scanner",
            ToolKind::Deploy => "deploy",
            ToolKind::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// Runs an external command to completion
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run the command and wait for it to exit
    async fn invoke(&self, invocation: &Invocation) -> Result<InvocationResult, ToolError>;

    /// Start the command in the background and return a handle to it
    async fn spawn(&self, _invocation: &Invocation) -> Result<Box<dyn BackgroundProcess>, ToolError> {
        Err(ToolError::Unsupported("background processes"))
    }
}

/// A process that outlives the step that started it
#[async_trait]
pub trait BackgroundProcess: Send + Sync + fmt::Debug {
    fn id(&self) -> Option<u32>;

    async fn stop(&mut self) -> Result<(), ToolError>;
}

/// The set of capabilities available to a run
#[derive(Clone)]
pub struct Toolbox {
    invokers: HashMap<ToolKind, Arc<dyn ToolInvoker>>,
    fallback: Arc<dyn ToolInvoker>,
    http: Arc<dyn HttpClient>,
    notifier: Arc<dyn NotificationSender>,
    audit: AuditLog,
}

impl Toolbox {
    /// Every tool kind runs through `fallback` until overridden
    pub fn new(fallback: Arc<dyn ToolInvoker>, http: Arc<dyn HttpClient>) -> Self {
        Self {
            invokers: HashMap::new(),
            fallback,
            http,
            notifier: Arc::new(LogNotifier),
            audit: AuditLog::new(),
        }
    }

    /// Shell invoker for every tool kind, `reqwest` for probes
    pub fn system() -> Result<Self, ToolError> {
        let http = ReqwestClient::new(Duration::from_secs(10))?;
        Ok(Self::new(Arc::new(ShellInvoker::new()), Arc::new(http)))
    }

    pub fn with_invoker(mut self, kind: ToolKind, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.invokers.insert(kind, invoker);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSender>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn invoker(&self, kind: ToolKind) -> &Arc<dyn ToolInvoker> {
        self.invokers.get(&kind).unwrap_or(&self.fallback)
    }

    pub fn http(&self) -> &Arc<dyn HttpClient> {
        &self.http
    }

    pub fn notifier(&self) -> &Arc<dyn NotificationSender> {
        &self.notifier
    }

    /// Run a tool to completion.
    ///
    /// A non-zero exit is a `ToolFailure` unless `best_effort` is set, in
    /// which case the failed result is returned as-is. Cancellation drops
    /// the in-flight invocation.
    pub async fn invoke(
        &self,
        label: &str,
        kind: ToolKind,
        invocation: &Invocation,
        best_effort: bool,
        cancel: &CancellationToken,
    ) -> Result<InvocationResult, StepError> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            result = self.invoker(kind).invoke(invocation) => result?,
        };

        self.audit.record(label, invocation, &result).await;

        if result.success() {
            return Ok(result);
        }

        if best_effort {
            warn!(
                "[{}] {} tool exited with {:?} (best effort, continuing)",
                label, kind, result.exit_code
            );
            Ok(result)
        } else {
            error!("[{}] {} tool exited with {:?}", label, kind, result.exit_code);
            Err(StepError::ToolFailure {
                exit_code: result.exit_code,
                stderr_tail: result.stderr_tail(),
            })
        }
    }

    /// Start a background process
    pub async fn spawn(
        &self,
        kind: ToolKind,
        invocation: &Invocation,
    ) -> Result<Box<dyn BackgroundProcess>, StepError> {
        self.invoker(kind).spawn(invocation).await.map_err(StepError::from)
    }
}

impl fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolbox")
            .field("overrides", &self.invokers.keys().collect::<Vec<_>>())
            .field("audit", &self.audit)
            .finish()
    }
}
