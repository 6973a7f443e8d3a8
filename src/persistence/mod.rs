//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

use crate::core::{ExecutionContext, RunStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Summary of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Terminal (or current) run status
    pub status: RunStatus,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When the run reached its terminal status
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of stages that succeeded
    pub completed_stages: usize,

    /// Number of declared stages
    pub total_stages: usize,

    /// The stage that stopped the run
    pub failed_stage: Option<String>,

    /// The step within `failed_stage` that failed
    pub failed_step: Option<String>,
}

impl ExecutionSummary {
    /// Fraction of stages that succeeded (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        self.completed_stages as f64 / self.total_stages as f64
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary, replacing any earlier one with the same ID
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// List all runs of a pipeline, newest first
    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        execs.insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(execs.get(&execution_id).cloned())
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let mut result: Vec<ExecutionSummary> = execs
            .values()
            .filter(|e| e.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let execs = self.executions.read().await;
        let mut names: Vec<String> = execs.values().map(|e| e.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Create a summary from the context of a finished run
pub fn create_summary(context: &ExecutionContext) -> ExecutionSummary {
    let run = &context.run;
    ExecutionSummary {
        execution_id: run.execution_id,
        pipeline_name: context.pipeline_name.clone(),
        status: run.status,
        started_at: run.started_at.unwrap_or_else(Utc::now),
        completed_at: run.completed_at,
        completed_stages: run.completed_stages,
        total_stages: run.total_stages,
        failed_stage: run.failed_stage.clone(),
        failed_step: run.failed_step.clone(),
    }
}

/// Save the summary of a finished run. A failing store is logged and
/// yields `None` so the run's own result still gets reported.
pub async fn record_execution(
    store: &dyn PersistenceBackend,
    context: &ExecutionContext,
) -> Option<ExecutionSummary> {
    let summary = create_summary(context);
    match store.save_execution(&summary).await {
        Ok(()) => Some(summary),
        Err(e) => {
            warn!("Failed to save execution history: {:#}", e);
            None
        }
    }
}
