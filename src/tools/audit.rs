//! Audit log sink for tool output

use crate::tools::{Invocation, InvocationResult};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

/// Records every tool invocation and its output.
///
/// Output always goes to `tracing`; when a file is configured it is also
/// appended there.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Record one finished invocation. Write errors are logged, not returned.
    pub async fn record(&self, label: &str, invocation: &Invocation, result: &InvocationResult) {
        debug!(
            target: "stagegate::audit",
            "[{}] `{}` -> {:?} in {:?}",
            label,
            invocation.command,
            result.exit_code,
            result.duration
        );
        for line in result.stdout.lines() {
            trace!(target: "stagegate::audit", "[{}] {}", label, line);
        }
        for line in result.stderr.lines() {
            trace!(target: "stagegate::audit", "[{}] stderr: {}", label, line);
        }

        let Some(path) = &self.path else {
            return;
        };

        let entry = format!(
            "=== [{}] {} ===\n$ {}\n(cwd: {})\n{}{}--- exit: {:?}, duration: {:?}\n\n",
            chrono::Utc::now().to_rfc3339(),
            label,
            invocation.command,
            invocation.working_dir.display(),
            result.stdout,
            if result.stderr.is_empty() {
                String::new()
            } else {
                format!("--- stderr ---\n{}", result.stderr)
            },
            result.exit_code,
            result.duration
        );

        if let Err(e) = append(path, entry.as_bytes()).await {
            warn!("Failed to write audit log {}: {}", path.display(), e);
        }
    }
}

async fn append(path: &PathBuf, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}
