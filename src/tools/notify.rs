//! Notification delivery for post-run hooks

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

/// Error types for notification delivery
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to start notifier: {0}")]
    Spawn(String),

    #[error("notifier exited with code {0:?}")]
    Exit(Option<i32>),

    #[error("I/O error: {0}")]
    Io(String),
}

/// A rendered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub recipient: String,
}

/// Delivers notifications
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            recipient = %notification.recipient,
            "Notification: {}\n{}",
            notification.subject,
            notification.body
        );
        Ok(())
    }
}

/// Pipes the message body into a shell command.
///
/// The command sees `NOTIFY_SUBJECT` and `NOTIFY_RECIPIENT` in its
/// environment, e.g. `mail -s "$NOTIFY_SUBJECT" "$NOTIFY_RECIPIENT"`.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    command: String,
    working_dir: PathBuf,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl NotificationSender for CommandNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .env("NOTIFY_SUBJECT", &notification.subject)
            .env("NOTIFY_RECIPIENT", &notification.recipient)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| NotifyError::Spawn(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(notification.body.as_bytes())
                .await
                .map_err(|e| NotifyError::Io(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| NotifyError::Io(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(NotifyError::Exit(output.status.code()))
        }
    }
}
