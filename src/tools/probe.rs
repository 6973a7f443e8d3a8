//! HTTP probes for readiness checks and quality-gate verdicts

use crate::tools::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// HTTP capability used by `wait_for` and `gate` steps
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// GET `url` and return the response status code
    async fn get_status(&self, url: &str) -> Result<u16, ToolError>;

    /// GET `url` and decode the body as JSON
    async fn get_json(&self, url: &str) -> Result<Value, ToolError>;
}

/// `reqwest`-backed client
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Create a client whose individual requests give up after `request_timeout`
    pub fn new(request_timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ToolError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get_status(&self, url: &str) -> Result<u16, ToolError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::Http(e.to_string()))?;
        Ok(response.status().as_u16())
    }

    async fn get_json(&self, url: &str) -> Result<Value, ToolError> {
        self.client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ToolError::Http(e.to_string()))?
            .json::<Value>()
            .await
            .map_err(|e| ToolError::Http(e.to_string()))
    }
}

/// Inclusive range of HTTP status codes that count as ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRange {
    pub min: u16,
    pub max: u16,
}

impl StatusRange {
    pub fn contains(&self, status: u16) -> bool {
        (self.min..=self.max).contains(&status)
    }
}

impl Default for StatusRange {
    fn default() -> Self {
        Self { min: 200, max: 399 }
    }
}

/// Verdict reported by a quality-gate endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Pass,
    Fail(String),
    Pending,
}

/// Read a verdict out of a JSON document.
///
/// `field` is a dotted path (`projectStatus.status`). Values listed in `pass`
/// or `fail` decide the verdict; anything else, including a missing field,
/// is still pending.
pub fn read_verdict(document: &Value, field: &str, pass: &[String], fail: &[String]) -> GateVerdict {
    let value = field
        .split('.')
        .try_fold(document, |node, key| node.get(key));

    let verdict = match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return GateVerdict::Pending,
    };

    if pass.iter().any(|p| p.eq_ignore_ascii_case(&verdict)) {
        GateVerdict::Pass
    } else if fail.iter().any(|f| f.eq_ignore_ascii_case(&verdict)) {
        GateVerdict::Fail(verdict)
    } else {
        GateVerdict::Pending
    }
}
