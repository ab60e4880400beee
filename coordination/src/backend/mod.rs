//! Execution backend and quality gate seams
//!
//! The engine never talks to a model provider directly. Each attempt is a
//! [`BackendRequest`] handed to an [`ExecutionBackend`]; successful attempts
//! may then be checked by a [`QualityGate`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::escalation::FailureCategory;
use crate::prd::{Task, TaskId};

/// One model invocation
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub task_id: TaskId,
    pub model: String,
    pub prompt: String,
    /// 1-based attempt number for this task
    pub attempt: u32,
    /// Advisory: backends should abort promptly once cancelled
    pub cancel: CancellationToken,
}

/// What the backend reports for one invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendOutcome {
    pub success: bool,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub category: Option<FailureCategory>,
    #[serde(default)]
    pub message: Option<String>,
}

impl BackendOutcome {
    pub fn succeeded(tokens_in: u64, tokens_out: u64, cost_usd: f64) -> Self {
        Self {
            success: true,
            tokens_in,
            tokens_out,
            cost_usd,
            category: None,
            message: None,
        }
    }

    pub fn failed(category: Option<FailureCategory>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            category,
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Transport-level failures; mapped to failure categories, never propagated
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend timed out: {0}")]
    Timeout(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Other(String),
}

impl BackendError {
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Timeout(_) => FailureCategory::Timeout,
            Self::Unavailable(_) | Self::Other(_) => FailureCategory::Unknown,
        }
    }
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn run(&self, request: BackendRequest) -> Result<BackendOutcome, BackendError>;
}

/// Pass/fail verdict from a quality gate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl GateVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            issues: Vec::new(),
        }
    }

    pub fn fail<I, S>(issues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            passed: false,
            issues: issues.into_iter().map(Into::into).collect(),
        }
    }

    /// One-line summary used as the attempt's error message
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            "quality gate failed".to_string()
        } else {
            format!("quality gate failed: {}", self.issues.join("; "))
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QualityGate: Send + Sync {
    async fn check(&self, task: &Task) -> GateVerdict;
}
