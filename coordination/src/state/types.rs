//! Persisted record types
//!
//! Everything the engine writes to a [`ProjectStore`](super::ProjectStore):
//! routing patterns, session records, the attempt log and guardrails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::escalation::FailureCategory;
use crate::prd::TaskId;
use crate::registry::ModelTier;
use crate::router::ExecutionPlan;

/// Unique identifier for sessions
pub type SessionId = String;

/// Outcome counters for one (signature, model) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPattern {
    pub project: String,
    pub signature: String,
    pub model: String,
    pub success_count: u64,
    pub fail_count: u64,
    /// Running average cost per attempt (USD)
    pub avg_cost: f64,
    pub updated_at: DateTime<Utc>,
}

impl RoutingPattern {
    pub fn new(project: &str, signature: &str, model: &str) -> Self {
        Self {
            project: project.to_string(),
            signature: signature.to_string(),
            model: model.to_string(),
            success_count: 0,
            fail_count: 0,
            avg_cost: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// Fold one outcome into the counters
    pub fn apply(&mut self, success: bool, cost: f64) {
        let old = self.samples() as f64;
        self.avg_cost = (self.avg_cost * old + cost) / (old + 1.0);
        if success {
            self.success_count += 1;
        } else {
            self.fail_count += 1;
        }
        self.updated_at = Utc::now();
    }

    pub fn samples(&self) -> u64 {
        self.success_count + self.fail_count
    }

    pub fn success_rate(&self) -> f64 {
        match self.samples() {
            0 => 0.0,
            n => self.success_count as f64 / n as f64,
        }
    }

    pub fn fail_rate(&self) -> f64 {
        match self.samples() {
            0 => 0.0,
            n => self.fail_count as f64 / n as f64,
        }
    }
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Running or paused
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Pause or resume request waiting for the session loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    Pause,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Completed,
    Failed,
    Skipped,
}

/// Final result for one task in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub state: TaskState,
    /// Model that produced the final attempt
    #[serde(default)]
    pub model: Option<String>,
    pub attempts: u32,
    pub cost_usd: f64,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            state: TaskState::Skipped,
            model: None,
            attempts: 0,
            cost_usd: 0.0,
            error: Some(reason.into()),
        }
    }
}

/// Persisted orchestration session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub project: String,
    #[serde(default)]
    pub prd_name: String,
    pub status: SessionStatus,
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(default)]
    pub current_task: Option<TaskId>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub execution_order: Vec<TaskId>,
    #[serde(default)]
    pub outcomes: BTreeMap<TaskId, TaskOutcome>,
    /// Written by out-of-process controllers, consumed by the run loop
    #[serde(default)]
    pub pending_signal: Option<ControlSignal>,
    #[serde(default)]
    pub pause_requested: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    pub plan: ExecutionPlan,
}

impl SessionRecord {
    pub fn new(
        project: impl Into<String>,
        prd_name: impl Into<String>,
        execution_order: Vec<TaskId>,
        plan: ExecutionPlan,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project: project.into(),
            prd_name: prd_name.into(),
            status: SessionStatus::Running,
            total_tasks: execution_order.len(),
            completed: 0,
            failed: 0,
            skipped: 0,
            current_task: None,
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: 0.0,
            started_at: now,
            updated_at: now,
            finished_at: None,
            execution_order,
            outcomes: BTreeMap::new(),
            pending_signal: None,
            pause_requested: false,
            last_error: None,
            plan,
        }
    }

    /// Short session ID (first 8 chars)
    pub fn short_id(&self) -> &str {
        &self.id[..8.min(self.id.len())]
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_finished(&self, task_id: &str) -> bool {
        self.outcomes.contains_key(task_id)
    }

    /// Tasks without a recorded outcome, in execution order
    pub fn remaining(&self) -> Vec<TaskId> {
        self.execution_order
            .iter()
            .filter(|id| !self.outcomes.contains_key(id.as_str()))
            .cloned()
            .collect()
    }

    /// Record a task's final outcome and bump the matching counter
    pub fn record_outcome(&mut self, task_id: &str, outcome: TaskOutcome) {
        if let Some(previous) = self.outcomes.get(task_id) {
            match previous.state {
                TaskState::Completed => self.completed -= 1,
                TaskState::Failed => self.failed -= 1,
                TaskState::Skipped => self.skipped -= 1,
            }
        }
        match outcome.state {
            TaskState::Completed => self.completed += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Skipped => self.skipped += 1,
        }
        self.outcomes.insert(task_id.to_string(), outcome);
        self.touch();
    }

    pub fn add_usage(&mut self, tokens_in: u64, tokens_out: u64, cost_usd: f64) {
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;
        self.cost_usd += cost_usd;
    }

    pub fn tokens(&self) -> u64 {
        self.tokens_in + self.tokens_out
    }

    /// Fraction of tasks with an outcome (0.0 - 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_tasks == 0 {
            1.0
        } else {
            self.outcomes.len() as f64 / self.total_tasks as f64
        }
    }
}

/// One backend attempt; append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub session_id: SessionId,
    pub project: String,
    pub task_id: TaskId,
    /// 1-based, strictly increasing per task
    pub attempt: u32,
    pub model: String,
    pub tier: ModelTier,
    pub success: bool,
    pub signature: String,
    pub cost_usd: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    #[serde(default)]
    pub escalated_from: Option<String>,
    #[serde(default)]
    pub category: Option<FailureCategory>,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Lesson learned from a failed attempt; append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guardrail {
    pub id: String,
    pub project: String,
    pub task_id: TaskId,
    pub signature: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category: FailureCategory,
    pub problem: String,
    pub fix: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_running_average() {
        let mut p = RoutingPattern::new("proj", "sig", "claude-haiku");
        p.apply(true, 0.10);
        p.apply(false, 0.20);
        p.apply(true, 0.30);
        assert_eq!(p.samples(), 3);
        assert_eq!(p.success_count, 2);
        assert!((p.avg_cost - 0.20).abs() < 1e-9);
        assert!((p.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_status_classes() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
        assert!(SessionStatus::Paused.is_active());
        assert!(!SessionStatus::Idle.is_active());
    }

    #[test]
    fn test_record_outcome_counters() {
        let order = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut s = SessionRecord::new("proj", "demo", order, ExecutionPlan::single("test"));
        s.record_outcome(
            "a",
            TaskOutcome {
                state: TaskState::Completed,
                model: Some("m".into()),
                attempts: 1,
                cost_usd: 0.01,
                error: None,
            },
        );
        s.record_outcome("b", TaskOutcome::skipped("dependency failed"));
        assert_eq!(s.completed, 1);
        assert_eq!(s.skipped, 1);
        assert_eq!(s.remaining(), vec!["c".to_string()]);
        assert!((s.progress() - 2.0 / 3.0).abs() < 1e-9);

        s.record_outcome("b", TaskOutcome::skipped("again"));
        assert_eq!(s.skipped, 1);
    }

    #[test]
    fn test_session_json_roundtrip_keeps_signal() {
        let mut s = SessionRecord::new("proj", "demo", vec![], ExecutionPlan::single("x"));
        s.pending_signal = Some(ControlSignal::Pause);
        let json = serde_json::to_string(&s).unwrap();
        let back: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pending_signal, Some(ControlSignal::Pause));
        assert_eq!(back.status, SessionStatus::Running);
    }
}
