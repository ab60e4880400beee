//! Cascade State: per-task attempt history and remaining escalation path

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::classify::FailureCategory;

/// Record of a single failed attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Task-local attempt number (1-indexed)
    pub attempt: u32,
    pub model: String,
    pub category: FailureCategory,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Record of an escalation event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub from_model: String,
    pub to_model: String,
    /// Category of the failure that triggered it
    pub trigger: FailureCategory,
    pub at_attempt: u32,
    pub timestamp: DateTime<Utc>,
}

/// Escalation state for one task's cascade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeState {
    pub task_id: String,
    /// Model the next attempt will use
    pub current_model: String,
    /// Model the cascade escalated away from to reach `current_model`
    pub escalated_from: Option<String>,
    /// Models not yet tried, in escalation order
    pub remaining_path: VecDeque<String>,
    /// Attempts across all models
    pub total_attempts: u32,
    /// Attempts on `current_model`
    pub attempts_on_model: u32,
    pub failures: Vec<FailureRecord>,
    pub escalations: Vec<EscalationRecord>,
    pub resolved: bool,
}

impl CascadeState {
    pub fn new(task_id: impl Into<String>, model: impl Into<String>, path: Vec<String>) -> Self {
        Self {
            task_id: task_id.into(),
            current_model: model.into(),
            escalated_from: None,
            remaining_path: path.into(),
            total_attempts: 0,
            attempts_on_model: 0,
            failures: Vec::new(),
            escalations: Vec::new(),
            resolved: false,
        }
    }

    pub fn next_model(&self) -> Option<&str> {
        self.remaining_path.front().map(String::as_str)
    }

    pub fn can_escalate(&self) -> bool {
        !self.remaining_path.is_empty()
    }

    pub fn record_success(&mut self) {
        self.total_attempts += 1;
        self.attempts_on_model += 1;
        self.resolved = true;
    }

    pub fn record_failure(&mut self, category: FailureCategory, message: impl Into<String>) {
        self.total_attempts += 1;
        self.attempts_on_model += 1;
        self.failures.push(FailureRecord {
            attempt: self.total_attempts,
            model: self.current_model.clone(),
            category,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// Move to `to`, dropping every path entry up to and including it
    pub fn escalate_to(&mut self, to: &str) {
        while let Some(next) = self.remaining_path.pop_front() {
            if next == to {
                break;
            }
        }
        let trigger = self
            .failures
            .last()
            .map(|f| f.category)
            .unwrap_or(FailureCategory::Unknown);
        self.escalations.push(EscalationRecord {
            from_model: self.current_model.clone(),
            to_model: to.to_string(),
            trigger,
            at_attempt: self.total_attempts,
            timestamp: Utc::now(),
        });
        self.escalated_from = Some(std::mem::replace(&mut self.current_model, to.to_string()));
        self.attempts_on_model = 0;
    }

    pub fn last_failure(&self) -> Option<&FailureRecord> {
        self.failures.last()
    }

    /// Get a summary for logging
    pub fn summary(&self) -> String {
        format!(
            "task={} model={} attempts={} escalations={} remaining={} resolved={}",
            self.task_id,
            self.current_model,
            self.total_attempts,
            self.escalations.len(),
            self.remaining_path.len(),
            self.resolved,
        )
    }
}
