//! Cascade policy: what to do after a failed attempt
//!
//! ```text
//! category     | same model                    | then
//! -------------|-------------------------------|------------------------
//! syntax       | retry up to max_retries times | escalate, else give up
//! validation   | retry up to max_retries times | escalate, else give up
//! capability   | -                             | escalate, else give up
//! timeout      | -                             | escalate, else retry up
//!              |                               | to max_retries, give up
//! unknown      | up to max_retries attempts    | escalate, else give up
//! ```
//!
//! The per-task attempt cap applies before any of the above.

use serde::{Deserialize, Serialize};

use super::classify::FailureCategory;
use super::state::CascadeState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadePolicy {
    /// Same-model retries for syntax/validation, and same-model attempts for unknown
    pub max_retries: u32,
}

impl Default for CascadePolicy {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CascadeAction {
    RetrySame,
    Escalate { to: String },
    GiveUp,
}

/// Decision produced by the policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeDecision {
    pub action: CascadeAction,
    pub reason: String,
}

impl CascadeDecision {
    fn retry(reason: String) -> Self {
        Self {
            action: CascadeAction::RetrySame,
            reason,
        }
    }

    fn escalate(to: &str, reason: String) -> Self {
        Self {
            action: CascadeAction::Escalate { to: to.to_string() },
            reason,
        }
    }

    fn give_up(reason: String) -> Self {
        Self {
            action: CascadeAction::GiveUp,
            reason,
        }
    }
}

impl CascadePolicy {
    /// Decide the next step after a failure of `category`.
    ///
    /// Pure: reads the state, never mutates it.
    pub fn decide(
        &self,
        state: &CascadeState,
        category: FailureCategory,
        max_attempts: u32,
    ) -> CascadeDecision {
        if state.total_attempts >= max_attempts {
            return CascadeDecision::give_up(format!(
                "attempt cap of {} reached",
                max_attempts
            ));
        }

        let on_model = state.attempts_on_model;
        let retries = on_model.saturating_sub(1);
        let next = state.next_model();

        match category {
            FailureCategory::Syntax | FailureCategory::Validation => {
                if retries < self.max_retries {
                    CascadeDecision::retry(format!(
                        "{} failure, retry {}/{} on {}",
                        category,
                        retries + 1,
                        self.max_retries,
                        state.current_model
                    ))
                } else {
                    self.escalate_or_give_up(state, next, category)
                }
            }
            FailureCategory::Capability => self.escalate_or_give_up(state, next, category),
            FailureCategory::Timeout => match next {
                Some(to) => CascadeDecision::escalate(
                    to,
                    format!("timeout on {}, escalating to {}", state.current_model, to),
                ),
                None if retries < self.max_retries => CascadeDecision::retry(format!(
                    "timeout with no escalation left, retry {}/{}",
                    retries + 1,
                    self.max_retries
                )),
                None => CascadeDecision::give_up(format!(
                    "timeout on {} after {} retries, no escalation left",
                    state.current_model, retries
                )),
            },
            FailureCategory::Unknown => {
                if on_model < self.max_retries {
                    CascadeDecision::retry(format!(
                        "unknown failure, attempt {}/{} on {}",
                        on_model + 1,
                        self.max_retries,
                        state.current_model
                    ))
                } else {
                    self.escalate_or_give_up(state, next, category)
                }
            }
        }
    }

    fn escalate_or_give_up(
        &self,
        state: &CascadeState,
        next: Option<&str>,
        category: FailureCategory,
    ) -> CascadeDecision {
        match next {
            Some(to) => CascadeDecision::escalate(
                to,
                format!(
                    "{} failure on {}, escalating to {}",
                    category, state.current_model, to
                ),
            ),
            None => CascadeDecision::give_up(format!(
                "{} failure on {}, escalation path exhausted",
                category, state.current_model
            )),
        }
    }
}
