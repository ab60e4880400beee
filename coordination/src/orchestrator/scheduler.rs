//! Ready-task selection
//!
//! A task is dispatched only once every dependency has completed. A task
//! whose dependency failed or was skipped is skipped itself; since the walk
//! follows execution order, skips cascade within a single pass.

use std::collections::HashSet;

use crate::prd::{Prd, TaskId};
use crate::router::ExecutionPlan;
use crate::state::{SessionRecord, TaskState};

/// Result of one scheduling pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Tasks to start now, in execution order
    pub dispatch: Vec<TaskId>,
    /// Tasks that can never run, with the reason
    pub skip: Vec<(TaskId, String)>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.dispatch.is_empty() && self.skip.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    limit: usize,
}

impl Scheduler {
    /// One slot for single-agent plans, the suggested agent count otherwise
    pub fn for_plan(plan: &ExecutionPlan) -> Self {
        let limit = if plan.is_multi_agent() {
            plan.suggested_agents.max(1) as usize
        } else {
            1
        };
        Self { limit }
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn select(
        &self,
        prd: &Prd,
        record: &SessionRecord,
        in_flight: &HashSet<TaskId>,
    ) -> Selection {
        let mut selection = Selection::default();
        let mut newly_skipped: HashSet<&str> = HashSet::new();
        let mut free = self.limit.saturating_sub(in_flight.len());

        for id in &record.execution_order {
            if record.is_finished(id) || in_flight.contains(id) {
                continue;
            }
            let Some(task) = prd.task(id) else {
                continue;
            };

            let mut blocked = false;
            let mut skip_reason = None;
            for dep in &task.dependencies {
                if newly_skipped.contains(dep.as_str()) {
                    skip_reason = Some(format!("dependency '{}' skipped", dep));
                    break;
                }
                match record.outcomes.get(dep).map(|o| o.state) {
                    Some(TaskState::Completed) => {}
                    Some(TaskState::Failed) => {
                        skip_reason = Some(format!("dependency '{}' failed", dep));
                        break;
                    }
                    Some(TaskState::Skipped) => {
                        skip_reason = Some(format!("dependency '{}' skipped", dep));
                        break;
                    }
                    None => blocked = true,
                }
            }

            if let Some(reason) = skip_reason {
                newly_skipped.insert(id.as_str());
                selection.skip.push((id.clone(), reason));
            } else if !blocked && free > 0 {
                selection.dispatch.push(id.clone());
                free -= 1;
            }
        }
        selection
    }
}
