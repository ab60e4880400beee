//! Execution plans and the PRD routing plan

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::prd::{Complexity, Task, TaskId};
use crate::registry::ModelTier;
use crate::router::history_router::RoutingDecision;
use crate::router::signature::FilesBucket;

/// How work should be dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    SingleAgent,
    MultiAgent,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingleAgent => write!(f, "single_agent"),
            Self::MultiAgent => write!(f, "multi_agent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub mode: ExecutionMode,
    pub parallelizable: bool,
    /// Upper bound on concurrent agents; dependency order still applies
    pub suggested_agents: u32,
    pub reason: String,
}

impl ExecutionPlan {
    pub fn single(reason: impl Into<String>) -> Self {
        Self {
            mode: ExecutionMode::SingleAgent,
            parallelizable: false,
            suggested_agents: 1,
            reason: reason.into(),
        }
    }

    pub fn is_multi_agent(&self) -> bool {
        self.mode == ExecutionMode::MultiAgent
    }

    /// Plan for a single task
    pub fn for_task(task: &Task) -> Self {
        let files = task.file_count();
        let bucket = FilesBucket::from_count(files);
        let parallelizable = files >= 3;

        if task.complexity == Complexity::Epic {
            Self {
                mode: ExecutionMode::MultiAgent,
                parallelizable,
                suggested_agents: 3,
                reason: format!("epic task touching {} file(s)", files),
            }
        } else if bucket == FilesBucket::Many {
            Self {
                mode: ExecutionMode::MultiAgent,
                parallelizable,
                suggested_agents: 2,
                reason: format!("{} files can be split across agents", files),
            }
        } else {
            Self {
                parallelizable,
                ..Self::single(format!("{} task touching {} file(s)", task.complexity, files))
            }
        }
    }

    /// Plan for a whole PRD from its dependency waves
    pub fn aggregate(waves: &[Vec<TaskId>], max_agents: u32) -> Self {
        let widest = waves.iter().map(Vec::len).max().unwrap_or(0);
        let max_agents = max_agents.max(1);

        if widest >= 2 && max_agents >= 2 {
            let agents = (widest as u32).min(max_agents);
            Self {
                mode: ExecutionMode::MultiAgent,
                parallelizable: true,
                suggested_agents: agents,
                reason: format!(
                    "{} dependency wave(s), widest has {} independent task(s)",
                    waves.len(),
                    widest
                ),
            }
        } else {
            Self {
                mode: ExecutionMode::SingleAgent,
                parallelizable: widest >= 2,
                suggested_agents: 1,
                reason: if widest >= 2 {
                    "concurrency limited to one agent".to_string()
                } else {
                    "every task depends on the previous one".to_string()
                },
            }
        }
    }
}

/// Routing decisions for a whole PRD, in execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub decisions: Vec<TaskRoute>,
    pub tier_distribution: BTreeMap<ModelTier, usize>,
    pub waves: Vec<Vec<TaskId>>,
    pub execution_plan: ExecutionPlan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRoute {
    pub task_id: TaskId,
    pub decision: RoutingDecision,
}

impl RoutingPlan {
    pub fn new(decisions: Vec<TaskRoute>, waves: Vec<Vec<TaskId>>, max_agents: u32) -> Self {
        let mut tier_distribution = BTreeMap::new();
        for route in &decisions {
            *tier_distribution.entry(route.decision.tier).or_insert(0) += 1;
        }
        let execution_plan = ExecutionPlan::aggregate(&waves, max_agents);
        Self {
            decisions,
            tier_distribution,
            waves,
            execution_plan,
        }
    }

    pub fn decision(&self, task_id: &str) -> Option<&RoutingDecision> {
        self.decisions
            .iter()
            .find(|r| r.task_id == task_id)
            .map(|r| &r.decision)
    }
}
