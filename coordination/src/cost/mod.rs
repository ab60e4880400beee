//! Cost estimation for tasks and whole PRDs
//!
//! Every task gets three scenarios: optimistic (cheapest registered model),
//! pessimistic (ceiling model) and expected, which blends the routed model
//! with the ceiling by the probability of escalating.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::history::HistoryStore;
use crate::prd::{Complexity, Task, TaskId};
use crate::registry::{ModelRegistry, ModelTier};
use crate::router::{RoutingDecision, RoutingPlan};
use crate::state::StoreResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Tokens for a simple task touching no files
    pub base_tokens: u64,
    /// Share of tokens that are output tokens
    pub output_ratio: f64,
    /// Extra token share per affected file
    pub per_file_factor: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            base_tokens: 4_000,
            output_ratio: 0.3,
            per_file_factor: 0.1,
        }
    }
}

/// Cost of running the task on one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProjection {
    pub model: String,
    pub tier: ModelTier,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbabilitySource {
    History,
    TierDefault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCostEstimate {
    pub task_id: TaskId,
    pub tokens: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub routed_model: String,
    pub routed_tier: ModelTier,
    pub escalation_probability: f64,
    pub probability_source: ProbabilitySource,
    pub optimistic: f64,
    pub expected: f64,
    pub pessimistic: f64,
    pub per_model: Vec<ModelProjection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateCostEstimate {
    pub tasks: Vec<TaskCostEstimate>,
    pub total_tokens: u64,
    pub optimistic: f64,
    pub expected: f64,
    pub pessimistic: f64,
}

pub fn complexity_multiplier(complexity: Complexity) -> f64 {
    match complexity {
        Complexity::Trivial => 0.5,
        Complexity::Simple => 1.0,
        Complexity::Moderate => 1.5,
        Complexity::Complex => 2.0,
        Complexity::Epic => 2.5,
    }
}

pub struct CostEstimator {
    registry: Arc<ModelRegistry>,
    history: Arc<HistoryStore>,
    config: CostConfig,
}

impl CostEstimator {
    pub fn new(registry: Arc<ModelRegistry>, history: Arc<HistoryStore>) -> Self {
        Self {
            registry,
            history,
            config: CostConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CostConfig) -> Self {
        self.config = config;
        self
    }

    /// Projected tokens: base x complexity multiplier x (1 + factor x files)
    pub fn tokens_for(&self, task: &Task) -> u64 {
        let files = task.file_count() as f64;
        let tokens = self.config.base_tokens as f64
            * complexity_multiplier(task.complexity)
            * (1.0 + self.config.per_file_factor * files);
        tokens.round() as u64
    }

    /// Split a token total into (input, output)
    pub fn split(&self, tokens: u64) -> (u64, u64) {
        let out = (tokens as f64 * self.config.output_ratio.clamp(0.0, 1.0)).round() as u64;
        (tokens - out.min(tokens), out.min(tokens))
    }

    /// Probability of leaving the routed tier, and where the number came from.
    ///
    /// Any observation of the signature on a registered model is enough to
    /// use history; unlike routing there is no sample minimum.
    pub fn escalation_probability(
        &self,
        decision: &RoutingDecision,
    ) -> StoreResult<(f64, ProbabilitySource)> {
        let observations = self
            .history
            .tier_observations(&decision.signature, &self.registry)?;
        let total: u64 = observations.values().sum();
        if total > 0 {
            let here = observations.get(&decision.tier).copied().unwrap_or(0);
            Ok((
                (total - here) as f64 / total as f64,
                ProbabilitySource::History,
            ))
        } else {
            Ok((
                decision.tier.default_escalation_probability(),
                ProbabilitySource::TierDefault,
            ))
        }
    }

    pub fn estimate_task(
        &self,
        task: &Task,
        decision: &RoutingDecision,
    ) -> StoreResult<TaskCostEstimate> {
        let tokens = self.tokens_for(task);
        let (tokens_in, tokens_out) = self.split(tokens);

        let per_model: Vec<ModelProjection> = self
            .registry
            .models()
            .iter()
            .map(|m| ModelProjection {
                model: m.id.clone(),
                tier: m.tier,
                cost_usd: m.pricing.cost(tokens_in, tokens_out),
            })
            .collect();

        let optimistic = per_model
            .iter()
            .map(|p| p.cost_usd)
            .fold(f64::INFINITY, f64::min);
        let pessimistic = self.registry.ceiling().pricing.cost(tokens_in, tokens_out);
        let base = per_model
            .iter()
            .find(|p| p.model == decision.model)
            .map(|p| p.cost_usd)
            .unwrap_or(pessimistic);

        let (p, probability_source) = self.escalation_probability(decision)?;
        let p = if self.registry.is_ceiling(&decision.model) { 0.0 } else { p };
        let expected = (base * (1.0 - p) + pessimistic * p)
            .max(optimistic)
            .min(pessimistic);

        Ok(TaskCostEstimate {
            task_id: task.id.clone(),
            tokens,
            tokens_in,
            tokens_out,
            routed_model: decision.model.clone(),
            routed_tier: decision.tier,
            escalation_probability: p,
            probability_source,
            optimistic: if optimistic.is_finite() { optimistic } else { 0.0 },
            expected,
            pessimistic,
            per_model,
        })
    }

    /// Estimate every task of a routing plan and sum the scenarios
    pub fn estimate_plan(
        &self,
        tasks: &[Task],
        plan: &RoutingPlan,
    ) -> StoreResult<AggregateCostEstimate> {
        let mut estimates = Vec::with_capacity(plan.decisions.len());
        for route in &plan.decisions {
            if let Some(task) = tasks.iter().find(|t| t.id == route.task_id) {
                estimates.push(self.estimate_task(task, &route.decision)?);
            }
        }

        Ok(AggregateCostEstimate {
            total_tokens: estimates.iter().map(|e| e.tokens).sum(),
            optimistic: estimates.iter().map(|e| e.optimistic).sum(),
            expected: estimates.iter().map(|e| e.expected).sum(),
            pessimistic: estimates.iter().map(|e| e.pessimistic).sum(),
            tasks: estimates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prd::Prd;
    use crate::router::{HistoryRouter, RouteOptions, TaskSignature};
    use crate::state::MemoryStore;

    fn setup() -> (CostEstimator, HistoryRouter, Arc<HistoryStore>) {
        let registry = Arc::new(ModelRegistry::default());
        let history = Arc::new(HistoryStore::new(MemoryStore::new().shared(), "proj"));
        (
            CostEstimator::new(registry.clone(), history.clone()),
            HistoryRouter::new(registry, history.clone()),
            history,
        )
    }

    #[test]
    fn test_token_formula() {
        let (est, _, _) = setup();
        let task = Task::new("t", "T", Complexity::Complex).with_files(["a", "b"]);
        // 4000 * 2.0 * 1.2
        assert_eq!(est.tokens_for(&task), 9_600);
        assert_eq!(est.split(9_600), (6_720, 2_880));
    }

    #[test]
    fn test_scenarios_ordered_with_default_probability() {
        let (est, router, _) = setup();
        let task = Task::new("t", "T", Complexity::Simple);
        let decision = router.route(&task, &RouteOptions::default()).unwrap();
        let e = est.estimate_task(&task, &decision).unwrap();

        assert_eq!(e.probability_source, ProbabilitySource::TierDefault);
        assert!((e.escalation_probability - 0.2).abs() < 1e-9);
        assert!(e.optimistic <= e.expected && e.expected <= e.pessimistic);
        assert_eq!(e.optimistic, 0.0);
        assert_eq!(e.per_model.len(), 8);
    }

    #[test]
    fn test_history_probability() {
        let (est, router, history) = setup();
        let task = Task::new("t", "T", Complexity::Simple);
        let sig = TaskSignature::for_task(&task);
        history.record(&sig, "claude-haiku", false, 0.0).unwrap();
        history.record(&sig, "claude-sonnet", true, 0.0).unwrap();
        history.record(&sig, "claude-haiku", true, 0.0).unwrap();
        history.record(&sig, "claude-opus", true, 0.0).unwrap();

        let decision = router.route(&task, &RouteOptions::default()).unwrap();
        assert_eq!(decision.tier, ModelTier::Cheap);
        let (p, source) = est.escalation_probability(&decision).unwrap();
        assert_eq!(source, ProbabilitySource::History);
        assert!((p - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_single_observation_is_enough_for_history() {
        let (est, router, history) = setup();
        let task = Task::new("t", "T", Complexity::Simple);
        history
            .record(&TaskSignature::for_task(&task), "claude-sonnet", true, 0.0)
            .unwrap();

        let decision = router.route(&task, &RouteOptions::default()).unwrap();
        assert_eq!(decision.tier, ModelTier::Cheap);
        let e = est.estimate_task(&task, &decision).unwrap();
        assert_eq!(e.probability_source, ProbabilitySource::History);
        assert!((e.escalation_probability - 1.0).abs() < 1e-9);
        assert!((e.expected - e.pessimistic).abs() < 1e-12);
    }

    #[test]
    fn test_unregistered_models_fall_back_to_tier_default() {
        let (est, router, history) = setup();
        let task = Task::new("t", "T", Complexity::Simple);
        history
            .record(&TaskSignature::for_task(&task), "retired-model", false, 0.0)
            .unwrap();

        let decision = router.route(&task, &RouteOptions::default()).unwrap();
        let (p, source) = est.escalation_probability(&decision).unwrap();
        assert_eq!(source, ProbabilitySource::TierDefault);
        assert!((p - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_ceiling_route_has_no_spread() {
        let (est, router, _) = setup();
        let task = Task::new("t", "T", Complexity::Epic).with_model("claude-opus");
        let decision = router.route(&task, &RouteOptions::default()).unwrap();
        let e = est.estimate_task(&task, &decision).unwrap();
        assert_eq!(e.expected, e.pessimistic);
    }

    #[test]
    fn test_aggregate_bounds_over_many_plans() {
        let (est, router, _) = setup();
        let mut seed: u64 = 42;
        for round in 0..50 {
            let tasks: Vec<Task> = (0..6)
                .map(|i| {
                    seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    let complexity = Complexity::all()[((seed >> 33) % 5) as usize];
                    let files: Vec<String> =
                        (0..((seed >> 40) % 8)).map(|f| format!("f{}", f)).collect();
                    Task::new(format!("r{}t{}", round, i), "T", complexity).with_files(files)
                })
                .collect();
            let prd = Prd::new("p", tasks);
            let plan = router.plan(&prd).unwrap();
            let agg = est.estimate_plan(&prd.tasks, &plan).unwrap();

            assert_eq!(agg.tasks.len(), 6);
            assert!(agg.optimistic <= agg.expected + 1e-12);
            assert!(agg.expected <= agg.pessimistic + 1e-12);
            for t in &agg.tasks {
                assert!(t.optimistic <= t.expected && t.expected <= t.pessimistic);
            }
        }
    }
}
