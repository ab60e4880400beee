//! History-adjusted routing
//!
//! Priority, first match wins:
//!
//! 1. Explicit model preference (task field or call option), used verbatim
//! 2. Rule score and tier, raised to the caller's minimum tier
//! 3. One-step tier adjustment from this signature's history
//! 4. Best-performing model with enough history at or above the tier,
//!    otherwise the run's default model when history changed nothing,
//!    otherwise the tier default

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::history::{HistoryStore, TierStats, MIN_SAMPLES};
use crate::prd::{DependencyResolver, Prd, RunConfig, Task, ValidationError};
use crate::registry::{ModelRegistry, ModelTier, RegistryError};
use crate::router::plan::{ExecutionPlan, RoutingPlan, TaskRoute};
use crate::router::scoring::{ScoreContribution, ScoringRules};
use crate::router::signature::TaskSignature;
use crate::state::{RoutingPattern, StoreError};

/// Where the selected model came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Rule,
    History,
    Preference,
    Escalation,
}

impl std::fmt::Display for RouteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rule => write!(f, "rule"),
            Self::History => write!(f, "history"),
            Self::Preference => write!(f, "preference"),
            Self::Escalation => write!(f, "escalation"),
        }
    }
}

/// Per-call routing options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteOptions {
    /// Model id that overrides every other rule
    pub preference: Option<String>,
    /// Model used instead of the tier default when history has no say
    pub fallback: Option<String>,
    /// Never route below this tier
    pub min_tier: Option<ModelTier>,
}

impl RouteOptions {
    /// Options for a task inside a PRD run: the task's own model as the
    /// preference, the run's default model as the fallback
    pub fn for_task(task: &Task, config: &RunConfig) -> Self {
        Self {
            preference: task.model.clone(),
            fallback: config.default_model.clone(),
            min_tier: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub model: String,
    pub tier: ModelTier,
    pub source: RouteSource,
    /// Rule score; 100 for explicit preferences
    pub score: u8,
    /// Tier the rules produced before any adjustment
    pub rule_tier: ModelTier,
    pub signature: TaskSignature,
    /// min(1, samples / confidence_samples) for the history consulted
    pub confidence: f64,
    pub escalation_path: Vec<String>,
    pub can_escalate: bool,
    pub execution_plan: ExecutionPlan,
    pub breakdown: Vec<ScoreContribution>,
    pub reasons: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("routing history unavailable: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Thresholds for history adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Fail rate above which the tier is raised
    pub escalate_fail_rate: f64,
    /// Success rate of the cheaper tier above which the tier is lowered
    pub de_escalate_success_rate: f64,
    /// Samples at which confidence reaches 1.0
    pub confidence_samples: u64,
    /// Confidence required before lowering a tier
    pub de_escalation_confidence: f64,
    /// Upper bound for the aggregate plan's agent count
    pub max_agents: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            escalate_fail_rate: 0.5,
            de_escalate_success_rate: 0.8,
            confidence_samples: 10,
            de_escalation_confidence: 0.5,
            max_agents: 4,
        }
    }
}

pub struct HistoryRouter {
    registry: Arc<ModelRegistry>,
    history: Arc<HistoryStore>,
    rules: ScoringRules,
    config: RouterConfig,
}

impl HistoryRouter {
    pub fn new(registry: Arc<ModelRegistry>, history: Arc<HistoryStore>) -> Self {
        Self {
            registry,
            history,
            rules: ScoringRules::default(),
            config: RouterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_rules(mut self, rules: ScoringRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn confidence(&self, samples: u64) -> f64 {
        let full = self.config.confidence_samples.max(1) as f64;
        (samples as f64 / full).min(1.0)
    }

    /// Choose a model for `task`
    pub fn route(&self, task: &Task, options: &RouteOptions) -> Result<RoutingDecision, RouterError> {
        let signature = TaskSignature::for_task(task);
        let rule = self.rules.score(task);
        let execution_plan = ExecutionPlan::for_task(task);
        let fallback = options
            .fallback
            .as_deref()
            .map(|id| self.registry.get(id))
            .transpose()?;

        if let Some(model) = options.preference.as_ref().or(task.model.as_ref()) {
            let spec = self.registry.get(model)?;
            let escalation_path = self.escalation_path(&spec.id)?;
            tracing::debug!(task = %task.id, model = %spec.id, "explicit model preference");
            return Ok(RoutingDecision {
                model: spec.id.clone(),
                tier: spec.tier,
                source: RouteSource::Preference,
                score: 100,
                rule_tier: rule.tier,
                signature,
                confidence: 1.0,
                can_escalate: !escalation_path.is_empty(),
                escalation_path,
                execution_plan,
                breakdown: rule.breakdown,
                reasons: vec![format!("explicit preference for '{}'", spec.id)],
            });
        }

        let mut reasons = vec![format!("rule score {} -> {}", rule.score, rule.tier)];
        let mut tier = rule.tier;
        if let Some(min) = options.min_tier {
            if tier < min {
                reasons.push(format!("raised to minimum tier {}", min));
                tier = min;
            }
        }

        let patterns = self.history.patterns_for(&signature)?;
        let mut source = RouteSource::Rule;

        let here = HistoryStore::tier_stats(&patterns, tier, &self.registry);
        let mut confidence = self.confidence(here.samples());

        // Escalation only needs MIN_SAMPLES at the tier; lowering a tier also
        // needs confidence above de_escalation_confidence at the cheaper one
        match (&here, tier.escalate()) {
            (TierStats::Observed { fail_rate, samples, .. }, Some(up))
                if *fail_rate > self.config.escalate_fail_rate =>
            {
                reasons.push(format!(
                    "{} fail rate {:.0}% over {} samples, escalating to {}",
                    tier,
                    fail_rate * 100.0,
                    samples,
                    up
                ));
                tier = up;
                source = RouteSource::History;
            }
            _ => {
                if let Some(down) = tier
                    .de_escalate()
                    .filter(|d| options.min_tier.map_or(true, |min| *d >= min))
                {
                    let below = HistoryStore::tier_stats(&patterns, down, &self.registry);
                    let below_confidence = self.confidence(below.samples());
                    if let TierStats::Observed { success_rate, samples, .. } = below {
                        if success_rate > self.config.de_escalate_success_rate
                            && below_confidence > self.config.de_escalation_confidence
                        {
                            reasons.push(format!(
                                "{} success rate {:.0}% over {} samples, de-escalating to {}",
                                down,
                                success_rate * 100.0,
                                samples,
                                down
                            ));
                            tier = down;
                            confidence = below_confidence;
                            source = RouteSource::History;
                        }
                    }
                }
            }
        }

        let (model, tier) = match self.best_from_history(&patterns, tier) {
            Some(pattern) => {
                let picked_tier = self.registry.tier_of(&pattern.model)?;
                reasons.push(format!(
                    "history favours '{}' ({:.0}% success over {} samples)",
                    pattern.model,
                    pattern.success_rate() * 100.0,
                    pattern.samples()
                ));
                source = RouteSource::History;
                (pattern.model.clone(), picked_tier)
            }
            None => match fallback {
                Some(spec)
                    if source == RouteSource::Rule
                        && options.min_tier.map_or(true, |min| spec.tier >= min) =>
                {
                    reasons.push(format!("run default model '{}'", spec.id));
                    (spec.id.clone(), spec.tier)
                }
                _ => (self.registry.tier_default(tier).id.clone(), tier),
            },
        };

        let escalation_path = self.escalation_path(&model)?;
        tracing::debug!(
            task = %task.id,
            model = %model,
            tier = %tier,
            source = %source,
            score = rule.score,
            "routed task"
        );

        Ok(RoutingDecision {
            model,
            tier,
            source,
            score: rule.score,
            rule_tier: rule.tier,
            signature,
            confidence,
            can_escalate: !escalation_path.is_empty(),
            escalation_path,
            execution_plan,
            breakdown: rule.breakdown,
            reasons,
        })
    }

    /// Highest success rate among known models at or above `tier` with
    /// enough samples; ties go to the lower average cost
    fn best_from_history<'a>(
        &self,
        patterns: &'a [RoutingPattern],
        tier: ModelTier,
    ) -> Option<&'a RoutingPattern> {
        patterns
            .iter()
            .filter(|p| p.samples() >= MIN_SAMPLES)
            .filter(|p| self.registry.tier_of(&p.model).is_ok_and(|t| t >= tier))
            .fold(None, |best: Option<&RoutingPattern>, p| match best {
                None => Some(p),
                Some(b) => {
                    let better = p.success_rate() > b.success_rate()
                        || (p.success_rate() == b.success_rate() && p.avg_cost < b.avg_cost);
                    Some(if better { p } else { b })
                }
            })
    }

    /// Models to try after `model`: the rest of its tier in registration
    /// order, then every model of each higher tier. Empty for the ceiling.
    pub fn escalation_path(&self, model: &str) -> Result<Vec<String>, RouterError> {
        let spec = self.registry.get(model)?;
        if self.registry.is_ceiling(model) {
            return Ok(Vec::new());
        }

        let mut path: Vec<String> = self
            .registry
            .models_in(spec.tier)
            .into_iter()
            .filter(|m| m.id != spec.id)
            .map(|m| m.id.clone())
            .collect();
        let mut next = spec.tier.escalate();
        while let Some(tier) = next {
            path.extend(self.registry.models_in(tier).into_iter().map(|m| m.id.clone()));
            next = tier.escalate();
        }
        Ok(path)
    }

    /// Route every task of a PRD in execution order
    pub fn plan(&self, prd: &Prd) -> Result<RoutingPlan, RouterError> {
        let order = DependencyResolver::resolve_prd(prd)?;
        let waves = DependencyResolver::waves(&prd.tasks, &order);

        let mut decisions = Vec::with_capacity(order.len());
        for id in &order {
            if let Some(task) = prd.task(id) {
                decisions.push(TaskRoute {
                    task_id: id.clone(),
                    decision: self.route(task, &RouteOptions::for_task(task, &prd.config))?,
                });
            }
        }
        Ok(RoutingPlan::new(decisions, waves, self.config.max_agents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prd::Complexity;
    use crate::state::MemoryStore;

    fn setup() -> (HistoryRouter, Arc<HistoryStore>) {
        let history = Arc::new(HistoryStore::new(MemoryStore::new().shared(), "proj"));
        let router = HistoryRouter::new(Arc::new(ModelRegistry::default()), history.clone());
        (router, history)
    }

    /// Simple task with one tag; rules put it on the cheap tier
    fn cheap_task() -> Task {
        Task::new("t1", "Add endpoint", Complexity::Simple).with_tags(["api"])
    }

    #[test]
    fn test_rule_route_uses_tier_default() {
        let (router, _) = setup();
        let d = router.route(&cheap_task(), &RouteOptions::default()).unwrap();
        assert_eq!(d.tier, ModelTier::Cheap);
        assert_eq!(d.model, "claude-haiku");
        assert_eq!(d.source, RouteSource::Rule);
        assert_eq!(d.score, 30);
        assert!(d.can_escalate);
    }

    #[test]
    fn test_preference_wins_and_unknown_is_error() {
        let (router, _) = setup();
        let task = cheap_task().with_model("gpt-4o");
        let d = router.route(&task, &RouteOptions::default()).unwrap();
        assert_eq!(d.model, "gpt-4o");
        assert_eq!(d.source, RouteSource::Preference);
        assert_eq!(d.score, 100);

        let opts = RouteOptions {
            preference: Some("nope".to_string()),
            ..RouteOptions::default()
        };
        let err = router.route(&cheap_task(), &opts).unwrap_err();
        assert!(matches!(
            err,
            RouterError::Registry(RegistryError::UnknownModel(ref id)) if id == "nope"
        ));
    }

    #[test]
    fn test_min_tier_raises() {
        let (router, _) = setup();
        let opts = RouteOptions {
            min_tier: Some(ModelTier::Mid),
            ..RouteOptions::default()
        };
        let d = router.route(&cheap_task(), &opts).unwrap();
        assert_eq!(d.tier, ModelTier::Mid);
        assert_eq!(d.rule_tier, ModelTier::Cheap);
    }

    #[test]
    fn test_two_of_three_success_does_not_escalate() {
        let (router, history) = setup();
        let sig = TaskSignature::for_task(&cheap_task());
        history.record(&sig, "claude-haiku", true, 0.01).unwrap();
        history.record(&sig, "claude-haiku", true, 0.01).unwrap();
        history.record(&sig, "claude-haiku", false, 0.01).unwrap();

        let d = router.route(&cheap_task(), &RouteOptions::default()).unwrap();
        assert_eq!(d.tier, ModelTier::Cheap);
        assert!((d.confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_one_of_three_success_escalates_cheap_to_mid() {
        let (router, history) = setup();
        let sig = TaskSignature::for_task(&cheap_task());
        history.record(&sig, "claude-haiku", true, 0.01).unwrap();
        history.record(&sig, "claude-haiku", false, 0.01).unwrap();
        history.record(&sig, "claude-haiku", false, 0.01).unwrap();

        let d = router.route(&cheap_task(), &RouteOptions::default()).unwrap();
        assert_eq!(d.tier, ModelTier::Mid);
        assert_eq!(d.model, "claude-sonnet");
        assert_eq!(d.source, RouteSource::History);
    }

    #[test]
    fn test_de_escalation_needs_confidence() {
        let (router, history) = setup();
        let task = Task::new("t2", "Wire module", Complexity::Moderate);
        let sig = TaskSignature::for_task(&task);

        for _ in 0..5 {
            history.record(&sig, "gpt-4o-mini", true, 0.001).unwrap();
        }
        let d = router.route(&task, &RouteOptions::default()).unwrap();
        assert_eq!(d.tier, ModelTier::Mid, "5 samples is below the confidence gate");

        history.record(&sig, "gpt-4o-mini", true, 0.001).unwrap();
        let d = router.route(&task, &RouteOptions::default()).unwrap();
        assert_eq!(d.tier, ModelTier::Cheap);
        assert_eq!(d.model, "gpt-4o-mini");
        assert_eq!(d.source, RouteSource::History);
    }

    #[test]
    fn test_premium_de_escalates_to_mid() {
        let (router, history) = setup();
        let task = Task::new("t4", "Rewrite scheduler", Complexity::Epic);
        let sig = TaskSignature::for_task(&task);
        assert_eq!(
            router.route(&task, &RouteOptions::default()).unwrap().tier,
            ModelTier::Premium
        );

        for _ in 0..6 {
            history.record(&sig, "claude-sonnet", true, 0.05).unwrap();
        }
        let d = router.route(&task, &RouteOptions::default()).unwrap();
        assert_eq!(d.rule_tier, ModelTier::Premium);
        assert_eq!(d.tier, ModelTier::Mid);
        assert_eq!(d.model, "claude-sonnet");
        assert_eq!(d.source, RouteSource::History);
        assert!((d.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_replaces_tier_default_only() {
        let (router, history) = setup();
        let opts = RouteOptions {
            fallback: Some("gpt-4o-mini".to_string()),
            ..RouteOptions::default()
        };
        let d = router.route(&cheap_task(), &opts).unwrap();
        assert_eq!(d.model, "gpt-4o-mini");
        assert_eq!(d.source, RouteSource::Rule);

        // History still escalates a failing signature past the fallback
        let sig = TaskSignature::for_task(&cheap_task());
        for _ in 0..3 {
            history.record(&sig, "gpt-4o-mini", false, 0.001).unwrap();
        }
        let d = router.route(&cheap_task(), &opts).unwrap();
        assert_eq!(d.tier, ModelTier::Mid);
        assert_eq!(d.model, "claude-sonnet");
        assert_eq!(d.source, RouteSource::History);

        let bad = RouteOptions {
            fallback: Some("nope".to_string()),
            ..RouteOptions::default()
        };
        assert!(router.route(&cheap_task(), &bad).is_err());
    }

    #[test]
    fn test_history_pick_prefers_rate_then_cost() {
        let (router, history) = setup();
        let task = Task::new("t3", "Tune query", Complexity::Moderate);
        let sig = TaskSignature::for_task(&task);
        for _ in 0..3 {
            history.record(&sig, "claude-sonnet", true, 0.05).unwrap();
            history.record(&sig, "gpt-4o", true, 0.03).unwrap();
        }
        let d = router.route(&task, &RouteOptions::default()).unwrap();
        assert_eq!(d.model, "gpt-4o");
    }

    #[test]
    fn test_escalation_paths() {
        let (router, _) = setup();
        assert_eq!(
            router.escalation_path("claude-haiku").unwrap(),
            vec!["gpt-4o-mini", "claude-sonnet", "gpt-4o", "claude-opus", "o1"]
        );
        assert_eq!(router.escalation_path("o1").unwrap(), vec!["claude-opus"]);
        assert!(router.escalation_path("claude-opus").unwrap().is_empty());

        let task = cheap_task().with_model("claude-opus");
        let d = router.route(&task, &RouteOptions::default()).unwrap();
        assert!(!d.can_escalate);
    }

    #[test]
    fn test_plan_covers_order() {
        let (router, _) = setup();
        let prd = Prd::new(
            "demo",
            vec![
                Task::new("a", "A", Complexity::Trivial),
                Task::new("b", "B", Complexity::Complex).with_dependencies(["a"]),
                Task::new("c", "C", Complexity::Simple).with_dependencies(["a"]),
            ],
        );
        let plan = router.plan(&prd).unwrap();
        let ids: Vec<&str> = plan.decisions.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(plan.execution_plan.is_multi_agent());
        assert_eq!(plan.execution_plan.suggested_agents, 2);
        assert_eq!(plan.tier_distribution.values().sum::<usize>(), 3);
    }
}
