//! History Store: per-signature, per-model outcome learning
//!
//! Thin project-scoped view over a [`ProjectStore`]. Aggregates below
//! [`MIN_SAMPLES`] observations are reported as insufficient data rather than
//! as rates.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::registry::{ModelRegistry, ModelTier};
use crate::router::TaskSignature;
use crate::state::{RoutingPattern, SharedStore, StoreResult};

/// Observations required before history may influence routing
pub const MIN_SAMPLES: u64 = 3;

/// Aggregate outcome statistics for one (signature, tier)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TierStats {
    InsufficientData {
        samples: u64,
    },
    Observed {
        samples: u64,
        successes: u64,
        failures: u64,
        success_rate: f64,
        fail_rate: f64,
    },
}

impl TierStats {
    fn from_counts(successes: u64, failures: u64) -> Self {
        let samples = successes + failures;
        if samples < MIN_SAMPLES {
            return Self::InsufficientData { samples };
        }
        Self::Observed {
            samples,
            successes,
            failures,
            success_rate: successes as f64 / samples as f64,
            fail_rate: failures as f64 / samples as f64,
        }
    }

    pub fn samples(&self) -> u64 {
        match self {
            Self::InsufficientData { samples } | Self::Observed { samples, .. } => *samples,
        }
    }

    pub fn is_sufficient(&self) -> bool {
        matches!(self, Self::Observed { .. })
    }

    pub fn success_rate(&self) -> Option<f64> {
        match self {
            Self::Observed { success_rate, .. } => Some(*success_rate),
            Self::InsufficientData { .. } => None,
        }
    }

    pub fn fail_rate(&self) -> Option<f64> {
        match self {
            Self::Observed { fail_rate, .. } => Some(*fail_rate),
            Self::InsufficientData { .. } => None,
        }
    }
}

/// Per-model entry of the routing report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub model: String,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub total_cost: f64,
}

/// Project-wide routing report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingStats {
    pub project: String,
    pub total_attempts: u64,
    pub total_cost: f64,
    /// Sorted by model id
    pub models: Vec<ModelStats>,
    pub tasks_attempted: u64,
    pub tasks_escalated: u64,
    /// Share of attempted tasks that needed at least one escalation
    pub escalation_rate: f64,
    pub signatures: u64,
    pub patterns: u64,
}

pub struct HistoryStore {
    store: SharedStore,
    project: String,
}

impl HistoryStore {
    pub fn new(store: SharedStore, project: impl Into<String>) -> Self {
        Self {
            store,
            project: project.into(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Fold one attempt outcome into the (signature, model) pattern
    pub fn record(
        &self,
        signature: &TaskSignature,
        model: &str,
        success: bool,
        cost: f64,
    ) -> StoreResult<RoutingPattern> {
        let pattern =
            self.store
                .upsert_pattern(&self.project, &signature.hash, model, success, cost)?;
        tracing::debug!(
            project = %self.project,
            signature = %signature.hash,
            model,
            success,
            samples = pattern.samples(),
            "recorded routing outcome"
        );
        Ok(pattern)
    }

    pub fn patterns_for(&self, signature: &TaskSignature) -> StoreResult<Vec<RoutingPattern>> {
        self.store.patterns_for(&self.project, &signature.hash)
    }

    /// Aggregate every pattern of `signature` whose model sits at `tier`
    pub fn stats_for(
        &self,
        signature: &TaskSignature,
        tier: ModelTier,
        registry: &ModelRegistry,
    ) -> StoreResult<TierStats> {
        let patterns = self.patterns_for(signature)?;
        Ok(Self::tier_stats(&patterns, tier, registry))
    }

    /// Same as [`stats_for`](Self::stats_for) over already loaded patterns
    pub fn tier_stats(
        patterns: &[RoutingPattern],
        tier: ModelTier,
        registry: &ModelRegistry,
    ) -> TierStats {
        let (successes, failures) = patterns
            .iter()
            .filter(|p| registry.tier_of(&p.model).ok() == Some(tier))
            .fold((0, 0), |(s, f), p| (s + p.success_count, f + p.fail_count));
        TierStats::from_counts(successes, failures)
    }

    /// Observation counts per tier for one signature; unknown models are ignored
    pub fn tier_observations(
        &self,
        signature: &TaskSignature,
        registry: &ModelRegistry,
    ) -> StoreResult<BTreeMap<ModelTier, u64>> {
        let mut counts = BTreeMap::new();
        for pattern in self.patterns_for(signature)? {
            if let Ok(tier) = registry.tier_of(&pattern.model) {
                *counts.entry(tier).or_insert(0) += pattern.samples();
            }
        }
        Ok(counts)
    }

    /// Per-model report and escalation rate from the attempt log
    pub fn routing_stats(&self) -> StoreResult<RoutingStats> {
        let attempts = self.store.attempts(&self.project, None)?;
        let patterns = self.store.all_patterns(&self.project)?;

        let mut by_model: HashMap<String, ModelStats> = HashMap::new();
        let mut tasks: HashSet<(String, String)> = HashSet::new();
        let mut escalated: HashSet<(String, String)> = HashSet::new();
        let mut total_cost = 0.0;

        for attempt in &attempts {
            let entry = by_model
                .entry(attempt.model.clone())
                .or_insert_with(|| ModelStats {
                    model: attempt.model.clone(),
                    attempts: 0,
                    successes: 0,
                    failures: 0,
                    success_rate: 0.0,
                    total_cost: 0.0,
                });
            entry.attempts += 1;
            if attempt.success {
                entry.successes += 1;
            } else {
                entry.failures += 1;
            }
            entry.total_cost += attempt.cost_usd;
            total_cost += attempt.cost_usd;

            let key = (attempt.session_id.clone(), attempt.task_id.clone());
            if attempt.escalated_from.is_some() {
                escalated.insert(key.clone());
            }
            tasks.insert(key);
        }

        let mut models: Vec<ModelStats> = by_model
            .into_values()
            .map(|mut m| {
                m.success_rate = m.successes as f64 / m.attempts as f64;
                m
            })
            .collect();
        models.sort_by(|a, b| a.model.cmp(&b.model));

        let signatures: HashSet<&str> = patterns.iter().map(|p| p.signature.as_str()).collect();
        let tasks_attempted = tasks.len() as u64;
        let tasks_escalated = escalated.len() as u64;

        Ok(RoutingStats {
            project: self.project.clone(),
            total_attempts: attempts.len() as u64,
            total_cost,
            models,
            tasks_attempted,
            tasks_escalated,
            escalation_rate: if tasks_attempted == 0 {
                0.0
            } else {
                tasks_escalated as f64 / tasks_attempted as f64
            },
            signatures: signatures.len() as u64,
            patterns: patterns.len() as u64,
        })
    }
}
