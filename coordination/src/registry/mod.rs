//! Model Registry: tier, provider and pricing metadata
//!
//! The registry is the single source of truth for which model ids exist.
//! It is validated on construction: every tier has at least one model and a
//! designated default, and the ceiling model is priced at or above every
//! other model. Lookups of an unregistered id return
//! [`RegistryError::UnknownModel`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Capability tiers, cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Free,
    Cheap,
    Mid,
    Premium,
}

impl ModelTier {
    /// All tiers in ascending order
    pub fn all() -> &'static [ModelTier] {
        &[
            ModelTier::Free,
            ModelTier::Cheap,
            ModelTier::Mid,
            ModelTier::Premium,
        ]
    }

    /// Map a rule score (0-100) to its tier
    pub fn for_score(score: u8) -> Self {
        match score {
            0..=20 => Self::Free,
            21..=40 => Self::Cheap,
            41..=65 => Self::Mid,
            _ => Self::Premium,
        }
    }

    /// The next tier up, if any
    pub fn escalate(&self) -> Option<Self> {
        match self {
            Self::Free => Some(Self::Cheap),
            Self::Cheap => Some(Self::Mid),
            Self::Mid => Some(Self::Premium),
            Self::Premium => None,
        }
    }

    /// The next tier down, if any
    pub fn de_escalate(&self) -> Option<Self> {
        match self {
            Self::Free => None,
            Self::Cheap => Some(Self::Free),
            Self::Mid => Some(Self::Cheap),
            Self::Premium => Some(Self::Mid),
        }
    }

    /// Prior probability that a task routed here ends up on another tier
    pub fn default_escalation_probability(&self) -> f64 {
        match self {
            Self::Free => 0.3,
            Self::Cheap => 0.2,
            Self::Mid => 0.1,
            Self::Premium => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Cheap => "cheap",
            Self::Mid => "mid",
            Self::Premium => "premium",
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl ModelPricing {
    pub const FREE: ModelPricing = ModelPricing {
        input_per_mtok: 0.0,
        output_per_mtok: 0.0,
    };

    pub fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }

    /// Cost in USD for a concrete token split
    pub fn cost(&self, tokens_in: u64, tokens_out: u64) -> f64 {
        (tokens_in as f64 * self.input_per_mtok + tokens_out as f64 * self.output_per_mtok)
            / 1_000_000.0
    }

    /// Per-token price when `output_ratio` of all tokens are output tokens
    pub fn blended_per_token(&self, output_ratio: f64) -> f64 {
        let ratio = output_ratio.clamp(0.0, 1.0);
        ((1.0 - ratio) * self.input_per_mtok + ratio * self.output_per_mtok) / 1_000_000.0
    }

    /// True when neither price is lower than `other`'s
    pub fn dominates(&self, other: &ModelPricing) -> bool {
        self.input_per_mtok >= other.input_per_mtok && self.output_per_mtok >= other.output_per_mtok
    }
}

/// A registered model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub tier: ModelTier,
    pub provider: String,
    pub pricing: ModelPricing,
}

impl ModelSpec {
    pub fn new(
        id: impl Into<String>,
        tier: ModelTier,
        provider: impl Into<String>,
        pricing: ModelPricing,
    ) -> Self {
        Self {
            id: id.into(),
            tier,
            provider: provider.into(),
            pricing,
        }
    }
}

/// Registry construction and lookup errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("model '{0}' registered twice")]
    DuplicateModel(String),

    #[error("tier '{0}' has no registered models")]
    EmptyTier(ModelTier),

    #[error("default for tier '{tier}' is '{model}', which is not a {tier} model")]
    DefaultTierMismatch { tier: ModelTier, model: String },

    #[error("ceiling model '{ceiling}' is priced below '{model}'")]
    CeilingNotDominant { ceiling: String, model: String },

    #[error("no ceiling model designated")]
    MissingCeiling,
}

/// Serializable registry description, as found in configuration files
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub models: Vec<ModelSpec>,
    /// Per-tier default model; the first model of a tier when absent
    #[serde(default)]
    pub defaults: BTreeMap<ModelTier, String>,
    /// Strongest model; the most expensive premium model when absent
    #[serde(default)]
    pub ceiling: Option<String>,
}

impl RegistryConfig {
    pub fn build(self) -> Result<ModelRegistry, RegistryError> {
        let mut builder = ModelRegistry::builder();
        for model in self.models {
            builder = builder.model(model);
        }
        for (tier, id) in self.defaults {
            builder = builder.tier_default(tier, id);
        }
        if let Some(ceiling) = self.ceiling {
            builder = builder.ceiling(ceiling);
        }
        builder.build()
    }
}

/// Incremental registry construction; validated by [`RegistryBuilder::build`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: Vec<ModelSpec>,
    defaults: HashMap<ModelTier, String>,
    ceiling: Option<String>,
}

impl RegistryBuilder {
    pub fn model(mut self, spec: ModelSpec) -> Self {
        self.models.push(spec);
        self
    }

    pub fn tier_default(mut self, tier: ModelTier, id: impl Into<String>) -> Self {
        self.defaults.insert(tier, id.into());
        self
    }

    pub fn ceiling(mut self, id: impl Into<String>) -> Self {
        self.ceiling = Some(id.into());
        self
    }

    pub fn build(self) -> Result<ModelRegistry, RegistryError> {
        let mut index = HashMap::new();
        for (pos, spec) in self.models.iter().enumerate() {
            if index.insert(spec.id.clone(), pos).is_some() {
                return Err(RegistryError::DuplicateModel(spec.id.clone()));
            }
        }

        let mut defaults = HashMap::new();
        for &tier in ModelTier::all() {
            let default = match self.defaults.get(&tier) {
                Some(id) => {
                    let pos = *index
                        .get(id)
                        .ok_or_else(|| RegistryError::UnknownModel(id.clone()))?;
                    if self.models[pos].tier != tier {
                        return Err(RegistryError::DefaultTierMismatch {
                            tier,
                            model: id.clone(),
                        });
                    }
                    id.clone()
                }
                None => self
                    .models
                    .iter()
                    .find(|m| m.tier == tier)
                    .map(|m| m.id.clone())
                    .ok_or(RegistryError::EmptyTier(tier))?,
            };
            defaults.insert(tier, default);
        }

        let ceiling = match self.ceiling {
            Some(id) => {
                if !index.contains_key(&id) {
                    return Err(RegistryError::UnknownModel(id));
                }
                id
            }
            None => self
                .models
                .iter()
                .filter(|m| m.tier == ModelTier::Premium)
                .max_by(|a, b| {
                    a.pricing
                        .output_per_mtok
                        .total_cmp(&b.pricing.output_per_mtok)
                        .then(a.pricing.input_per_mtok.total_cmp(&b.pricing.input_per_mtok))
                })
                .map(|m| m.id.clone())
                .ok_or(RegistryError::MissingCeiling)?,
        };

        let ceiling_pricing = self.models[index[&ceiling]].pricing;
        if let Some(cheaper) = self
            .models
            .iter()
            .find(|m| !ceiling_pricing.dominates(&m.pricing))
        {
            return Err(RegistryError::CeilingNotDominant {
                ceiling,
                model: cheaper.id.clone(),
            });
        }

        Ok(ModelRegistry {
            models: self.models,
            index,
            defaults,
            ceiling,
        })
    }
}

/// Validated registry of every model the engine may dispatch to
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    /// Registration order is the stable order used for escalation paths
    models: Vec<ModelSpec>,
    index: HashMap<String, usize>,
    defaults: HashMap<ModelTier, String>,
    ceiling: String,
}

impl ModelRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up a model by id
    pub fn get(&self, id: &str) -> Result<&ModelSpec, RegistryError> {
        self.index
            .get(id)
            .map(|&pos| &self.models[pos])
            .ok_or_else(|| RegistryError::UnknownModel(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn tier_of(&self, id: &str) -> Result<ModelTier, RegistryError> {
        self.get(id).map(|m| m.tier)
    }

    /// Every model, in registration order
    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    /// Models of one tier, in registration order
    pub fn models_in(&self, tier: ModelTier) -> Vec<&ModelSpec> {
        self.models.iter().filter(|m| m.tier == tier).collect()
    }

    /// The designated default for a tier
    pub fn tier_default(&self, tier: ModelTier) -> &ModelSpec {
        // Every tier has a validated default
        let id = &self.defaults[&tier];
        &self.models[self.index[id]]
    }

    /// The strongest (and most expensive) model
    pub fn ceiling(&self) -> &ModelSpec {
        &self.models[self.index[&self.ceiling]]
    }

    pub fn is_ceiling(&self, id: &str) -> bool {
        self.ceiling == id
    }

    /// Lowest blended price at the given output ratio; ties keep registration order
    pub fn cheapest(&self, output_ratio: f64) -> &ModelSpec {
        let mut best = self.ceiling();
        for model in &self.models {
            if model.pricing.blended_per_token(output_ratio)
                < best.pricing.blended_per_token(output_ratio)
            {
                best = model;
            }
        }
        best
    }
}

impl Default for ModelRegistry {
    /// Built-in catalogue used when configuration supplies none
    fn default() -> Self {
        ModelRegistry {
            models: default_models(),
            index: HashMap::new(),
            defaults: HashMap::new(),
            ceiling: String::new(),
        }
        .reindexed()
    }
}

impl ModelRegistry {
    fn reindexed(mut self) -> Self {
        self.index = self
            .models
            .iter()
            .enumerate()
            .map(|(pos, m)| (m.id.clone(), pos))
            .collect();
        self.defaults = [
            (ModelTier::Free, "qwen2.5-coder-7b"),
            (ModelTier::Cheap, "claude-haiku"),
            (ModelTier::Mid, "claude-sonnet"),
            (ModelTier::Premium, "claude-opus"),
        ]
        .into_iter()
        .map(|(tier, id)| (tier, id.to_string()))
        .collect();
        self.ceiling = "claude-opus".to_string();
        self
    }
}

fn default_models() -> Vec<ModelSpec> {
    use ModelTier::*;
    vec![
        ModelSpec::new("qwen2.5-coder-7b", Free, "local", ModelPricing::FREE),
        ModelSpec::new("llama-3.1-8b", Free, "local", ModelPricing::FREE),
        ModelSpec::new("claude-haiku", Cheap, "anthropic", ModelPricing::new(0.8, 4.0)),
        ModelSpec::new("gpt-4o-mini", Cheap, "openai", ModelPricing::new(0.15, 0.6)),
        ModelSpec::new("claude-sonnet", Mid, "anthropic", ModelPricing::new(3.0, 15.0)),
        ModelSpec::new("gpt-4o", Mid, "openai", ModelPricing::new(2.5, 10.0)),
        ModelSpec::new("claude-opus", Premium, "anthropic", ModelPricing::new(15.0, 75.0)),
        ModelSpec::new("o1", Premium, "openai", ModelPricing::new(15.0, 60.0)),
    ]
}
