//! Coordination configuration
//!
//! Loaded from TOML; every field has a default. `CASCADE_*` environment
//! variables override individual values after the file is read.
//!
//! ```toml
//! [router]
//! escalate_fail_rate = 0.5
//!
//! [cascade]
//! max_retries = 2
//!
//! [scheduler]
//! max_agents = 4
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cost::CostConfig;
use crate::escalation::CascadePolicy;
use crate::registry::{ModelRegistry, RegistryConfig, RegistryError};
use crate::router::RouterConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Task dispatch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently running tasks in multi-agent mode
    pub max_agents: u32,
    /// How often a paused loop re-reads the persisted session
    pub pause_poll_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_agents: 4,
            pause_poll_ms: 500,
        }
    }
}

impl SchedulerConfig {
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(10))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub router: RouterConfig,
    pub cascade: CascadePolicy,
    pub cost: CostConfig,
    pub scheduler: SchedulerConfig,
    /// Replaces the built-in model table when present
    pub registry: Option<RegistryConfig>,
}

impl CoordinationConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read a TOML file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|var| std::env::var(var).ok());
    }

    /// Apply `CASCADE_*` overrides from an arbitrary lookup
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        let router = &mut self.router;
        router.escalate_fail_rate =
            f64_from_env(&env, "CASCADE_ESCALATE_FAIL_RATE", router.escalate_fail_rate);
        router.de_escalate_success_rate = f64_from_env(
            &env,
            "CASCADE_DE_ESCALATE_SUCCESS_RATE",
            router.de_escalate_success_rate,
        );
        router.de_escalation_confidence = f64_from_env(
            &env,
            "CASCADE_DE_ESCALATION_CONFIDENCE",
            router.de_escalation_confidence,
        );

        self.cascade.max_retries =
            u32_from_env(&env, "CASCADE_MAX_RETRIES", self.cascade.max_retries);

        self.cost.base_tokens = u64_from_env(&env, "CASCADE_BASE_TOKENS", self.cost.base_tokens);
        self.cost.output_ratio =
            f64_from_env(&env, "CASCADE_OUTPUT_RATIO", self.cost.output_ratio);

        self.scheduler.max_agents =
            u32_from_env(&env, "CASCADE_MAX_AGENTS", self.scheduler.max_agents);
        self.scheduler.pause_poll_ms =
            u64_from_env(&env, "CASCADE_PAUSE_POLL_MS", self.scheduler.pause_poll_ms);
    }

    /// Router settings with the scheduler's agent bound applied
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_agents: self.scheduler.max_agents,
            ..self.router.clone()
        }
    }

    /// Build the model registry this config describes
    pub fn build_registry(&self) -> Result<ModelRegistry, ConfigError> {
        match &self.registry {
            Some(config) => Ok(config.clone().build()?),
            None => Ok(ModelRegistry::default()),
        }
    }
}

fn u32_from_env(env: &impl Fn(&str) -> Option<String>, var: &str, default: u32) -> u32 {
    env(var)
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn u64_from_env(env: &impl Fn(&str) -> Option<String>, var: &str, default: u64) -> u64 {
    env(var)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

/// Rates and ratios; anything outside 0..=1 is ignored
fn f64_from_env(env: &impl Fn(&str) -> Option<String>, var: &str, default: f64) -> f64 {
    env(var)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| (0.0..=1.0).contains(v))
        .unwrap_or(default)
}

/// Used by the runner for `CASCADE_CONTINUE_ON_FAILURE`
pub fn bool_from_env(var: &str, default: bool) -> bool {
    std::env::var(var)
        .ok()
        .map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelTier;
    use std::collections::HashMap;

    #[test]
    fn test_empty_toml_is_default() {
        let config = CoordinationConfig::from_toml_str("").unwrap();
        assert_eq!(config, CoordinationConfig::default());
        assert_eq!(config.cascade.max_retries, 2);
        assert_eq!(config.scheduler.max_agents, 4);
    }

    #[test]
    fn test_partial_sections() {
        let config = CoordinationConfig::from_toml_str(
            r#"
            [router]
            escalate_fail_rate = 0.6

            [cost]
            base_tokens = 8000
            "#,
        )
        .unwrap();
        assert_eq!(config.router.escalate_fail_rate, 0.6);
        assert_eq!(config.router.confidence_samples, 10);
        assert_eq!(config.cost.base_tokens, 8000);
        assert_eq!(config.cost.output_ratio, 0.3);
    }

    #[test]
    fn test_invalid_toml() {
        let err = CoordinationConfig::from_toml_str("[cascade]\nmax_retries = \"two\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CASCADE_MAX_RETRIES", "4"),
            ("CASCADE_MAX_AGENTS", "2"),
            ("CASCADE_ESCALATE_FAIL_RATE", "1.7"),
            ("CASCADE_OUTPUT_RATIO", "0.25"),
            ("CASCADE_BASE_TOKENS", "zero"),
        ]
        .into_iter()
        .collect();
        let mut config = CoordinationConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.cascade.max_retries, 4);
        assert_eq!(config.scheduler.max_agents, 2);
        assert_eq!(config.router_config().max_agents, 2);
        assert_eq!(config.router.escalate_fail_rate, 0.5, "out of range is ignored");
        assert_eq!(config.cost.output_ratio, 0.25);
        assert_eq!(config.cost.base_tokens, 4000);
    }

    #[test]
    fn test_registry_section() {
        let mut text = String::from("[registry]\nceiling = \"big\"\n");
        for (id, tier, input, output) in [
            ("small", "free", 0.0, 0.0),
            ("lite", "cheap", 0.5, 1.0),
            ("mid", "mid", 2.0, 8.0),
            ("big", "premium", 10.0, 30.0),
        ] {
            text.push_str(&format!(
                "\n[[registry.models]]\nid = \"{id}\"\ntier = \"{tier}\"\nprovider = \"p\"\n\
                 pricing = {{ input_per_mtok = {input:?}, output_per_mtok = {output:?} }}\n"
            ));
        }
        let config = CoordinationConfig::from_toml_str(&text).unwrap();
        let registry = config.build_registry().unwrap();
        assert_eq!(registry.tier_of("small").unwrap(), ModelTier::Free);
        assert!(registry.is_ceiling("big"));

        let broken = CoordinationConfig::from_toml_str(
            "[registry]\n[[registry.models]]\nid = \"only\"\ntier = \"free\"\nprovider = \"p\"\n\
             pricing = { input_per_mtok = 0.0, output_per_mtok = 0.0 }\n",
        )
        .unwrap();
        assert!(matches!(
            broken.build_registry(),
            Err(ConfigError::Registry(RegistryError::EmptyTier(ModelTier::Cheap)))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = CoordinationConfig::load("/nonexistent/cascade.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/cascade.toml"));
    }
}
