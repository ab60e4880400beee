use anyhow::{Context, Result};
use cascade_coordination::CoordinationConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Subprocess that performs one model attempt.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Shell-style command line; the prompt arrives on stdin
    pub command: Option<String>,
    /// Per-attempt wall clock limit
    pub timeout_secs: u64,
    /// Working directory for the subprocess (None = inherit)
    pub workdir: Option<PathBuf>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: 600,
            workdir: None,
        }
    }
}

impl BackendSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Command quality gate run after each successful attempt.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    /// Project-wide check (e.g. `cargo test`); None = only criterion checks
    pub command: Option<String>,
    pub timeout_secs: u64,
    /// Also run each acceptance criterion's verification command
    pub run_verifications: bool,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: 300,
            run_verifications: true,
        }
    }
}

impl GateSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn is_enabled(&self) -> bool {
        self.command.is_some() || self.run_verifications
    }
}

/// Supervisor restart policy for detached sessions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub max_restarts: u32,
    pub restart_delay_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            restart_delay_secs: 2,
        }
    }
}

/// The runner-only sections of the config file. The engine sections
/// (`router`, `cascade`, `cost`, `scheduler`, `registry`) are read by
/// [`CoordinationConfig`] from the same text.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RunnerSections {
    backend: BackendSettings,
    gate: GateSettings,
    supervisor: SupervisorSettings,
}

/// Everything the runner needs, from one TOML file plus environment.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    pub coordination: CoordinationConfig,
    pub backend: BackendSettings,
    pub gate: GateSettings,
    pub supervisor: SupervisorSettings,
}

impl RunnerConfig {
    /// Load from `path` when given, else defaults; environment applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Self::from_toml_str(&text)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let coordination = CoordinationConfig::from_toml_str(text)?;
        let sections: RunnerSections = toml::from_str(text)?;
        Ok(Self {
            coordination,
            backend: sections.backend,
            gate: sections.gate,
            supervisor: sections.supervisor,
        })
    }

    /// `CASCADE_*` overrides for the engine plus the runner's own variables
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        self.coordination.apply_overrides(&env);

        if let Some(cmd) = env("CASCADE_BACKEND_CMD").filter(|v| !v.trim().is_empty()) {
            self.backend.command = Some(cmd);
        }
        if let Some(secs) = secs_from_env(&env, "CASCADE_BACKEND_TIMEOUT_SECS") {
            self.backend.timeout_secs = secs;
        }
        if let Some(dir) = env("CASCADE_BACKEND_WORKDIR").filter(|v| !v.trim().is_empty()) {
            self.backend.workdir = Some(PathBuf::from(dir));
        }
        if let Some(cmd) = env("CASCADE_GATE_CMD").filter(|v| !v.trim().is_empty()) {
            self.gate.command = Some(cmd);
        }
        if let Some(secs) = secs_from_env(&env, "CASCADE_GATE_TIMEOUT_SECS") {
            self.gate.timeout_secs = secs;
        }
    }

    /// The backend command, or an error naming where to set it
    pub fn backend_command(&self) -> Result<&str> {
        self.backend
            .command
            .as_deref()
            .context("no backend command configured; set [backend] command, CASCADE_BACKEND_CMD or --backend-cmd")
    }
}

fn secs_from_env(env: &impl Fn(&str) -> Option<String>, var: &str) -> Option<u64> {
    env(var)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}
