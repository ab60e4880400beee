//! Typed PRD task list
//!
//! These are the already-validated, in-memory shapes handed to the
//! orchestrator. Nothing here parses a wire format; the loader front end
//! deserializes into these types and the resolver validates them.

use serde::{Deserialize, Serialize};

/// Unique identifier for a task within a PRD
pub type TaskId = String;

/// Complexity hint attached to every task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
    Epic,
}

impl Complexity {
    /// All complexity levels, lowest first
    pub fn all() -> &'static [Complexity] {
        &[
            Complexity::Trivial,
            Complexity::Simple,
            Complexity::Moderate,
            Complexity::Complex,
            Complexity::Epic,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trivial => "trivial",
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
            Self::Epic => "epic",
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single acceptance criterion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub description: String,
    /// Optional shell command that verifies the criterion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<String>,
}

impl AcceptanceCriterion {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            verification: None,
        }
    }

    pub fn with_verification(mut self, command: impl Into<String>) -> Self {
        self.verification = Some(command.into());
        self
    }
}

/// A work item in the PRD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    pub complexity: Complexity,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    /// Explicit model preference; bypasses rule and history routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Task {
    /// Create a task with the required fields; everything else empty
    pub fn new(id: impl Into<String>, title: impl Into<String>, complexity: Complexity) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            acceptance_criteria: Vec::new(),
            dependencies: Vec::new(),
            complexity,
            tags: Vec::new(),
            files: Vec::new(),
            model: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_criteria(mut self, criteria: Vec<AcceptanceCriterion>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Run configuration carried by the PRD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Hard cap on attempts for a single task, across all models
    pub max_attempts_per_task: u32,
    /// Skip a failed task (and its dependents) instead of failing the session
    pub continue_on_failure: bool,
    /// Preference for tasks that name no model of their own
    pub default_model: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_task: 5,
            continue_on_failure: false,
            default_model: None,
        }
    }
}

/// The declarative task list consumed by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prd {
    #[serde(default)]
    pub name: String,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub config: RunConfig,
}

impl Prd {
    pub fn new(name: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            name: name.into(),
            tasks,
            config: RunConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_builder() {
        let task = Task::new("t1", "Add login", Complexity::Moderate)
            .with_tags(["auth", "api"])
            .with_files(["src/login.rs"])
            .with_dependencies(["t0"]);
        assert_eq!(task.tags, vec!["auth", "api"]);
        assert_eq!(task.file_count(), 1);
        assert_eq!(task.dependencies, vec!["t0"]);
        assert!(task.model.is_none());
    }

    #[test]
    fn test_prd_deserializes_with_defaults() {
        let json = r#"{
            "tasks": [
                {"id": "t1", "title": "First", "complexity": "simple"}
            ]
        }"#;
        let prd: Prd = serde_json::from_str(json).unwrap();
        assert_eq!(prd.tasks.len(), 1);
        assert_eq!(prd.tasks[0].complexity, Complexity::Simple);
        assert_eq!(prd.config.max_attempts_per_task, 5);
        assert!(!prd.config.continue_on_failure);
    }

    #[test]
    fn test_complexity_ordering() {
        assert!(Complexity::Trivial < Complexity::Epic);
        assert_eq!(Complexity::Complex.to_string(), "complex");
    }
}
