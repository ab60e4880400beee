//! PRD task lists: typed model and dependency resolution

pub mod resolver;
pub mod types;

pub use resolver::{DependencyResolver, ValidationError, ValidationIssue};
pub use types::{AcceptanceCriterion, Complexity, Prd, RunConfig, Task, TaskId};
