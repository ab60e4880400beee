//! Dependency Resolver
//!
//! Validates a PRD task list and computes a deterministic execution order.
//! Every check runs to completion: the resolver never stops at the first
//! problem, it reports all of them in a single [`ValidationError`].

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::types::{Prd, Task, TaskId};

/// A single problem found while validating a task list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    /// The same id appears more than once
    DuplicateId { id: TaskId },
    /// A dependency cycle, as an ordered path that starts and ends on the same task
    Cycle { path: Vec<TaskId> },
    /// A task depends on an id that is not in the list
    MissingDependency { task: TaskId, dependency: TaskId },
    /// Structural problem with a task or the run configuration
    Schema { task: Option<TaskId>, message: String },
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId { id } => write!(f, "duplicate task id '{}'", id),
            Self::Cycle { path } => write!(f, "dependency cycle: {}", path.join(" -> ")),
            Self::MissingDependency { task, dependency } => {
                write!(f, "task '{}' depends on unknown task '{}'", task, dependency)
            }
            Self::Schema {
                task: Some(task),
                message,
            } => write!(f, "task '{}': {}", task, message),
            Self::Schema {
                task: None,
                message,
            } => write!(f, "{}", message),
        }
    }
}

/// Validation failure carrying every issue that was found
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("PRD validation failed with {} issue(s): {}", issues.len(), summarize(issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn duplicates(&self) -> Vec<&str> {
        self.issues
            .iter()
            .filter_map(|i| match i {
                ValidationIssue::DuplicateId { id } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn cycles(&self) -> Vec<&[TaskId]> {
        self.issues
            .iter()
            .filter_map(|i| match i {
                ValidationIssue::Cycle { path } => Some(path.as_slice()),
                _ => None,
            })
            .collect()
    }

    pub fn missing(&self) -> Vec<(&str, &str)> {
        self.issues
            .iter()
            .filter_map(|i| match i {
                ValidationIssue::MissingDependency { task, dependency } => {
                    Some((task.as_str(), dependency.as_str()))
                }
                _ => None,
            })
            .collect()
    }
}

/// Stateless resolver over a task slice
pub struct DependencyResolver;

impl DependencyResolver {
    /// Validate a PRD (tasks plus run configuration) and return its execution order
    pub fn resolve_prd(prd: &Prd) -> Result<Vec<TaskId>, ValidationError> {
        let mut issues = Vec::new();
        if prd.config.max_attempts_per_task == 0 {
            issues.push(ValidationIssue::Schema {
                task: None,
                message: "max_attempts_per_task must be at least 1".to_string(),
            });
        }
        issues.extend(Self::validate(&prd.tasks));

        if !issues.is_empty() {
            return Err(ValidationError { issues });
        }
        Ok(Self::order(&prd.tasks))
    }

    /// Validate a task list and return its execution order
    pub fn resolve(tasks: &[Task]) -> Result<Vec<TaskId>, ValidationError> {
        let issues = Self::validate(tasks);
        if !issues.is_empty() {
            return Err(ValidationError { issues });
        }
        Ok(Self::order(tasks))
    }

    /// Run every check and collect all issues
    pub fn validate(tasks: &[Task]) -> Vec<ValidationIssue> {
        let mut issues = Self::check_schema(tasks);
        issues.extend(Self::check_duplicates(tasks));
        issues.extend(Self::check_missing(tasks));
        issues.extend(Self::check_cycles(tasks));
        issues
    }

    fn check_schema(tasks: &[Task]) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (idx, task) in tasks.iter().enumerate() {
            if task.id.trim().is_empty() {
                issues.push(ValidationIssue::Schema {
                    task: None,
                    message: format!("task at position {} has an empty id", idx),
                });
            }
            if task.title.trim().is_empty() {
                issues.push(ValidationIssue::Schema {
                    task: Some(task.id.clone()),
                    message: "title must not be empty".to_string(),
                });
            }
            if task.dependencies.iter().any(|d| d == &task.id) {
                issues.push(ValidationIssue::Schema {
                    task: Some(task.id.clone()),
                    message: "task depends on itself".to_string(),
                });
            }
        }
        issues
    }

    /// Each duplicated id is reported exactly once, in first-seen order
    fn check_duplicates(tasks: &[Task]) -> Vec<ValidationIssue> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut reported: HashSet<&str> = HashSet::new();
        let mut issues = Vec::new();

        for task in tasks {
            if !seen.insert(task.id.as_str()) && reported.insert(task.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId {
                    id: task.id.clone(),
                });
            }
        }
        issues
    }

    fn check_missing(tasks: &[Task]) -> Vec<ValidationIssue> {
        let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let mut issues = Vec::new();

        for task in tasks {
            for dep in &task.dependencies {
                if !ids.contains(dep.as_str()) {
                    issues.push(ValidationIssue::MissingDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        issues
    }

    /// Depth-first search with an explicit recursion stack.
    ///
    /// Edges point from a task to its dependencies. When the walk reaches a
    /// task that is already on the stack, the stack slice from that task
    /// onward (closed with the task again) is the exact cycle.
    fn check_cycles(tasks: &[Task]) -> Vec<ValidationIssue> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let index = first_index(tasks);
        let mut marks = vec![Mark::Unvisited; tasks.len()];
        let mut issues = Vec::new();

        for root in 0..tasks.len() {
            if marks[root] != Mark::Unvisited || index.get(tasks[root].id.as_str()) != Some(&root)
            {
                continue;
            }

            // Frames are (task index, next dependency position)
            let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
            let mut path: Vec<usize> = vec![root];
            marks[root] = Mark::OnStack;

            while let Some(frame) = frames.last_mut() {
                let (node, dep_pos) = *frame;
                let deps = &tasks[node].dependencies;

                if dep_pos >= deps.len() {
                    marks[node] = Mark::Done;
                    frames.pop();
                    path.pop();
                    continue;
                }
                frame.1 += 1;

                // Self-dependencies are reported by the schema check
                let Some(&next) = index.get(deps[dep_pos].as_str()) else {
                    continue;
                };
                if next == node {
                    continue;
                }

                match marks[next] {
                    Mark::Unvisited => {
                        marks[next] = Mark::OnStack;
                        frames.push((next, 0));
                        path.push(next);
                    }
                    Mark::OnStack => {
                        if let Some(start) = path.iter().position(|&n| n == next) {
                            let mut cycle: Vec<TaskId> =
                                path[start..].iter().map(|&n| tasks[n].id.clone()).collect();
                            cycle.push(tasks[next].id.clone());
                            issues.push(ValidationIssue::Cycle { path: cycle });
                        }
                    }
                    Mark::Done => {}
                }
            }
        }
        issues
    }

    /// Kahn's algorithm. Assumes the list already validated.
    ///
    /// Tasks that become ready in the same step are queued in original list
    /// order, so the output is a pure function of the input list.
    pub fn order(tasks: &[Task]) -> Vec<TaskId> {
        let index = first_index(tasks);
        let mut in_degree = vec![0usize; tasks.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];

        for (idx, task) in tasks.iter().enumerate() {
            if index.get(task.id.as_str()) != Some(&idx) {
                continue;
            }
            let mut unique: HashSet<usize> = HashSet::new();
            for dep in &task.dependencies {
                if let Some(&dep_idx) = index.get(dep.as_str()) {
                    if unique.insert(dep_idx) {
                        in_degree[idx] += 1;
                        dependents[dep_idx].push(idx);
                    }
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..tasks.len())
            .filter(|&i| in_degree[i] == 0 && index.get(tasks[i].id.as_str()) == Some(&i))
            .collect();
        let mut order = Vec::with_capacity(tasks.len());

        while let Some(idx) = queue.pop_front() {
            order.push(tasks[idx].id.clone());

            let mut ready = Vec::new();
            for &dependent in &dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(dependent);
                }
            }
            ready.sort_unstable();
            queue.extend(ready);
        }

        order
    }

    /// Group an execution order into dependency levels.
    ///
    /// Level 0 holds tasks without dependencies; every other task sits one
    /// level above its deepest dependency. Tasks inside a level keep their
    /// relative order from `order`.
    pub fn waves(tasks: &[Task], order: &[TaskId]) -> Vec<Vec<TaskId>> {
        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut level: HashMap<&str, usize> = HashMap::new();
        let mut waves: Vec<Vec<TaskId>> = Vec::new();

        for id in order {
            let Some(task) = by_id.get(id.as_str()) else {
                continue;
            };
            let depth = task
                .dependencies
                .iter()
                .filter_map(|d| level.get(d.as_str()))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(id.as_str(), depth);

            if waves.len() <= depth {
                waves.resize_with(depth + 1, Vec::new);
            }
            waves[depth].push(id.clone());
        }
        waves
    }
}

/// Map each id to the position of its first occurrence
fn first_index(tasks: &[Task]) -> HashMap<&str, usize> {
    let mut index = HashMap::new();
    for (idx, task) in tasks.iter().enumerate() {
        index.entry(task.id.as_str()).or_insert(idx);
    }
    index
}
