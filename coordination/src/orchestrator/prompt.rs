//! Task prompt assembly: title, description, criteria, guardrails

use std::fmt::Write;

use crate::prd::Task;
use crate::state::Guardrail;

pub fn build_prompt(task: &Task, guardrails: &[&Guardrail]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Task {}: {}", task.id, task.title);

    if !task.description.trim().is_empty() {
        let _ = writeln!(out, "\n{}", task.description.trim());
    }

    if !task.files.is_empty() {
        let _ = writeln!(out, "\n## Files");
        for file in &task.files {
            let _ = writeln!(out, "- {}", file);
        }
    }

    if !task.acceptance_criteria.is_empty() {
        let _ = writeln!(out, "\n## Acceptance criteria");
        for (i, criterion) in task.acceptance_criteria.iter().enumerate() {
            match &criterion.verification {
                Some(cmd) => {
                    let _ = writeln!(out, "{}. {} (verify: `{}`)", i + 1, criterion.description, cmd);
                }
                None => {
                    let _ = writeln!(out, "{}. {}", i + 1, criterion.description);
                }
            }
        }
    }

    if !guardrails.is_empty() {
        let _ = writeln!(out, "\n## Known pitfalls");
        for g in guardrails {
            let _ = writeln!(out, "- {} -> {}", g.problem, g.fix);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::FailureCategory;
    use crate::prd::{AcceptanceCriterion, Complexity};
    use chrono::Utc;

    #[test]
    fn test_minimal_prompt() {
        let task = Task::new("t1", "Fix typo", Complexity::Trivial);
        assert_eq!(build_prompt(&task, &[]), "# Task t1: Fix typo\n");
    }

    #[test]
    fn test_full_prompt() {
        let task = Task::new("t2", "Add login", Complexity::Moderate)
            .with_description("Session cookie based login.")
            .with_files(["src/auth.rs"])
            .with_criteria(vec![
                AcceptanceCriterion::new("Login works"),
                AcceptanceCriterion::new("Tests pass").with_verification("cargo test auth"),
            ]);
        let guardrail = Guardrail {
            id: "g".into(),
            project: "p".into(),
            task_id: "t0".into(),
            signature: "s".into(),
            tags: vec![],
            category: FailureCategory::Syntax,
            problem: "syntax failure: unexpected token".into(),
            fix: "check it compiles".into(),
            created_at: Utc::now(),
        };
        let prompt = build_prompt(&task, &[&guardrail]);

        assert!(prompt.contains("Session cookie based login."));
        assert!(prompt.contains("- src/auth.rs"));
        assert!(prompt.contains("2. Tests pass (verify: `cargo test auth`)"));
        assert!(prompt.ends_with("- syntax failure: unexpected token -> check it compiles\n"));
    }
}
