//! Guardrails: lessons from failed attempts, fed back into later prompts

use chrono::Utc;
use std::collections::HashSet;

use crate::escalation::FailureCategory;
use crate::prd::Task;
use crate::router::TaskSignature;
use crate::state::{AttemptRecord, Guardrail, ProjectStore, StoreResult};

/// Guardrails added to a single prompt
pub const MAX_PROMPT_GUARDRAILS: usize = 5;

const MAX_PROBLEM_CHARS: usize = 200;

/// Problem statement for a failure: category plus the first error line
pub fn problem_text(category: FailureCategory, error: Option<&str>) -> String {
    let line = error
        .and_then(|e| e.lines().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("no error output");
    let line: String = line.chars().take(MAX_PROBLEM_CHARS).collect();
    format!("{} failure: {}", category, line)
}

/// Build a guardrail from one failed attempt
pub fn extract(task: &Task, signature: &TaskSignature, attempt: &AttemptRecord) -> Option<Guardrail> {
    let category = attempt.category?;
    if attempt.success {
        return None;
    }
    Some(Guardrail {
        id: uuid::Uuid::new_v4().to_string(),
        project: attempt.project.clone(),
        task_id: task.id.clone(),
        signature: signature.hash.clone(),
        tags: signature.tags.clone(),
        category,
        problem: problem_text(category, attempt.error.as_deref()),
        fix: category.suggested_fix().to_string(),
        created_at: Utc::now(),
    })
}

/// Append guardrails for every failed attempt whose problem text is new
pub fn record_failures(
    store: &dyn ProjectStore,
    project: &str,
    task: &Task,
    signature: &TaskSignature,
    attempts: &[AttemptRecord],
) -> StoreResult<Vec<Guardrail>> {
    let mut known: HashSet<String> = store
        .guardrails(project)?
        .into_iter()
        .map(|g| g.problem)
        .collect();

    let mut added = Vec::new();
    for attempt in attempts {
        let Some(guardrail) = extract(task, signature, attempt) else {
            continue;
        };
        if !known.insert(guardrail.problem.clone()) {
            continue;
        }
        store.append_guardrail(&guardrail)?;
        tracing::debug!(project, task = %task.id, problem = %guardrail.problem, "recorded guardrail");
        added.push(guardrail);
    }
    Ok(added)
}

/// Guardrails relevant to a task: same signature or a shared tag, newest first
pub fn matching<'a>(
    guardrails: &'a [Guardrail],
    signature: &TaskSignature,
    limit: usize,
) -> Vec<&'a Guardrail> {
    guardrails
        .iter()
        .rev()
        .filter(|g| g.signature == signature.hash || g.tags.iter().any(|t| signature.tags.contains(t)))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prd::Complexity;
    use crate::registry::ModelTier;
    use crate::state::MemoryStore;

    fn attempt(category: Option<FailureCategory>, error: &str) -> AttemptRecord {
        AttemptRecord {
            session_id: "s".into(),
            project: "proj".into(),
            task_id: "t1".into(),
            attempt: 1,
            model: "claude-haiku".into(),
            tier: ModelTier::Cheap,
            success: category.is_none(),
            signature: "sig".into(),
            cost_usd: 0.0,
            tokens_in: 0,
            tokens_out: 0,
            escalated_from: None,
            category,
            error: Some(error.to_string()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_problem_text_uses_first_line() {
        let text = problem_text(FailureCategory::Syntax, Some("\n  error: expected `;`\nmore"));
        assert_eq!(text, "syntax failure: error: expected `;`");
        assert_eq!(
            problem_text(FailureCategory::Timeout, None),
            "timeout failure: no error output"
        );
    }

    #[test]
    fn test_record_dedupes_by_problem() {
        let store = MemoryStore::new();
        let task = Task::new("t1", "T", Complexity::Simple).with_tags(["api"]);
        let sig = TaskSignature::for_task(&task);
        let attempts = vec![
            attempt(Some(FailureCategory::Syntax), "unexpected token"),
            attempt(Some(FailureCategory::Syntax), "unexpected token"),
            attempt(None, ""),
            attempt(Some(FailureCategory::Validation), "2 tests failed"),
        ];
        let added = record_failures(&store, "proj", &task, &sig, &attempts).unwrap();
        assert_eq!(added.len(), 2);

        let again = record_failures(&store, "proj", &task, &sig, &attempts).unwrap();
        assert!(again.is_empty());
        assert_eq!(store.guardrails("proj").unwrap().len(), 2);
    }

    #[test]
    fn test_matching_by_signature_or_tag() {
        let store = MemoryStore::new();
        let api = Task::new("a", "A", Complexity::Simple).with_tags(["api"]);
        let db = Task::new("b", "B", Complexity::Complex).with_tags(["database"]);
        for (i, task) in [&api, &db].into_iter().enumerate() {
            let sig = TaskSignature::for_task(task);
            let failures: Vec<_> = (0..4)
                .map(|n| attempt(Some(FailureCategory::Unknown), &format!("err {i}-{n}")))
                .collect();
            record_failures(&store, "proj", task, &sig, &failures).unwrap();
        }
        let all = store.guardrails("proj").unwrap();

        let other_api = Task::new("c", "C", Complexity::Epic).with_tags(["api", "security"]);
        let hits = matching(&all, &TaskSignature::for_task(&other_api), MAX_PROMPT_GUARDRAILS);
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|g| g.task_id == "a"));
        assert_eq!(hits[0].problem, "unknown failure: err 0-3");

        let same_sig = TaskSignature::for_task(&db);
        assert_eq!(matching(&all, &same_sig, 2).len(), 2);
    }
}
