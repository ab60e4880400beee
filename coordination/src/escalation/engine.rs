//! Cascade Executor: drives one task through retry / escalate / give up
//!
//! Each attempt dispatches to the backend, runs the quality gate on success,
//! classifies failures, and asks the [`CascadePolicy`] what to do next. Every
//! completed attempt is folded into the History Store before the next one
//! starts.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendRequest, ExecutionBackend, QualityGate};
use crate::escalation::classify::{classify, FailureCategory};
use crate::escalation::policy::{CascadeAction, CascadePolicy};
use crate::escalation::state::CascadeState;
use crate::history::HistoryStore;
use crate::prd::Task;
use crate::registry::ModelRegistry;
use crate::router::RoutingDecision;
use crate::state::{AttemptRecord, StoreResult};

/// How the cascade ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStatus {
    Succeeded,
    /// Policy gave up: path exhausted, retries spent or attempt cap reached
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeOutcome {
    pub status: CascadeStatus,
    /// Model of the final attempt (or the routed model when none ran)
    pub final_model: String,
    pub attempts: Vec<AttemptRecord>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub last_category: Option<FailureCategory>,
    pub last_error: Option<String>,
    /// Escalation and retry reasoning, oldest first
    pub trail: Vec<String>,
}

impl CascadeOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == CascadeStatus::Succeeded
    }

    pub fn escalated(&self) -> bool {
        self.attempts.iter().any(|a| a.escalated_from.is_some())
    }
}

/// Everything one cascade run needs besides the executor itself
pub struct CascadeRequest<'a> {
    pub task: &'a Task,
    pub decision: &'a RoutingDecision,
    pub prompt: String,
    pub session_id: &'a str,
    pub max_attempts: u32,
    /// Attempts already made for this task in this session
    pub prior_attempts: u32,
    pub cancel: CancellationToken,
}

pub struct CascadeExecutor {
    backend: Arc<dyn ExecutionBackend>,
    gate: Option<Arc<dyn QualityGate>>,
    history: Arc<HistoryStore>,
    registry: Arc<ModelRegistry>,
    policy: CascadePolicy,
}

impl CascadeExecutor {
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        history: Arc<HistoryStore>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            backend,
            gate: None,
            history,
            registry,
            policy: CascadePolicy::default(),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn QualityGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_policy(mut self, policy: CascadePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &CascadePolicy {
        &self.policy
    }

    /// Run the cascade for one task.
    ///
    /// Attempt failures never surface as errors; only history writes can fail.
    pub async fn run_task(&self, request: CascadeRequest<'_>) -> StoreResult<CascadeOutcome> {
        let task = request.task;
        let decision = request.decision;
        let mut state = CascadeState::new(
            task.id.clone(),
            decision.model.clone(),
            decision.escalation_path.clone(),
        );
        let mut outcome = CascadeOutcome {
            status: CascadeStatus::Exhausted,
            final_model: decision.model.clone(),
            attempts: Vec::new(),
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: 0.0,
            last_category: None,
            last_error: None,
            trail: Vec::new(),
        };
        // Attempts already spent in an earlier run count against the cap
        if request.prior_attempts >= request.max_attempts && !request.cancel.is_cancelled() {
            let reason = format!(
                "attempt cap of {} already reached ({} made)",
                request.max_attempts, request.prior_attempts
            );
            tracing::warn!(task = %task.id, prior = request.prior_attempts, "{}", reason);
            outcome.trail.push(reason.clone());
            outcome.last_error = Some(reason);
            return Ok(outcome);
        }
        let max_attempts = request.max_attempts - request.prior_attempts;

        loop {
            if request.cancel.is_cancelled() {
                outcome.status = CascadeStatus::Cancelled;
                return Ok(outcome);
            }

            let attempt_no = request.prior_attempts + state.total_attempts + 1;
            let model = state.current_model.clone();
            tracing::info!(task = %task.id, model = %model, attempt = attempt_no, "dispatching attempt");

            let result = self
                .backend
                .run(BackendRequest {
                    task_id: task.id.clone(),
                    model: model.clone(),
                    prompt: request.prompt.clone(),
                    attempt: attempt_no,
                    cancel: request.cancel.clone(),
                })
                .await;

            let (mut success, tokens_in, tokens_out, cost, mut category, mut message) = match result {
                Ok(o) => (o.success, o.tokens_in, o.tokens_out, o.cost_usd, o.category, o.message),
                Err(e) => (false, 0, 0, 0.0, Some(e.category()), Some(e.to_string())),
            };
            outcome.tokens_in += tokens_in;
            outcome.tokens_out += tokens_out;
            outcome.cost_usd += cost;
            outcome.final_model = model.clone();

            if request.cancel.is_cancelled() {
                tracing::info!(task = %task.id, model = %model, "attempt returned after cancellation");
                outcome.status = CascadeStatus::Cancelled;
                return Ok(outcome);
            }

            if success {
                if let Some(gate) = &self.gate {
                    let verdict = gate.check(task).await;
                    if !verdict.passed {
                        success = false;
                        category = Some(FailureCategory::Validation);
                        message = Some(verdict.summary());
                    }
                }
            }

            let category = if success {
                None
            } else {
                Some(classify(category, message.as_deref()))
            };

            self.history
                .record(&decision.signature, &model, success, cost)?;

            let tier = self
                .registry
                .tier_of(&model)
                .unwrap_or(decision.tier);
            outcome.attempts.push(AttemptRecord {
                session_id: request.session_id.to_string(),
                project: self.history.project().to_string(),
                task_id: task.id.clone(),
                attempt: attempt_no,
                model: model.clone(),
                tier,
                success,
                signature: decision.signature.hash.clone(),
                cost_usd: cost,
                tokens_in,
                tokens_out,
                escalated_from: state.escalated_from.clone(),
                category,
                error: if success { None } else { message.clone() },
                timestamp: Utc::now(),
            });

            let Some(category) = category else {
                state.record_success();
                outcome.status = CascadeStatus::Succeeded;
                outcome.last_category = None;
                outcome.last_error = None;
                tracing::info!(task = %task.id, summary = %state.summary(), "task succeeded");
                return Ok(outcome);
            };

            let error = message.unwrap_or_else(|| format!("{} failure", category));
            state.record_failure(category, error.clone());
            outcome.last_category = Some(category);
            outcome.last_error = Some(error);

            let next = self.policy.decide(&state, category, max_attempts);
            outcome.trail.push(next.reason.clone());
            tracing::info!(task = %task.id, model = %model, category = %category, reason = %next.reason, "attempt failed");

            match next.action {
                CascadeAction::RetrySame => {}
                CascadeAction::Escalate { to } => state.escalate_to(&to),
                CascadeAction::GiveUp => {
                    tracing::warn!(task = %task.id, summary = %state.summary(), "cascade exhausted");
                    outcome.status = CascadeStatus::Exhausted;
                    return Ok(outcome);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BackendOutcome, GateVerdict, MockQualityGate};
    use crate::prd::Complexity;
    use crate::router::{HistoryRouter, RouteOptions};
    use crate::state::MemoryStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend that replays a fixed script of results
    struct Scripted {
        script: Mutex<VecDeque<Result<BackendOutcome, BackendError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(script: Vec<Result<BackendOutcome, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn models(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExecutionBackend for Scripted {
        async fn run(&self, request: BackendRequest) -> Result<BackendOutcome, BackendError> {
            self.calls.lock().unwrap().push(request.model);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(BackendOutcome::succeeded(10, 10, 0.0)))
        }
    }

    fn fixture(
        backend: Arc<Scripted>,
    ) -> (CascadeExecutor, HistoryRouter, Arc<HistoryStore>) {
        let registry = Arc::new(ModelRegistry::default());
        let history = Arc::new(HistoryStore::new(MemoryStore::new().shared(), "proj"));
        let exec = CascadeExecutor::new(backend, history.clone(), registry.clone());
        let router = HistoryRouter::new(registry, history.clone());
        (exec, router, history)
    }

    fn task() -> Task {
        Task::new("t1", "Add endpoint", Complexity::Simple).with_tags(["api"])
    }

    async fn run(exec: &CascadeExecutor, router: &HistoryRouter, max: u32) -> CascadeOutcome {
        let task = task();
        let decision = router.route(&task, &RouteOptions::default()).unwrap();
        exec.run_task(CascadeRequest {
            task: &task,
            decision: &decision,
            prompt: "do it".to_string(),
            session_id: "s1",
            max_attempts: max,
            prior_attempts: 0,
            cancel: CancellationToken::new(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_first_try_success_records_history() {
        let backend = Scripted::new(vec![Ok(BackendOutcome::succeeded(100, 50, 0.01))]);
        let (exec, router, history) = fixture(backend.clone());
        let outcome = run(&exec, &router, 5).await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.tokens_in, 100);
        let patterns = history.patterns_for(&outcome_sig()).unwrap();
        assert_eq!(patterns[0].success_count, 1);
    }

    fn outcome_sig() -> crate::router::TaskSignature {
        crate::router::TaskSignature::for_task(&task())
    }

    #[tokio::test]
    async fn test_capability_escalates_along_path() {
        let backend = Scripted::new(vec![
            Ok(BackendOutcome::failed(Some(FailureCategory::Capability), "too hard")),
            Ok(BackendOutcome::succeeded(10, 10, 0.02)),
        ]);
        let (exec, router, _) = fixture(backend.clone());
        let outcome = run(&exec, &router, 5).await;

        assert!(outcome.succeeded());
        assert_eq!(backend.models(), vec!["claude-haiku", "gpt-4o-mini"]);
        assert_eq!(outcome.attempts[1].escalated_from.as_deref(), Some("claude-haiku"));
        assert!(outcome.escalated());
    }

    #[tokio::test]
    async fn test_message_classification_and_attempt_numbers() {
        let backend = Scripted::new(vec![
            Ok(BackendOutcome::failed(None, "SyntaxError: unexpected token")),
            Err(BackendError::Timeout("60s".into())),
            Ok(BackendOutcome::succeeded(1, 1, 0.0)),
        ]);
        let (exec, router, _) = fixture(backend.clone());
        let outcome = run(&exec, &router, 5).await;

        let cats: Vec<_> = outcome.attempts.iter().map(|a| a.category).collect();
        assert_eq!(
            cats,
            vec![Some(FailureCategory::Syntax), Some(FailureCategory::Timeout), None]
        );
        let numbers: Vec<u32> = outcome.attempts.iter().map(|a| a.attempt).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        // syntax retried the same model, timeout escalated
        assert_eq!(backend.models(), vec!["claude-haiku", "claude-haiku", "gpt-4o-mini"]);
    }

    #[tokio::test]
    async fn test_attempt_cap_stops_cascade() {
        let failures = (0..10)
            .map(|_| Ok(BackendOutcome::failed(Some(FailureCategory::Capability), "no")))
            .collect();
        let backend = Scripted::new(failures);
        let (exec, router, _) = fixture(backend.clone());
        let outcome = run(&exec, &router, 3).await;

        assert_eq!(outcome.status, CascadeStatus::Exhausted);
        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(outcome.last_category, Some(FailureCategory::Capability));
    }

    #[tokio::test]
    async fn test_spent_cap_dispatches_nothing() {
        let backend = Scripted::new(vec![]);
        let (exec, router, history) = fixture(backend.clone());
        let task = task();
        let decision = router.route(&task, &RouteOptions::default()).unwrap();
        let outcome = exec
            .run_task(CascadeRequest {
                task: &task,
                decision: &decision,
                prompt: String::new(),
                session_id: "s1",
                max_attempts: 3,
                prior_attempts: 3,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.status, CascadeStatus::Exhausted);
        assert!(outcome.attempts.is_empty());
        assert!(backend.models().is_empty());
        assert_eq!(
            outcome.last_error.as_deref(),
            Some("attempt cap of 3 already reached (3 made)")
        );
        assert!(history.patterns_for(&outcome_sig()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prior_attempts_shrink_the_budget() {
        let failures = (0..10)
            .map(|_| Ok(BackendOutcome::failed(Some(FailureCategory::Capability), "no")))
            .collect();
        let backend = Scripted::new(failures);
        let (exec, router, _) = fixture(backend.clone());
        let task = task();
        let decision = router.route(&task, &RouteOptions::default()).unwrap();
        let outcome = exec
            .run_task(CascadeRequest {
                task: &task,
                decision: &decision,
                prompt: String::new(),
                session_id: "s1",
                max_attempts: 3,
                prior_attempts: 2,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.status, CascadeStatus::Exhausted);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].attempt, 3);
    }

    #[tokio::test]
    async fn test_gate_failure_is_validation() {
        let backend = Scripted::new(vec![
            Ok(BackendOutcome::succeeded(1, 1, 0.0)),
            Ok(BackendOutcome::succeeded(1, 1, 0.0)),
        ]);
        let (exec, router, history) = fixture(backend.clone());
        let mut gate = MockQualityGate::new();
        let mut verdicts = vec![GateVerdict::pass(), GateVerdict::fail(["missing tests"])];
        gate.expect_check()
            .times(2)
            .returning(move |_| verdicts.pop().unwrap_or_else(GateVerdict::pass));
        let exec = exec.with_gate(Arc::new(gate));

        let outcome = run(&exec, &router, 5).await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts[0].category, Some(FailureCategory::Validation));
        assert_eq!(
            outcome.attempts[0].error.as_deref(),
            Some("quality gate failed: missing tests")
        );
        let p = &history.patterns_for(&outcome_sig()).unwrap()[0];
        assert_eq!((p.success_count, p.fail_count), (1, 1));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let backend = Scripted::new(vec![]);
        let (exec, router, history) = fixture(backend.clone());
        let task = task();
        let decision = router.route(&task, &RouteOptions::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = exec
            .run_task(CascadeRequest {
                task: &task,
                decision: &decision,
                prompt: String::new(),
                session_id: "s1",
                max_attempts: 5,
                prior_attempts: 0,
                cancel,
            })
            .await
            .unwrap();
        assert_eq!(outcome.status, CascadeStatus::Cancelled);
        assert!(backend.models().is_empty());
        assert!(history.patterns_for(&outcome_sig()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ceiling_gives_up_on_capability() {
        let backend = Scripted::new(vec![Ok(BackendOutcome::failed(
            Some(FailureCategory::Capability),
            "beyond the model's capability",
        ))]);
        let (exec, router, _) = fixture(backend.clone());
        let task = task().with_model("claude-opus");
        let decision = router.route(&task, &RouteOptions::default()).unwrap();
        let outcome = exec
            .run_task(CascadeRequest {
                task: &task,
                decision: &decision,
                prompt: String::new(),
                session_id: "s1",
                max_attempts: 5,
                prior_attempts: 2,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.status, CascadeStatus::Exhausted);
        assert_eq!(outcome.attempts[0].attempt, 3);
        assert!(outcome.trail[0].contains("exhausted"));
    }
}
