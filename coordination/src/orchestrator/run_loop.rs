//! Session run loop
//!
//! One loop per session. At every task boundary the loop merges the
//! persisted record (out-of-process signals), writes its own progress, then
//! dispatches whatever the scheduler finds ready. A pause request stops new
//! dispatches at once but only moves the session to paused after its
//! in-flight tasks have finished.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::escalation::{CascadeExecutor, CascadeOutcome, CascadeRequest, CascadeStatus};
use crate::orchestrator::guardrails::{self, MAX_PROMPT_GUARDRAILS};
use crate::orchestrator::prompt::build_prompt;
use crate::orchestrator::scheduler::Scheduler;
use crate::orchestrator::session::effective_status;
use crate::prd::{Prd, Task, TaskId};
use crate::router::{HistoryRouter, RouteOptions, RouterError, TaskSignature};
use crate::state::{
    ControlSignal, SessionRecord, SessionStatus, SharedStore, StoreError, StoreResult, TaskOutcome,
    TaskState,
};

/// Errors that end a run loop and fail the session
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("task runner failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Look up a persisted session by id
pub fn load_session(
    store: &SharedStore,
    project: &str,
    session_id: &str,
) -> StoreResult<Option<SessionRecord>> {
    Ok(store
        .list_sessions(project)?
        .into_iter()
        .find(|s| s.id == session_id))
}

/// Fold control changes made by other processes into the live record.
///
/// Cancellation is taken over at once; pause and resume requests are copied
/// as pending signals for [`apply_pending`]. Returns true when the live
/// record changed.
pub fn merge_external(live: &mut SessionRecord, persisted: &SessionRecord) -> bool {
    if live.status.is_terminal() {
        return false;
    }
    if persisted.status == SessionStatus::Cancelled {
        live.status = SessionStatus::Cancelled;
        live.finished_at = persisted.finished_at.or_else(|| Some(chrono::Utc::now()));
        live.current_task = None;
        live.touch();
        return true;
    }
    if persisted.pending_signal == live.pending_signal {
        return false;
    }
    live.pending_signal = persisted.pending_signal;
    live.pause_requested = persisted.pause_requested;
    live.touch();
    true
}

/// Turn a pending signal into a status change.
///
/// A pause only lands once no task is in flight (`idle`); until then the
/// signal stays pending and nothing new is dispatched. Returns true when
/// the record changed.
pub fn apply_pending(record: &mut SessionRecord, idle: bool) -> bool {
    let next = match (record.pending_signal, record.status) {
        (Some(ControlSignal::Pause), SessionStatus::Running) if !idle => return false,
        (Some(ControlSignal::Pause), SessionStatus::Running) => SessionStatus::Paused,
        (Some(ControlSignal::Resume), SessionStatus::Paused) => SessionStatus::Running,
        (Some(_), status) => status,
        (None, _) => return false,
    };
    record.status = next;
    record.pause_requested = next == SessionStatus::Paused;
    record.pending_signal = None;
    record.touch();
    true
}

struct TaskResult {
    task_id: TaskId,
    task: Task,
    signature: TaskSignature,
    outcome: StoreResult<CascadeOutcome>,
}

pub struct SessionRun {
    pub(crate) project: String,
    pub(crate) store: SharedStore,
    pub(crate) router: Arc<HistoryRouter>,
    pub(crate) executor: Arc<CascadeExecutor>,
    pub(crate) prd: Arc<Prd>,
    pub(crate) record: Arc<Mutex<SessionRecord>>,
    pub(crate) status_rx: watch::Receiver<SessionStatus>,
    pub(crate) cancel: CancellationToken,
    pub(crate) scheduler: Scheduler,
    pub(crate) pause_poll: Duration,
}

impl SessionRun {
    pub async fn run(mut self) {
        let session_id = self.record.lock().await.id.clone();
        tracing::info!(project = %self.project, session = %session_id, "session loop started");

        if let Err(e) = self.drive().await {
            tracing::error!(project = %self.project, session = %session_id, error = %e, "session failed");
            self.cancel.cancel();
            let mut record = self.record.lock().await;
            if !record.status.is_terminal() {
                record.status = SessionStatus::Failed;
                record.finished_at = Some(chrono::Utc::now());
            }
            record.last_error = Some(e.to_string());
            record.current_task = None;
            record.touch();
            if let Err(e) = self.store.put_session(&record) {
                tracing::error!(project = %self.project, error = %e, "could not persist failed session");
            }
        }

        let record = self.record.lock().await;
        tracing::info!(
            project = %self.project,
            session = %record.short_id(),
            status = %record.status,
            completed = record.completed,
            failed = record.failed,
            skipped = record.skipped,
            cost_usd = record.cost_usd,
            "session loop finished"
        );
    }

    async fn drive(&mut self) -> Result<(), RunError> {
        let mut in_flight: JoinSet<TaskResult> = JoinSet::new();
        let mut running: HashSet<TaskId> = HashSet::new();
        let mut abort: Option<String> = None;

        loop {
            let status = self.boundary(running.is_empty()).await?;

            if status == SessionStatus::Cancelled {
                self.cancel.cancel();
                break;
            }

            // A paused session stays paused even with nothing left to run
            let remaining = self.record.lock().await.remaining().len();
            if running.is_empty()
                && status == SessionStatus::Running
                && (abort.is_some() || remaining == 0)
            {
                break;
            }

            let mut progressed = false;
            if status == SessionStatus::Running && abort.is_none() {
                let selection = {
                    let record = self.record.lock().await;
                    self.scheduler.select(&self.prd, &record, &running)
                };
                if !selection.skip.is_empty() {
                    let mut record = self.record.lock().await;
                    for (id, reason) in selection.skip {
                        tracing::info!(project = %self.project, task = %id, reason = %reason, "skipping task");
                        record.record_outcome(&id, TaskOutcome::skipped(reason));
                    }
                    progressed = true;
                }
                for id in selection.dispatch {
                    if let Some(failure) = self.dispatch(&id, &mut in_flight).await? {
                        self.task_failed(&id, failure, None, 0, 0.0, &mut abort).await;
                    } else {
                        running.insert(id);
                    }
                    progressed = true;
                }
            }

            if running.is_empty() {
                if progressed {
                    continue;
                }
                if status == SessionStatus::Paused {
                    self.wait_while_paused().await;
                    continue;
                }
                abort = Some("no runnable tasks remain".to_string());
                break;
            }

            if let Some(joined) = in_flight.join_next().await {
                let result = joined?;
                running.remove(&result.task_id);
                self.complete(result, &mut abort).await?;
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            let result = joined?;
            self.complete(result, &mut abort).await?;
        }

        let mut record = self.record.lock().await;
        if !record.status.is_terminal() {
            match abort {
                Some(reason) => {
                    record.status = SessionStatus::Failed;
                    record.last_error = Some(reason);
                }
                None => record.status = SessionStatus::Completed,
            }
            record.finished_at = Some(chrono::Utc::now());
        }
        record.current_task = None;
        record.touch();
        self.store.put_session(&record)?;
        Ok(())
    }

    /// Merge the persisted record, apply pending signals and write ours.
    ///
    /// Returns the status dispatch should follow: a pause still waiting for
    /// in-flight tasks already counts as paused.
    async fn boundary(&self, idle: bool) -> StoreResult<SessionStatus> {
        let mut record = self.record.lock().await;
        let persisted = load_session(&self.store, &self.project, &record.id)?;
        if let Some(persisted) = &persisted {
            if merge_external(&mut record, persisted) && record.status == SessionStatus::Cancelled {
                tracing::info!(project = %self.project, session = %record.short_id(), "session cancelled externally");
                self.cancel.cancel();
            }
        }
        let before = record.status;
        if apply_pending(&mut record, idle) && record.status != before {
            tracing::info!(
                project = %self.project,
                session = %record.short_id(),
                from = %before,
                to = %record.status,
                "applied control signal"
            );
        }
        if persisted.as_ref() != Some(&*record) {
            self.store.put_session(&record)?;
        }
        Ok(effective_status(&record))
    }

    async fn wait_while_paused(&mut self) {
        tokio::select! {
            changed = self.status_rx.changed() => {
                if changed.is_err() {
                    tokio::time::sleep(self.pause_poll).await;
                }
            }
            _ = tokio::time::sleep(self.pause_poll) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    /// Route and spawn one task. Returns a failure message when the task
    /// cannot be routed.
    async fn dispatch(
        &self,
        id: &TaskId,
        in_flight: &mut JoinSet<TaskResult>,
    ) -> Result<Option<String>, RunError> {
        let Some(task) = self.prd.task(id).cloned() else {
            return Ok(Some(format!("task '{}' not found in PRD", id)));
        };

        let options = RouteOptions::for_task(&task, &self.prd.config);
        let decision = match self.router.route(&task, &options) {
            Ok(d) => d,
            Err(RouterError::Store(e)) => return Err(e.into()),
            Err(e) => return Ok(Some(e.to_string())),
        };

        let known = self.store.guardrails(&self.project)?;
        let relevant = guardrails::matching(&known, &decision.signature, MAX_PROMPT_GUARDRAILS);
        let prompt = build_prompt(&task, &relevant);

        let session_id = {
            let mut record = self.record.lock().await;
            record.current_task = Some(id.clone());
            record.touch();
            record.id.clone()
        };
        let prior_attempts = self
            .store
            .attempts(&self.project, Some(&session_id))?
            .iter()
            .filter(|a| a.task_id == *id)
            .map(|a| a.attempt)
            .max()
            .unwrap_or(0);

        tracing::info!(
            project = %self.project,
            task = %id,
            model = %decision.model,
            tier = %decision.tier,
            source = %decision.source,
            guardrails = relevant.len(),
            "dispatching task"
        );

        let executor = self.executor.clone();
        let cancel = self.cancel.child_token();
        let max_attempts = self.prd.config.max_attempts_per_task;
        let task_id = id.clone();
        in_flight.spawn(async move {
            let outcome = executor
                .run_task(CascadeRequest {
                    task: &task,
                    decision: &decision,
                    prompt,
                    session_id: &session_id,
                    max_attempts,
                    prior_attempts,
                    cancel,
                })
                .await;
            TaskResult {
                task_id,
                signature: decision.signature.clone(),
                task,
                outcome,
            }
        });
        Ok(None)
    }

    async fn complete(&self, result: TaskResult, abort: &mut Option<String>) -> Result<(), RunError> {
        let outcome = result.outcome?;
        for attempt in &outcome.attempts {
            self.store.append_attempt(attempt)?;
        }
        // Failed attempts leave lessons even when a later attempt succeeded
        guardrails::record_failures(
            self.store.as_ref(),
            &self.project,
            &result.task,
            &result.signature,
            &outcome.attempts,
        )?;

        {
            let mut record = self.record.lock().await;
            record.add_usage(outcome.tokens_in, outcome.tokens_out, outcome.cost_usd);
            if record.current_task.as_deref() == Some(result.task_id.as_str()) {
                record.current_task = None;
            }
        }

        let attempts = outcome.attempts.len() as u32;
        match outcome.status {
            CascadeStatus::Succeeded => {
                let mut record = self.record.lock().await;
                record.record_outcome(
                    &result.task_id,
                    TaskOutcome {
                        state: TaskState::Completed,
                        model: Some(outcome.final_model.clone()),
                        attempts,
                        cost_usd: outcome.cost_usd,
                        error: None,
                    },
                );
                tracing::info!(project = %self.project, task = %result.task_id, model = %outcome.final_model, attempts, "task completed");
            }
            CascadeStatus::Exhausted => {
                let error = outcome
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "escalation exhausted".to_string());
                self.task_failed(
                    &result.task_id,
                    error,
                    Some(outcome.final_model.clone()),
                    attempts,
                    outcome.cost_usd,
                    abort,
                )
                .await;
            }
            CascadeStatus::Cancelled => {
                tracing::info!(project = %self.project, task = %result.task_id, "task interrupted by cancellation");
            }
        }
        Ok(())
    }

    async fn task_failed(
        &self,
        task_id: &TaskId,
        error: String,
        model: Option<String>,
        attempts: u32,
        cost_usd: f64,
        abort: &mut Option<String>,
    ) {
        tracing::warn!(project = %self.project, task = %task_id, error = %error, "task failed");
        if !self.prd.config.continue_on_failure && abort.is_none() {
            *abort = Some(format!("task '{}' failed: {}", task_id, error));
        }
        let mut record = self.record.lock().await;
        record.record_outcome(
            task_id,
            TaskOutcome {
                state: TaskState::Failed,
                model,
                attempts,
                cost_usd,
                error: Some(error),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::ExecutionPlan;

    fn record() -> SessionRecord {
        SessionRecord::new("proj", "p", vec!["a".into()], ExecutionPlan::single("t"))
    }

    #[test]
    fn test_merge_external_cancel() {
        let mut live = record();
        let mut persisted = live.clone();
        persisted.status = SessionStatus::Cancelled;
        assert!(merge_external(&mut live, &persisted));
        assert_eq!(live.status, SessionStatus::Cancelled);
        assert!(live.finished_at.is_some());
    }

    #[test]
    fn test_merge_external_copies_signals() {
        let mut live = record();
        let mut persisted = live.clone();
        persisted.pending_signal = Some(ControlSignal::Pause);
        persisted.pause_requested = true;
        assert!(merge_external(&mut live, &persisted));
        assert_eq!(live.status, SessionStatus::Running);
        assert_eq!(live.pending_signal, Some(ControlSignal::Pause));
        assert!(!merge_external(&mut live, &persisted));

        // Withdrawn by a resume before the loop applied it
        persisted.pending_signal = None;
        persisted.pause_requested = false;
        assert!(merge_external(&mut live, &persisted));
        assert_eq!(live.pending_signal, None);
        assert!(!live.pause_requested);
    }

    #[test]
    fn test_pause_waits_for_idle_boundary() {
        let mut live = record();
        live.pending_signal = Some(ControlSignal::Pause);

        assert!(!apply_pending(&mut live, false));
        assert_eq!(live.status, SessionStatus::Running);
        assert_eq!(effective_status(&live), SessionStatus::Paused);

        assert!(apply_pending(&mut live, true));
        assert_eq!(live.status, SessionStatus::Paused);
        assert_eq!(live.pending_signal, None);
        assert!(live.pause_requested);

        live.pending_signal = Some(ControlSignal::Resume);
        assert!(apply_pending(&mut live, false));
        assert_eq!(live.status, SessionStatus::Running);
        assert!(!live.pause_requested);
        assert!(!apply_pending(&mut live, true));
    }

    #[test]
    fn test_merge_ignores_terminal_live() {
        let mut live = record();
        live.status = SessionStatus::Completed;
        let mut persisted = live.clone();
        persisted.status = SessionStatus::Cancelled;
        assert!(!merge_external(&mut live, &persisted));
        assert_eq!(live.status, SessionStatus::Completed);
    }
}
