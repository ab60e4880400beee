//! Orchestrator registry: explicit handle table, one live session per project
//!
//! Owned by the caller (the runner binary, or a test); never global. Control
//! calls for a project with no in-process handle fall back to the persisted
//! session, so another process can pause, resume or cancel a detached run.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{ExecutionBackend, QualityGate};
use crate::config::CoordinationConfig;
use crate::cost::{AggregateCostEstimate, CostEstimator};
use crate::escalation::CascadeExecutor;
use crate::history::{HistoryStore, RoutingStats};
use crate::orchestrator::run_loop::SessionRun;
use crate::orchestrator::scheduler::Scheduler;
use crate::orchestrator::session::{
    apply_action, effective_status, queue_signal, ControlAction, ControlError,
};
use crate::prd::{DependencyResolver, Prd};
use crate::registry::ModelRegistry;
use crate::router::{HistoryRouter, RoutingPlan};
use crate::state::{SessionRecord, SessionStatus, SharedStore};

struct SessionHandle {
    record: Arc<Mutex<SessionRecord>>,
    status_tx: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl SessionHandle {
    async fn is_live(&self) -> bool {
        !self.record.lock().await.status.is_terminal()
    }
}

/// Per-project engine components, built on demand
struct ProjectServices {
    history: Arc<HistoryStore>,
    router: Arc<HistoryRouter>,
}

pub struct OrchestratorRegistry {
    store: SharedStore,
    models: Arc<ModelRegistry>,
    backend: Arc<dyn ExecutionBackend>,
    gate: Option<Arc<dyn QualityGate>>,
    config: CoordinationConfig,
    handles: Mutex<HashMap<String, SessionHandle>>,
}

impl OrchestratorRegistry {
    pub fn new(
        store: SharedStore,
        models: Arc<ModelRegistry>,
        backend: Arc<dyn ExecutionBackend>,
        config: CoordinationConfig,
    ) -> Self {
        Self {
            store,
            models,
            backend,
            gate: None,
            config,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn QualityGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    fn services(&self, project: &str) -> ProjectServices {
        let history = Arc::new(HistoryStore::new(self.store.clone(), project));
        let router = Arc::new(
            HistoryRouter::new(self.models.clone(), history.clone())
                .with_config(self.config.router_config()),
        );
        ProjectServices { history, router }
    }

    fn executor(&self, history: Arc<HistoryStore>) -> Arc<CascadeExecutor> {
        let mut executor = CascadeExecutor::new(self.backend.clone(), history, self.models.clone())
            .with_policy(self.config.cascade.clone());
        if let Some(gate) = &self.gate {
            executor = executor.with_gate(gate.clone());
        }
        Arc::new(executor)
    }

    /// Reject when a non-terminal session exists in-process or in the store
    async fn ensure_no_active(
        &self,
        handles: &HashMap<String, SessionHandle>,
        project: &str,
    ) -> Result<(), ControlError> {
        if let Some(handle) = handles.get(project) {
            let record = handle.record.lock().await;
            if !record.status.is_terminal() {
                return Err(ControlError::AlreadyActive {
                    session_id: record.id.clone(),
                });
            }
        }
        if let Some(persisted) = self.store.get_session(project)? {
            if !effective_status(&persisted).is_terminal() {
                return Err(ControlError::AlreadyActive {
                    session_id: persisted.id,
                });
            }
        }
        Ok(())
    }

    /// Validate `prd`, create a session and start running it
    pub async fn start(&self, project: &str, prd: Prd) -> Result<SessionRecord, ControlError> {
        let mut handles = self.handles.lock().await;
        self.ensure_no_active(&handles, project).await?;

        let order = DependencyResolver::resolve_prd(&prd)?;
        let services = self.services(project);
        let plan = services.router.plan(&prd)?;

        let record = SessionRecord::new(project, prd.name.clone(), order, plan.execution_plan.clone());
        self.store.put_session(&record)?;
        tracing::info!(
            project,
            session = %record.short_id(),
            tasks = record.total_tasks,
            mode = %plan.execution_plan.mode,
            agents = plan.execution_plan.suggested_agents,
            "session started"
        );

        let handle = self.spawn(project, prd, record.clone(), services);
        handles.insert(project.to_string(), handle);
        Ok(record)
    }

    /// Adopt a persisted non-terminal session with no live owner and
    /// continue it from the first incomplete task
    pub async fn recover(&self, project: &str, prd: Prd) -> Result<SessionRecord, ControlError> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(project) {
            if handle.is_live().await {
                let session_id = handle.record.lock().await.id.clone();
                return Err(ControlError::AlreadyActive { session_id });
            }
        }

        let record = self
            .store
            .get_session(project)?
            .filter(|s| !s.status.is_terminal())
            .ok_or_else(|| ControlError::NotRecoverable {
                project: project.to_string(),
            })?;

        let order = DependencyResolver::resolve_prd(&prd)?;
        let expected: BTreeSet<&str> = record.execution_order.iter().map(String::as_str).collect();
        let actual: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        if expected != actual {
            return Err(ControlError::PrdMismatch {
                session_id: record.id.clone(),
                reason: format!(
                    "missing from PRD: [{}], not in session: [{}]",
                    expected.difference(&actual).copied().collect::<Vec<_>>().join(", "),
                    actual.difference(&expected).copied().collect::<Vec<_>>().join(", ")
                ),
            });
        }

        tracing::info!(
            project,
            session = %record.short_id(),
            remaining = record.remaining().len(),
            status = %record.status,
            "recovering session"
        );
        let services = self.services(project);
        let handle = self.spawn(project, prd, record.clone(), services);
        handles.insert(project.to_string(), handle);
        Ok(record)
    }

    fn spawn(
        &self,
        project: &str,
        prd: Prd,
        record: SessionRecord,
        services: ProjectServices,
    ) -> SessionHandle {
        let (status_tx, status_rx) = watch::channel(record.status);
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::for_plan(&record.plan);
        let record = Arc::new(Mutex::new(record));
        let run = SessionRun {
            project: project.to_string(),
            store: self.store.clone(),
            router: services.router,
            executor: self.executor(services.history),
            prd: Arc::new(prd),
            record: record.clone(),
            status_rx,
            cancel: cancel.clone(),
            scheduler,
            pause_poll: self.config.scheduler.pause_poll(),
        };
        let join = tokio::spawn(run.run());
        SessionHandle {
            record,
            status_tx,
            cancel,
            join: Some(join),
        }
    }

    pub async fn pause(&self, project: &str) -> Result<SessionRecord, ControlError> {
        self.control(project, ControlAction::Pause).await
    }

    pub async fn resume(&self, project: &str) -> Result<SessionRecord, ControlError> {
        self.control(project, ControlAction::Resume).await
    }

    pub async fn cancel(&self, project: &str) -> Result<SessionRecord, ControlError> {
        self.control(project, ControlAction::Cancel).await
    }

    async fn control(
        &self,
        project: &str,
        action: ControlAction,
    ) -> Result<SessionRecord, ControlError> {
        let handles = self.handles.lock().await;
        if let Some(handle) = handles.get(project) {
            let mut record = handle.record.lock().await;
            if !record.status.is_terminal() {
                let mut next = record.clone();
                // A paused session resumes at once; pauses wait for the loop
                if action == ControlAction::Resume && next.status == SessionStatus::Paused {
                    apply_action(&mut next, action)?;
                } else {
                    queue_signal(&mut next, action)?;
                }
                self.store.put_session(&next)?;
                *record = next;
                handle.status_tx.send_replace(record.status);
                if action == ControlAction::Cancel {
                    handle.cancel.cancel();
                }
                tracing::info!(project, session = %record.short_id(), action = %action, "session control applied");
                return Ok(record.clone());
            }
        }
        drop(handles);
        self.control_persisted(project, action)
    }

    /// Control a session owned by another process (or by nobody)
    fn control_persisted(
        &self,
        project: &str,
        action: ControlAction,
    ) -> Result<SessionRecord, ControlError> {
        let mut record = self
            .store
            .get_session(project)?
            .ok_or_else(|| ControlError::NoSession {
                project: project.to_string(),
            })?;
        queue_signal(&mut record, action)?;
        self.store.put_session(&record)?;
        tracing::info!(project, session = %record.short_id(), action = %action, "persisted session control written");
        Ok(record)
    }

    /// Live record when this process owns an active session, else the latest
    /// persisted one
    pub async fn get_status(&self, project: &str) -> Result<Option<SessionRecord>, ControlError> {
        let handles = self.handles.lock().await;
        if let Some(handle) = handles.get(project) {
            let record = handle.record.lock().await;
            if !record.status.is_terminal() {
                return Ok(Some(record.clone()));
            }
        }
        drop(handles);
        Ok(self.store.get_session(project)?)
    }

    /// Wait for this process's run loop for `project` to exit
    pub async fn wait(&self, project: &str) -> Option<SessionRecord> {
        let (join, record) = {
            let mut handles = self.handles.lock().await;
            let handle = handles.get_mut(project)?;
            (handle.join.take(), handle.record.clone())
        };
        if let Some(join) = join {
            if let Err(e) = join.await {
                tracing::error!(project, error = %e, "session loop panicked");
            }
        }
        let record = record.lock().await.clone();
        Some(record)
    }

    /// Projects with an in-process handle
    pub async fn projects(&self) -> Vec<String> {
        let mut projects: Vec<String> = self.handles.lock().await.keys().cloned().collect();
        projects.sort();
        projects
    }

    pub fn get_routing_plan(&self, project: &str, prd: &Prd) -> Result<RoutingPlan, ControlError> {
        Ok(self.services(project).router.plan(prd)?)
    }

    pub fn get_cost_estimate(
        &self,
        project: &str,
        prd: &Prd,
    ) -> Result<AggregateCostEstimate, ControlError> {
        let services = self.services(project);
        let plan = services.router.plan(prd)?;
        let estimator = CostEstimator::new(self.models.clone(), services.history)
            .with_config(self.config.cost.clone());
        Ok(estimator.estimate_plan(&prd.tasks, &plan)?)
    }

    pub fn get_routing_stats(&self, project: &str) -> Result<RoutingStats, ControlError> {
        Ok(self.services(project).history.routing_stats()?)
    }
}
