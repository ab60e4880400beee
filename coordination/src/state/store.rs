//! Project store trait and the in-memory backend
//!
//! All persistence goes through [`ProjectStore`]. Implementations perform
//! read-modify-write upserts under their own lock, so a single store may be
//! shared by every orchestrator in the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::types::{AttemptRecord, Guardrail, RoutingPattern, SessionRecord};

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "heavy-state")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a store
pub type SharedStore = Arc<dyn ProjectStore>;

/// Durable per-project state
pub trait ProjectStore: Send + Sync {
    /// Fold one outcome into the (signature, model) pattern, creating it if absent
    fn upsert_pattern(
        &self,
        project: &str,
        signature: &str,
        model: &str,
        success: bool,
        cost: f64,
    ) -> StoreResult<RoutingPattern>;

    /// Every model's pattern for one signature
    fn patterns_for(&self, project: &str, signature: &str) -> StoreResult<Vec<RoutingPattern>>;

    fn all_patterns(&self, project: &str) -> StoreResult<Vec<RoutingPattern>>;

    /// Insert or replace a session record (keyed by session id)
    fn put_session(&self, session: &SessionRecord) -> StoreResult<()>;

    /// Most recently started session of a project
    fn get_session(&self, project: &str) -> StoreResult<Option<SessionRecord>> {
        Ok(self
            .list_sessions(project)?
            .into_iter()
            .max_by(|a, b| a.started_at.cmp(&b.started_at)))
    }

    /// All sessions of a project, newest first
    fn list_sessions(&self, project: &str) -> StoreResult<Vec<SessionRecord>>;

    fn append_attempt(&self, attempt: &AttemptRecord) -> StoreResult<()>;

    /// Attempt log in append order, optionally restricted to one session
    fn attempts(&self, project: &str, session_id: Option<&str>) -> StoreResult<Vec<AttemptRecord>>;

    fn append_guardrail(&self, guardrail: &Guardrail) -> StoreResult<()>;

    /// Guardrails in append order
    fn guardrails(&self, project: &str) -> StoreResult<Vec<Guardrail>>;
}

#[derive(Default)]
struct ProjectData {
    /// Keyed by (signature, model)
    patterns: HashMap<(String, String), RoutingPattern>,
    /// Insertion order of pattern keys
    pattern_order: Vec<(String, String)>,
    sessions: Vec<SessionRecord>,
    attempts: Vec<AttemptRecord>,
    guardrails: Vec<Guardrail>,
}

/// Volatile store for tests and one-shot runs
#[derive(Default)]
pub struct MemoryStore {
    projects: Mutex<HashMap<String, ProjectData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    fn with_project<T>(
        &self,
        project: &str,
        f: impl FnOnce(&mut ProjectData) -> T,
    ) -> StoreResult<T> {
        let mut projects = self.projects.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(f(projects.entry(project.to_string()).or_default()))
    }
}

impl ProjectStore for MemoryStore {
    fn upsert_pattern(
        &self,
        project: &str,
        signature: &str,
        model: &str,
        success: bool,
        cost: f64,
    ) -> StoreResult<RoutingPattern> {
        self.with_project(project, |data| {
            let key = (signature.to_string(), model.to_string());
            if !data.patterns.contains_key(&key) {
                data.pattern_order.push(key.clone());
            }
            let pattern = data
                .patterns
                .entry(key)
                .or_insert_with(|| RoutingPattern::new(project, signature, model));
            pattern.apply(success, cost);
            pattern.clone()
        })
    }

    fn patterns_for(&self, project: &str, signature: &str) -> StoreResult<Vec<RoutingPattern>> {
        self.with_project(project, |data| {
            data.pattern_order
                .iter()
                .filter(|(sig, _)| sig == signature)
                .filter_map(|key| data.patterns.get(key).cloned())
                .collect()
        })
    }

    fn all_patterns(&self, project: &str) -> StoreResult<Vec<RoutingPattern>> {
        self.with_project(project, |data| {
            data.pattern_order
                .iter()
                .filter_map(|key| data.patterns.get(key).cloned())
                .collect()
        })
    }

    fn put_session(&self, session: &SessionRecord) -> StoreResult<()> {
        self.with_project(&session.project, |data| {
            match data.sessions.iter_mut().find(|s| s.id == session.id) {
                Some(existing) => *existing = session.clone(),
                None => data.sessions.push(session.clone()),
            }
        })
    }

    fn list_sessions(&self, project: &str) -> StoreResult<Vec<SessionRecord>> {
        self.with_project(project, |data| {
            let mut sessions = data.sessions.clone();
            sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            sessions
        })
    }

    fn append_attempt(&self, attempt: &AttemptRecord) -> StoreResult<()> {
        self.with_project(&attempt.project, |data| data.attempts.push(attempt.clone()))
    }

    fn attempts(&self, project: &str, session_id: Option<&str>) -> StoreResult<Vec<AttemptRecord>> {
        self.with_project(project, |data| {
            data.attempts
                .iter()
                .filter(|a| session_id.map_or(true, |id| a.session_id == id))
                .cloned()
                .collect()
        })
    }

    fn append_guardrail(&self, guardrail: &Guardrail) -> StoreResult<()> {
        self.with_project(&guardrail.project, |data| {
            data.guardrails.push(guardrail.clone())
        })
    }

    fn guardrails(&self, project: &str) -> StoreResult<Vec<Guardrail>> {
        self.with_project(project, |data| data.guardrails.clone())
    }
}
