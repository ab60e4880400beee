//! RocksDB-backed project store
//!
//! Column families separate patterns, sessions, attempts and guardrails.
//! Values are bincode-encoded; keys are laid out by [`schema::keys`] so every
//! project occupies a contiguous key range.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::schema::{self, ALL_CFS};
use super::store::{ProjectStore, SharedStore, StoreError, StoreResult};
use super::types::{AttemptRecord, Guardrail, RoutingPattern, SessionRecord};

pub struct RocksStore {
    db: RwLock<DB>,
    path: PathBuf,
    /// Held across read-modify-write upserts
    write_lock: Mutex<()>,
    /// Last sequence number handed out for log keys
    seq: Mutex<u64>,
}

impl RocksStore {
    /// Open or create a store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
            write_lock: Mutex::new(()),
            seq: Mutex::new(0),
        })
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    fn put<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        db.put_cf(&cf, key.as_bytes(), bytes)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        match db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// All values under a key prefix, in key order
    fn scan<T: DeserializeOwned>(&self, cf_name: &str, prefix: &str) -> StoreResult<Vec<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let mut values = Vec::new();
        for item in db.prefix_iterator_cf(&cf, prefix.as_bytes()) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break; // Prefix no longer matches
            }
            values.push(decode(&value)?);
        }
        Ok(values)
    }

    /// Monotonic sequence for log keys; seeded from the wall clock so keys
    /// written after a restart still sort after earlier ones
    fn next_seq(&self) -> StoreResult<u64> {
        let mut seq = self.seq.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = chrono::Utc::now()
            .timestamp_nanos_opt()
            .map(|n| n.max(0) as u64)
            .unwrap_or(0);
        *seq = (*seq + 1).max(now);
        Ok(*seq)
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StoreError::Deserialization(e.to_string()))
}

impl ProjectStore for RocksStore {
    fn upsert_pattern(
        &self,
        project: &str,
        signature: &str,
        model: &str,
        success: bool,
        cost: f64,
    ) -> StoreResult<RoutingPattern> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        let key = schema::keys::pattern(project, signature, model);

        let mut pattern = self
            .get::<RoutingPattern>(schema::CF_PATTERNS, &key)?
            .unwrap_or_else(|| RoutingPattern::new(project, signature, model));
        pattern.apply(success, cost);
        self.put(schema::CF_PATTERNS, &key, &pattern)?;
        Ok(pattern)
    }

    fn patterns_for(&self, project: &str, signature: &str) -> StoreResult<Vec<RoutingPattern>> {
        self.scan(
            schema::CF_PATTERNS,
            &schema::keys::pattern_prefix(project, signature),
        )
    }

    fn all_patterns(&self, project: &str) -> StoreResult<Vec<RoutingPattern>> {
        self.scan(schema::CF_PATTERNS, &schema::keys::project(project))
    }

    fn put_session(&self, session: &SessionRecord) -> StoreResult<()> {
        let key = schema::keys::session(&session.project, &session.id);
        self.put(schema::CF_SESSIONS, &key, session)
    }

    fn list_sessions(&self, project: &str) -> StoreResult<Vec<SessionRecord>> {
        let mut sessions: Vec<SessionRecord> =
            self.scan(schema::CF_SESSIONS, &schema::keys::project(project))?;
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions)
    }

    fn append_attempt(&self, attempt: &AttemptRecord) -> StoreResult<()> {
        let key = schema::keys::attempt(&attempt.project, self.next_seq()?);
        self.put(schema::CF_ATTEMPTS, &key, attempt)
    }

    fn attempts(&self, project: &str, session_id: Option<&str>) -> StoreResult<Vec<AttemptRecord>> {
        let all: Vec<AttemptRecord> =
            self.scan(schema::CF_ATTEMPTS, &schema::keys::project(project))?;
        Ok(match session_id {
            Some(id) => all.into_iter().filter(|a| a.session_id == id).collect(),
            None => all,
        })
    }

    fn append_guardrail(&self, guardrail: &Guardrail) -> StoreResult<()> {
        let key = schema::keys::guardrail(&guardrail.project, self.next_seq()?);
        self.put(schema::CF_GUARDRAILS, &key, guardrail)
    }

    fn guardrails(&self, project: &str) -> StoreResult<Vec<Guardrail>> {
        self.scan(schema::CF_GUARDRAILS, &schema::keys::project(project))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::FailureCategory;
    use crate::router::ExecutionPlan;
    use crate::state::types::{ControlSignal, SessionStatus};
    use chrono::Utc;
    use tempfile::tempdir;

    #[test]
    fn test_open_store() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_pattern_upsert_and_scan() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        store.upsert_pattern("proj", "sig", "a", true, 0.1).unwrap();
        store.upsert_pattern("proj", "sig", "a", true, 0.3).unwrap();
        store.upsert_pattern("proj", "sig", "b", false, 0.5).unwrap();
        store.upsert_pattern("proj2", "sig", "a", false, 0.5).unwrap();

        let patterns = store.patterns_for("proj", "sig").unwrap();
        assert_eq!(patterns.len(), 2);
        let a = patterns.iter().find(|p| p.model == "a").unwrap();
        assert_eq!(a.success_count, 2);
        assert!((a.avg_cost - 0.2).abs() < 1e-9);
        assert_eq!(store.all_patterns("proj2").unwrap().len(), 1);
    }

    #[test]
    fn test_session_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let mut session = SessionRecord::new(
            "proj",
            "demo",
            vec!["t1".to_string()],
            ExecutionPlan::single("x"),
        );
        session.pending_signal = Some(ControlSignal::Resume);
        session.status = SessionStatus::Paused;
        store.put_session(&session).unwrap();

        let loaded = store.get_session("proj").unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_logs_keep_append_order() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        for n in 1..=3 {
            store
                .append_guardrail(&Guardrail {
                    id: format!("g{}", n),
                    project: "proj".to_string(),
                    task_id: "t".to_string(),
                    signature: "sig".to_string(),
                    tags: vec!["api".to_string()],
                    category: FailureCategory::Validation,
                    problem: format!("problem {}", n),
                    fix: "fix".to_string(),
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        let ids: Vec<String> = store
            .guardrails("proj")
            .unwrap()
            .into_iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(ids, vec!["g1", "g2", "g3"]);
    }
}
