//! JSON-file project store
//!
//! One directory per project under the store root:
//!
//! ```text
//! <root>/<project>/patterns.json      all routing patterns
//! <root>/<project>/sessions/<id>.json one file per session
//! <root>/<project>/attempts.jsonl     append-only attempt log
//! <root>/<project>/guardrails.jsonl   append-only guardrails
//! ```
//!
//! Whole-file writes go through a temp file in the same directory and an
//! atomic rename, so a reader in another process never sees a torn record.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{de::DeserializeOwned, Serialize};

use super::schema::{self, CF_ATTEMPTS, CF_GUARDRAILS, CF_PATTERNS, CF_SESSIONS};
use super::store::{ProjectStore, SharedStore, StoreError, StoreResult};
use super::types::{AttemptRecord, Guardrail, RoutingPattern, SessionRecord};

/// Durable store readable by every process pointed at the same root
pub struct FileStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(schema::sanitize_project(project))
    }

    fn patterns_path(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(format!("{}.json", CF_PATTERNS))
    }

    fn sessions_dir(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(CF_SESSIONS)
    }

    fn log_path(&self, project: &str, family: &str) -> PathBuf {
        self.project_dir(project).join(format!("{}.jsonl", family))
    }

    fn read_patterns(&self, project: &str) -> StoreResult<Vec<RoutingPattern>> {
        Ok(read_json(&self.patterns_path(project))?.unwrap_or_default())
    }

    fn read_log<T: DeserializeOwned>(&self, project: &str, family: &str) -> StoreResult<Vec<T>> {
        let path = self.log_path(project, family);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line)
                .map_err(|e| StoreError::Deserialization(format!("{}: {}", path.display(), e)))?;
            records.push(record);
        }
        Ok(records)
    }

    fn append_log<T: Serialize>(&self, project: &str, family: &str, record: &T) -> StoreResult<()> {
        let mut line =
            serde_json::to_string(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        line.push('\n');

        let _guard = self.lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        fs::create_dir_all(self.project_dir(project))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(project, family))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// Read and parse a JSON file; `None` when it does not exist
fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| StoreError::Deserialization(format!("{}: {}", path.display(), e)))
}

/// Replace `path` atomically with the JSON form of `value`
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Unavailable(format!("no parent for {}", path.display())))?;
    fs::create_dir_all(dir)?;

    let json =
        serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

impl ProjectStore for FileStore {
    fn upsert_pattern(
        &self,
        project: &str,
        signature: &str,
        model: &str,
        success: bool,
        cost: f64,
    ) -> StoreResult<RoutingPattern> {
        let _guard = self.lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut patterns = self.read_patterns(project)?;

        let pos = match patterns
            .iter()
            .position(|p| p.signature == signature && p.model == model)
        {
            Some(pos) => pos,
            None => {
                patterns.push(RoutingPattern::new(project, signature, model));
                patterns.len() - 1
            }
        };
        patterns[pos].apply(success, cost);
        let updated = patterns[pos].clone();

        write_json_atomic(&self.patterns_path(project), &patterns)?;
        Ok(updated)
    }

    fn patterns_for(&self, project: &str, signature: &str) -> StoreResult<Vec<RoutingPattern>> {
        Ok(self
            .read_patterns(project)?
            .into_iter()
            .filter(|p| p.signature == signature)
            .collect())
    }

    fn all_patterns(&self, project: &str) -> StoreResult<Vec<RoutingPattern>> {
        self.read_patterns(project)
    }

    fn put_session(&self, session: &SessionRecord) -> StoreResult<()> {
        let _guard = self.lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        let path = self
            .sessions_dir(&session.project)
            .join(format!("{}.json", session.id));
        write_json_atomic(&path, session)
    }

    fn list_sessions(&self, project: &str) -> StoreResult<Vec<SessionRecord>> {
        let dir = self.sessions_dir(project);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(session) = read_json::<SessionRecord>(&path)? {
                sessions.push(session);
            }
        }
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions)
    }

    fn append_attempt(&self, attempt: &AttemptRecord) -> StoreResult<()> {
        self.append_log(&attempt.project, CF_ATTEMPTS, attempt)
    }

    fn attempts(&self, project: &str, session_id: Option<&str>) -> StoreResult<Vec<AttemptRecord>> {
        let all: Vec<AttemptRecord> = self.read_log(project, CF_ATTEMPTS)?;
        Ok(match session_id {
            Some(id) => all.into_iter().filter(|a| a.session_id == id).collect(),
            None => all,
        })
    }

    fn append_guardrail(&self, guardrail: &Guardrail) -> StoreResult<()> {
        self.append_log(&guardrail.project, CF_GUARDRAILS, guardrail)
    }

    fn guardrails(&self, project: &str) -> StoreResult<Vec<Guardrail>> {
        self.read_log(project, CF_GUARDRAILS)
    }
}
