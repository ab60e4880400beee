//! Detached sessions
//!
//! `run --detach` re-executes this binary as `supervise` in its own process
//! group with output going to a log file, writes a pid file, and returns.
//! The supervisor runs the session as a foreground `run` child. When that
//! child dies while the persisted session is still unfinished, it is
//! restarted with `--recover`, which adopts the orphaned session and
//! continues from the first incomplete task.
//!
//! Files live beside the store:
//!
//! ```text
//! <store>/.runner/<project>.log
//! <store>/.runner/<project>.pid.json
//! ```

use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use cascade_coordination::orchestrator::effective_status;
use cascade_coordination::state::schema::sanitize_project;
use cascade_coordination::{SessionRecord, SessionStatus, SharedStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SupervisorSettings;

/// Where a project's detached-run files go
#[derive(Debug, Clone)]
pub struct RunFiles {
    dir: PathBuf,
    stem: String,
}

impl RunFiles {
    pub fn new(store_root: &Path, project: &str) -> Self {
        Self {
            dir: store_root.join(".runner"),
            stem: sanitize_project(project),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.stem))
    }

    pub fn pid_path(&self) -> PathBuf {
        self.dir.join(format!("{}.pid.json", self.stem))
    }

    pub fn read_info(&self) -> Option<SupervisorInfo> {
        let text = std::fs::read_to_string(self.pid_path()).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn write_info(&self, info: &SupervisorInfo) -> Result<()> {
        let text = serde_json::to_string_pretty(info)?;
        std::fs::write(self.pid_path(), text)
            .with_context(|| format!("failed to write {}", self.pid_path().display()))
    }
}

/// Written when a detached supervisor is launched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorInfo {
    pub pid: u32,
    pub project: String,
    pub prd: PathBuf,
    pub log: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// Launch `exe supervise ...` detached from this terminal
pub fn spawn_detached(
    exe: &Path,
    args: Vec<OsString>,
    files: &RunFiles,
    project: &str,
    prd: &Path,
) -> Result<SupervisorInfo> {
    std::fs::create_dir_all(&files.dir)
        .with_context(|| format!("failed to create {}", files.dir.display()))?;
    let log = File::options()
        .create(true)
        .append(true)
        .open(files.log_path())
        .with_context(|| format!("failed to open {}", files.log_path().display()))?;
    let log_err = log.try_clone()?;

    let mut cmd = std::process::Command::new(exe);
    cmd.args(args)
        .stdin(std::process::Stdio::null())
        .stdout(log)
        .stderr(log_err);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let child = cmd
        .spawn()
        .with_context(|| format!("failed to launch supervisor {}", exe.display()))?;

    let info = SupervisorInfo {
        pid: child.id(),
        project: project.to_string(),
        prd: prd.to_path_buf(),
        log: files.log_path(),
        started_at: Utc::now(),
    };
    files.write_info(&info)?;
    tracing::info!(project, pid = info.pid, log = %info.log.display(), "detached supervisor launched");
    Ok(info)
}

// ============================================================================
// Supervision
// ============================================================================

/// What the supervisor does after a child exits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// The session reached a terminal state
    Finished(SessionStatus),
    Restart,
    /// Restart budget spent with the session still unfinished
    GiveUp,
    /// The child exited without creating or adopting a session
    NeverStarted,
}

/// Decide from the persisted session after a child exit.
///
/// `before` is the latest session id seen before the first launch; a
/// non-recovering supervisor that still sees it never got a session going.
pub fn next_step(
    session: Option<&SessionRecord>,
    before: Option<&str>,
    recovering: bool,
    restarts: u32,
    policy: &SupervisorSettings,
) -> NextStep {
    let Some(session) = session else {
        return NextStep::NeverStarted;
    };
    if !recovering && before == Some(session.id.as_str()) {
        return NextStep::NeverStarted;
    }
    let status = effective_status(session);
    if status.is_terminal() {
        NextStep::Finished(status)
    } else if restarts < policy.max_restarts {
        NextStep::Restart
    } else {
        NextStep::GiveUp
    }
}

/// Supervise one detached session until it finishes or restarts run out.
///
/// `child_args` builds the foreground `run` invocation; its flag says
/// whether the child should recover instead of start.
pub async fn supervise(
    exe: &Path,
    child_args: impl Fn(bool) -> Vec<OsString>,
    store: SharedStore,
    project: &str,
    recover: bool,
    policy: &SupervisorSettings,
) -> Result<NextStep> {
    let before = store.get_session(project)?.map(|s| s.id);
    let mut restarts = 0u32;

    loop {
        let recovering = recover || restarts > 0;
        tracing::info!(project, recovering, restarts, "supervisor launching session process");
        let status = tokio::process::Command::new(exe)
            .args(child_args(recovering))
            .status()
            .await
            .with_context(|| format!("failed to run {}", exe.display()))?;

        let session = store.get_session(project)?;
        let step = next_step(session.as_ref(), before.as_deref(), recovering, restarts, policy);
        match &step {
            NextStep::Finished(final_status) => {
                tracing::info!(project, status = %final_status, exit = ?status.code(), "supervised session finished");
                return Ok(step);
            }
            NextStep::NeverStarted => {
                tracing::error!(project, exit = ?status.code(), "session process exited before a session was running");
                return Ok(step);
            }
            NextStep::GiveUp => {
                tracing::error!(
                    project,
                    restarts,
                    "session still unfinished after restart limit; cancel it or run with --recover"
                );
                return Ok(step);
            }
            NextStep::Restart => {
                restarts += 1;
                tracing::warn!(project, exit = ?status.code(), restarts, "session process died, restarting");
                tokio::time::sleep(Duration::from_secs(policy.restart_delay_secs)).await;
            }
        }
    }
}
