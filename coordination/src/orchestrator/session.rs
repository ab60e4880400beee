//! Session state machine and control errors
//!
//! ```text
//! idle ──► running ──► completed | failed | cancelled
//!             ▲  │
//!      resume │  │ pause
//!             │  ▼
//!            paused ──► cancelled
//! ```
//!
//! Terminal states have no exits.

use serde::{Deserialize, Serialize};

use crate::prd::ValidationError;
use crate::router::RouterError;
use crate::state::{ControlSignal, SessionRecord, SessionStatus, StoreError};

/// Control operations exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start,
    Pause,
    Resume,
    Cancel,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
        }
    }

    /// Status the action moves a session into
    pub fn target(&self) -> SessionStatus {
        match self {
            Self::Start | Self::Resume => SessionStatus::Running,
            Self::Pause => SessionStatus::Paused,
            Self::Cancel => SessionStatus::Cancelled,
        }
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from control operations; none of them mutate state
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Active session already exists: {session_id}")]
    AlreadyActive { session_id: String },

    #[error("No session found for project {project}")]
    NoSession { project: String },

    #[error("Session is {from}, cannot {action}")]
    InvalidTransition {
        from: SessionStatus,
        action: ControlAction,
    },

    #[error("No recoverable session for project {project}")]
    NotRecoverable { project: String },

    #[error("PRD does not match session {session_id}: {reason}")]
    PrdMismatch { session_id: String, reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Whether `from -> to` is an edge of the state machine
pub fn can_transition(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::*;
    matches!(
        (from, to),
        (Idle, Running)
            | (Running, Paused)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
            | (Paused, Running)
            | (Paused, Cancelled)
    )
}

/// Check that `action` is allowed from `from`
pub fn check_action(from: SessionStatus, action: ControlAction) -> Result<(), ControlError> {
    if can_transition(from, action.target()) {
        Ok(())
    } else {
        Err(ControlError::InvalidTransition { from, action })
    }
}

/// Apply a control action to a record in place
pub fn apply_action(record: &mut SessionRecord, action: ControlAction) -> Result<(), ControlError> {
    check_action(effective_status(record), action)?;
    record.status = action.target();
    record.pending_signal = None;
    record.pause_requested = action == ControlAction::Pause;
    if record.status.is_terminal() {
        record.finished_at = Some(chrono::Utc::now());
        record.current_task = None;
    }
    record.touch();
    Ok(())
}

/// Record a pause or resume request without changing the status.
///
/// The run loop applies the signal at its next task boundary; a pause waits
/// there until no task is in flight. A resume while a pause is still pending
/// withdraws the pause.
pub fn queue_signal(record: &mut SessionRecord, action: ControlAction) -> Result<(), ControlError> {
    check_action(effective_status(record), action)?;
    let signal = match action {
        ControlAction::Pause => ControlSignal::Pause,
        ControlAction::Resume => ControlSignal::Resume,
        ControlAction::Start | ControlAction::Cancel => return apply_action(record, action),
    };
    record.pending_signal = (record.status != action.target()).then_some(signal);
    record.pause_requested = action == ControlAction::Pause;
    record.touch();
    Ok(())
}

/// Status with any unconsumed control signal applied
pub fn effective_status(record: &SessionRecord) -> SessionStatus {
    match (record.status, record.pending_signal) {
        (SessionStatus::Running, Some(ControlSignal::Pause)) => SessionStatus::Paused,
        (SessionStatus::Paused, Some(ControlSignal::Resume)) => SessionStatus::Running,
        (status, _) => status,
    }
}

/// Success flag plus either the session or an error message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub error: Option<String>,
    pub session: Option<SessionRecord>,
}

impl ControlResponse {
    pub fn ok(session: Option<SessionRecord>) -> Self {
        Self {
            success: true,
            error: None,
            session,
        }
    }

    pub fn err(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            session: None,
        }
    }
}

impl From<Result<SessionRecord, ControlError>> for ControlResponse {
    fn from(result: Result<SessionRecord, ControlError>) -> Self {
        match result {
            Ok(record) => Self::ok(Some(record)),
            Err(e) => Self::err(e),
        }
    }
}
