//! JSON reports printed by the CLI

use cascade_coordination::state::ControlSignal;
use cascade_coordination::{ControlResponse, SessionRecord, SessionStatus};
use serde::Serialize;

use crate::detach::SupervisorInfo;

/// `status` output
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub project: String,
    pub status: Option<SessionStatus>,
    /// Control request the session loop has not applied yet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<ControlSignal>,
    pub progress: Option<f64>,
    pub session: Option<SessionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supervisor: Option<SupervisorInfo>,
}

impl StatusReport {
    pub fn new(project: &str, session: Option<SessionRecord>, supervisor: Option<SupervisorInfo>) -> Self {
        Self {
            project: project.to_string(),
            status: session.as_ref().map(|s| s.status),
            pending: session.as_ref().and_then(|s| s.pending_signal),
            progress: session.as_ref().map(SessionRecord::progress),
            session,
            supervisor,
        }
    }
}

/// `run --detach` output
#[derive(Debug, Serialize)]
pub struct DetachReport {
    pub success: bool,
    pub supervisor: SupervisorInfo,
}

/// Pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a control response; true when it succeeded
pub fn print_control(response: &ControlResponse) -> anyhow::Result<bool> {
    print_json(response)?;
    Ok(response.success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_coordination::ExecutionPlan;

    #[test]
    fn test_status_report_shows_pending_pause() {
        let mut record = SessionRecord::new("shop", "prd", vec!["a".into(), "b".into()], ExecutionPlan::single("x"));
        record.status = SessionStatus::Running;
        record.pending_signal = Some(ControlSignal::Pause);

        let report = StatusReport::new("shop", Some(record), None);
        assert_eq!(report.status, Some(SessionStatus::Running));
        assert_eq!(report.progress, Some(0.0));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["pending"], "pause");
        assert!(json.get("supervisor").is_none());
    }

    #[test]
    fn test_empty_status_report() {
        let report = StatusReport::new("shop", None, None);
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["session"].is_null());
        assert!(json["status"].is_null());
    }
}
