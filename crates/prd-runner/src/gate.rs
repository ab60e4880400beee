//! Command quality gate
//!
//! Runs after every attempt the backend reports as successful. Two kinds of
//! check, each contributing issues to the verdict:
//!
//! - the project-wide gate command (`[gate] command`, e.g. `cargo test`)
//! - each acceptance criterion's `verification` command, through `sh -c`
//!
//! Any non-zero exit fails the gate; the tail of the command's output
//! becomes the issue text.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use cascade_coordination::{GateVerdict, QualityGate, Task};
use tokio_util::sync::CancellationToken;

use crate::config::GateSettings;
use crate::process::{run_captured, split_command, tail_lines, CommandSpec, ProcessError};

/// Lines of output kept per failing check
const ISSUE_TAIL_LINES: usize = 3;

pub struct CommandGate {
    command: Option<Vec<String>>,
    run_verifications: bool,
    timeout: Duration,
    workdir: Option<PathBuf>,
}

impl CommandGate {
    pub fn new(settings: &GateSettings) -> Result<Self, ProcessError> {
        let command = settings.command.as_deref().map(split_command).transpose()?;
        Ok(Self {
            command,
            run_verifications: settings.run_verifications,
            timeout: settings.timeout(),
            workdir: None,
        })
    }

    pub fn with_workdir(mut self, workdir: Option<PathBuf>) -> Self {
        self.workdir = workdir;
        self
    }

    /// Run one check; `None` when it passed
    async fn run_check(&self, label: &str, spec: CommandSpec) -> Option<String> {
        let spec = spec.workdir(self.workdir.clone());
        match run_captured(&spec, self.timeout, &CancellationToken::new()).await {
            Ok(out) if out.success => None,
            Ok(out) => {
                let mut detail = tail_lines(&out.stderr, ISSUE_TAIL_LINES);
                if detail.is_empty() {
                    detail = tail_lines(&out.stdout, ISSUE_TAIL_LINES);
                }
                if detail.is_empty() {
                    Some(format!("{} failed ({})", label, out.exit_label()))
                } else {
                    Some(format!("{} failed ({}): {}", label, out.exit_label(), detail.join(" | ")))
                }
            }
            Err(e) => Some(format!("{} could not run: {}", label, e)),
        }
    }
}

#[async_trait]
impl QualityGate for CommandGate {
    async fn check(&self, task: &Task) -> GateVerdict {
        let mut issues = Vec::new();

        if let Some(argv) = &self.command {
            let spec = CommandSpec::new(argv.clone()).env("CASCADE_TASK_ID", &task.id);
            if let Some(issue) = self.run_check(&format!("`{}`", argv.join(" ")), spec).await {
                issues.push(issue);
            }
        }

        if self.run_verifications {
            for criterion in &task.acceptance_criteria {
                let Some(command) = &criterion.verification else {
                    continue;
                };
                let spec = CommandSpec::new(vec!["sh".into(), "-c".into(), command.clone()])
                    .env("CASCADE_TASK_ID", &task.id);
                let label = format!("criterion '{}'", criterion.description);
                if let Some(issue) = self.run_check(&label, spec).await {
                    issues.push(issue);
                }
            }
        }

        if issues.is_empty() {
            GateVerdict::pass()
        } else {
            tracing::info!(task = %task.id, issues = issues.len(), "quality gate rejected attempt");
            GateVerdict::fail(issues)
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use cascade_coordination::{AcceptanceCriterion, Complexity};

    fn settings(command: Option<&str>) -> GateSettings {
        GateSettings {
            command: command.map(str::to_string),
            timeout_secs: 10,
            run_verifications: true,
        }
    }

    fn task() -> Task {
        let mut task = Task::new("t1", "Endpoint", Complexity::Simple);
        task.acceptance_criteria = vec![
            AcceptanceCriterion::new("compiles").with_verification("true"),
            AcceptanceCriterion::new("documented"),
            AcceptanceCriterion::new("returns 201").with_verification("echo 'got 500' >&2; exit 1"),
        ];
        task
    }

    #[tokio::test]
    async fn test_passing_gate() {
        let gate = CommandGate::new(&settings(Some("true"))).unwrap();
        let verdict = gate.check(&Task::new("t1", "T", Complexity::Simple)).await;
        assert_eq!(verdict, GateVerdict::pass());
    }

    #[tokio::test]
    async fn test_failures_collect_into_one_verdict() {
        let gate = CommandGate::new(&settings(Some("sh -c 'echo \"$CASCADE_TASK_ID: 2 tests failed\"; exit 101'"))).unwrap();
        let verdict = gate.check(&task()).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.issues.len(), 2);
        assert!(verdict.issues[0].ends_with("(exit code 101): t1: 2 tests failed"));
        assert_eq!(
            verdict.issues[1],
            "criterion 'returns 201' failed (exit code 1): got 500"
        );
    }

    #[tokio::test]
    async fn test_verifications_can_be_disabled() {
        let mut settings = settings(None);
        settings.run_verifications = false;
        let gate = CommandGate::new(&settings).unwrap();
        assert!(gate.check(&task()).await.passed);
    }

    #[tokio::test]
    async fn test_unrunnable_gate_is_an_issue() {
        let gate = CommandGate::new(&settings(Some("/no/such/checker"))).unwrap();
        let verdict = gate.check(&Task::new("t1", "T", Complexity::Simple)).await;
        assert!(!verdict.passed);
        assert!(verdict.issues[0].contains("could not run"));
    }
}
