//! Subprocess execution backend
//!
//! Each attempt runs the configured command once. The prompt is written to
//! stdin; the model, task id and attempt number arrive as `CASCADE_MODEL`,
//! `CASCADE_TASK_ID` and `CASCADE_ATTEMPT`, and any `{model}` in the command
//! line is replaced with the model id.
//!
//! The command reports back with a JSON line on stdout matching
//! [`BackendOutcome`] (`{"success": true, "tokens_in": 1200, ...}`); the last
//! such line wins. Without one, the exit status decides and the tail of
//! stderr becomes the failure message, which the cascade then classifies.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use cascade_coordination::{BackendError, BackendOutcome, BackendRequest, ExecutionBackend};

use crate::process::{run_captured, split_command, tail_lines, Captured, CommandSpec, ProcessError};

pub struct CommandBackend {
    argv: Vec<String>,
    timeout: Duration,
    workdir: Option<PathBuf>,
}

impl CommandBackend {
    pub fn new(command: &str, timeout: Duration) -> Result<Self, ProcessError> {
        Ok(Self {
            argv: split_command(command)?,
            timeout,
            workdir: None,
        })
    }

    pub fn with_workdir(mut self, workdir: Option<PathBuf>) -> Self {
        self.workdir = workdir;
        self
    }

    fn spec_for(&self, request: &BackendRequest) -> CommandSpec {
        let argv = self
            .argv
            .iter()
            .map(|arg| arg.replace("{model}", &request.model))
            .collect();
        CommandSpec::new(argv)
            .env("CASCADE_MODEL", &request.model)
            .env("CASCADE_TASK_ID", &request.task_id)
            .env("CASCADE_ATTEMPT", request.attempt.to_string())
            .workdir(self.workdir.clone())
            .stdin(request.prompt.clone())
    }
}

#[async_trait]
impl ExecutionBackend for CommandBackend {
    async fn run(&self, request: BackendRequest) -> Result<BackendOutcome, BackendError> {
        let spec = self.spec_for(&request);
        tracing::debug!(
            task = %request.task_id,
            model = %request.model,
            attempt = request.attempt,
            program = spec.program(),
            "backend command starting"
        );

        match run_captured(&spec, self.timeout, &request.cancel).await {
            Ok(captured) => {
                let outcome = parse_outcome(&captured);
                tracing::debug!(
                    task = %request.task_id,
                    success = outcome.success,
                    exit = %captured.exit_label(),
                    "backend command finished"
                );
                Ok(outcome)
            }
            Err(ProcessError::Timeout(limit)) => {
                Err(BackendError::Timeout(format!("{}s", limit.as_secs())))
            }
            Err(e @ ProcessError::Spawn { .. }) => Err(BackendError::Unavailable(e.to_string())),
            Err(e) => Err(BackendError::Other(e.to_string())),
        }
    }
}

/// Stands in when no backend command is configured. Control and
/// introspection commands never attempt anything; a run would fail every
/// attempt as unavailable, so `run` refuses to start without a command.
pub struct NoBackend;

#[async_trait]
impl ExecutionBackend for NoBackend {
    async fn run(&self, _request: BackendRequest) -> Result<BackendOutcome, BackendError> {
        Err(BackendError::Unavailable("no backend command configured".to_string()))
    }
}

/// Turn captured output into an outcome
pub fn parse_outcome(captured: &Captured) -> BackendOutcome {
    let reported = captured
        .stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<BackendOutcome>(line).ok());
    if let Some(outcome) = reported {
        return outcome;
    }

    if captured.success {
        return BackendOutcome::succeeded(0, 0, 0.0);
    }
    let mut lines = tail_lines(&captured.stderr, 3);
    if lines.is_empty() {
        lines = tail_lines(&captured.stdout, 1);
    }
    let message = if lines.is_empty() {
        format!("backend command failed with {}", captured.exit_label())
    } else {
        lines.join(" | ")
    };
    BackendOutcome::failed(None, message)
}
