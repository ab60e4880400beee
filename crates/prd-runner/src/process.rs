//! Subprocess plumbing shared by the command backend and the command gate
//!
//! Commands are given as shell-style lines and split with `shlex`; nothing
//! goes through a shell unless the line itself invokes one.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("cannot parse command line `{0}`")]
    Parse(String),

    #[error("empty command line")]
    Empty,

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Split a command line into argv
pub fn split_command(line: &str) -> Result<Vec<String>, ProcessError> {
    let argv = shlex::split(line).ok_or_else(|| ProcessError::Parse(line.to_string()))?;
    if argv.is_empty() {
        return Err(ProcessError::Empty);
    }
    Ok(argv)
}

/// What to run
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub workdir: Option<PathBuf>,
    /// Written to stdin, then stdin is closed
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            ..Default::default()
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn workdir(mut self, dir: Option<PathBuf>) -> Self {
        self.workdir = dir;
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }
}

/// Exit status plus captured output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    pub fn exit_label(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "killed by signal".to_string(),
        }
    }
}

/// Run `spec` to completion, killing the child on timeout or cancellation
pub async fn run_captured(
    spec: &CommandSpec,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Captured, ProcessError> {
    let (program, args) = spec.argv.split_first().ok_or(ProcessError::Empty)?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.workdir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    if let (Some(input), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            // The child may exit without reading everything
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                tracing::debug!(error = %e, "stdin write stopped early");
            }
        });
    }

    // Dropping the wait future drops the child, which kills it
    tokio::select! {
        output = child.wait_with_output() => {
            let output = output?;
            Ok(Captured {
                success: output.status.success(),
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        _ = tokio::time::sleep(timeout) => Err(ProcessError::Timeout(timeout)),
        _ = cancel.cancelled() => Err(ProcessError::Cancelled),
    }
}

static ANSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("valid ANSI regex"));

/// Last `n` non-empty lines of `text`, colour codes removed
pub fn tail_lines(text: &str, n: usize) -> Vec<String> {
    let clean = ANSI.replace_all(text, "");
    let lines: Vec<String> = clean
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    let skip = lines.len().saturating_sub(n);
    lines.into_iter().skip(skip).collect()
}
