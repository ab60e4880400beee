//! PRD runner
//!
//! Command-line control plane for the cascade engine. Every invocation opens
//! the same JSON-file store, so a session started in one process can be
//! inspected, paused, resumed or cancelled from another.
//!
//! # Usage
//!
//! ```bash
//! # Run in the foreground until the session finishes
//! CASCADE_BACKEND_CMD="agent --model {model}" prd-runner --project shop run prd.yaml
//!
//! # Run under a detached supervisor, then control it from anywhere
//! prd-runner --project shop run prd.yaml --detach
//! prd-runner --project shop pause
//! prd-runner --project shop status
//!
//! # Introspection
//! prd-runner --project shop plan prd.yaml
//! prd-runner --project shop estimate prd.yaml
//! prd-runner --project shop stats
//! ```

mod backend;
mod config;
mod detach;
mod gate;
mod prd;
mod process;
mod report;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use cascade_coordination::{
    ControlResponse, ExecutionBackend, FileStore, OrchestratorRegistry, Prd, SessionStatus,
    SharedStore,
};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::backend::{CommandBackend, NoBackend};
use crate::config::RunnerConfig;
use crate::detach::{NextStep, RunFiles};
use crate::gate::CommandGate;
use crate::report::{print_control, print_json, DetachReport, StatusReport};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Store directory shared by every runner process
    #[arg(long, global = true, default_value = ".cascade")]
    store: PathBuf,

    /// TOML config with engine sections plus [backend], [gate], [supervisor]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project the session belongs to
    #[arg(long, short, global = true, default_value = "default")]
    project: String,

    #[command(subcommand)]
    command: Command,
}

/// Flags shared by `run` and the internal `supervise`
#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// PRD file (JSON or YAML)
    prd: PathBuf,

    /// Backend command line (overrides [backend] command)
    #[arg(long)]
    backend_cmd: Option<String>,

    /// Gate command line (overrides [gate] command)
    #[arg(long)]
    gate_cmd: Option<String>,

    /// Skip the quality gate entirely
    #[arg(long, default_value_t = false)]
    no_gate: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a session for a PRD and wait for it to finish
    Run {
        #[command(flatten)]
        run: RunArgs,

        /// Hand the session to a background supervisor and return
        #[arg(long, default_value_t = false)]
        detach: bool,

        /// Adopt an unfinished session left behind by a dead process
        #[arg(long, default_value_t = false)]
        recover: bool,
    },
    /// Current or most recent session
    Status,
    Pause,
    Resume,
    Cancel,
    /// Routing decisions for every task
    Plan { prd: PathBuf },
    /// Cost scenarios for a PRD
    Estimate { prd: PathBuf },
    /// Routing statistics from recorded history
    Stats,
    #[command(hide = true)]
    Supervise {
        #[command(flatten)]
        run: RunArgs,

        #[arg(long, default_value_t = false)]
        recover: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = RunnerConfig::load(cli.config.as_deref())?;
    let store = FileStore::open(&cli.store)
        .with_context(|| format!("failed to open store {}", cli.store.display()))?
        .shared();
    let project = cli.project.as_str();

    match &cli.command {
        Command::Run {
            run,
            detach,
            recover,
        } => {
            apply_run_flags(&mut config, run);
            if *detach {
                return launch_detached(&cli, run, *recover, &config);
            }
            let prd = prd::load_prd(&run.prd)?;
            let orchestrators = build_orchestrators(&config, store, Some(run))?;
            run_foreground(&orchestrators, project, prd, *recover).await
        }
        Command::Supervise { run, recover } => {
            apply_run_flags(&mut config, run);
            let exe = std::env::current_exe().context("cannot locate runner executable")?;
            let child_args = |recovering: bool| foreground_args(&cli, run, recovering);
            let step =
                detach::supervise(&exe, child_args, store, project, *recover, &config.supervisor)
                    .await?;
            Ok(match step {
                NextStep::Finished(SessionStatus::Completed) => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            })
        }
        Command::Status => {
            let orchestrators = build_orchestrators(&config, store, None)?;
            let session = orchestrators.get_status(project).await?;
            let supervisor = RunFiles::new(&cli.store, project).read_info();
            print_json(&StatusReport::new(project, session, supervisor))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Pause | Command::Resume | Command::Cancel => {
            let orchestrators = build_orchestrators(&config, store, None)?;
            let result = match cli.command {
                Command::Pause => orchestrators.pause(project).await,
                Command::Resume => orchestrators.resume(project).await,
                _ => orchestrators.cancel(project).await,
            };
            let ok = print_control(&ControlResponse::from(result))?;
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Command::Plan { prd } => {
            let prd = prd::load_prd(prd)?;
            let orchestrators = build_orchestrators(&config, store, None)?;
            print_json(&orchestrators.get_routing_plan(project, &prd)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Estimate { prd } => {
            let prd = prd::load_prd(prd)?;
            let orchestrators = build_orchestrators(&config, store, None)?;
            print_json(&orchestrators.get_cost_estimate(project, &prd)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Stats => {
            let orchestrators = build_orchestrators(&config, store, None)?;
            print_json(&orchestrators.get_routing_stats(project)?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn apply_run_flags(config: &mut RunnerConfig, run: &RunArgs) {
    if let Some(cmd) = &run.backend_cmd {
        config.backend.command = Some(cmd.clone());
    }
    if let Some(cmd) = &run.gate_cmd {
        config.gate.command = Some(cmd.clone());
    }
}

/// Registry over the shared store. `run` gets the command backend and gate;
/// every other command only reads or signals persisted sessions.
fn build_orchestrators(
    config: &RunnerConfig,
    store: SharedStore,
    run: Option<&RunArgs>,
) -> Result<OrchestratorRegistry> {
    let models = Arc::new(config.coordination.build_registry()?);

    let backend: Arc<dyn ExecutionBackend> = match run {
        Some(_) => Arc::new(
            CommandBackend::new(config.backend_command()?, config.backend.timeout())?
                .with_workdir(config.backend.workdir.clone()),
        ),
        None => Arc::new(NoBackend),
    };

    let mut orchestrators =
        OrchestratorRegistry::new(store, models, backend, config.coordination.clone());
    if let Some(run) = run {
        if !run.no_gate && config.gate.is_enabled() {
            let gate = CommandGate::new(&config.gate)?.with_workdir(config.backend.workdir.clone());
            orchestrators = orchestrators.with_gate(Arc::new(gate));
        }
    }
    Ok(orchestrators)
}

async fn run_foreground(
    orchestrators: &OrchestratorRegistry,
    project: &str,
    prd: Prd,
    recover: bool,
) -> Result<ExitCode> {
    let started = if recover {
        orchestrators.recover(project, prd).await
    } else {
        orchestrators.start(project, prd).await
    };
    let record = match started {
        Ok(record) => record,
        Err(e) => {
            print_control(&ControlResponse::err(e))?;
            return Ok(ExitCode::FAILURE);
        }
    };
    info!(project, session = %record.short_id(), recover, "session running");

    let wait = orchestrators.wait(project);
    tokio::pin!(wait);
    let finished = tokio::select! {
        done = &mut wait => done,
        _ = tokio::signal::ctrl_c() => {
            warn!(project, "interrupted, cancelling session");
            if let Err(e) = orchestrators.cancel(project).await {
                warn!(project, error = %e, "cancel failed");
            }
            wait.await
        }
    };

    let record = finished.context("session handle disappeared before the run finished")?;
    let status = record.status;
    print_control(&ControlResponse::ok(Some(record)))?;
    Ok(if status == SessionStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

// ============================================================================
// Detached sessions
// ============================================================================

/// Global flags every child invocation repeats, with absolute paths
fn global_args(cli: &Cli) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--store".into(),
        absolute(&cli.store).into_os_string(),
        "--project".into(),
        cli.project.clone().into(),
    ];
    if let Some(config) = &cli.config {
        args.push("--config".into());
        args.push(absolute(config).into_os_string());
    }
    args
}

fn run_flag_args(run: &RunArgs) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![absolute(&run.prd).into_os_string()];
    if let Some(cmd) = &run.backend_cmd {
        args.push("--backend-cmd".into());
        args.push(cmd.into());
    }
    if let Some(cmd) = &run.gate_cmd {
        args.push("--gate-cmd".into());
        args.push(cmd.into());
    }
    if run.no_gate {
        args.push("--no-gate".into());
    }
    args
}

/// `run` invocation the supervisor launches
fn foreground_args(cli: &Cli, run: &RunArgs, recovering: bool) -> Vec<OsString> {
    let mut args = global_args(cli);
    args.push("run".into());
    args.extend(run_flag_args(run));
    if recovering {
        args.push("--recover".into());
    }
    args
}

fn launch_detached(cli: &Cli, run: &RunArgs, recover: bool, config: &RunnerConfig) -> Result<ExitCode> {
    // Fail here rather than in a log file nobody is watching
    prd::load_prd(&run.prd)?;
    config.backend_command()?;

    let mut args = global_args(cli);
    args.push("supervise".into());
    args.extend(run_flag_args(run));
    if recover {
        args.push("--recover".into());
    }

    let exe = std::env::current_exe().context("cannot locate runner executable")?;
    let files = RunFiles::new(&cli.store, &cli.project);
    let supervisor = detach::spawn_detached(&exe, args, &files, &cli.project, &run.prd)?;
    print_json(&DetachReport {
        success: true,
        supervisor,
    })?;
    Ok(ExitCode::SUCCESS)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("prd-runner").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["status", "--project", "shop", "--store", "/tmp/s"]);
        assert_eq!(cli.project, "shop");
        assert_eq!(cli.store, PathBuf::from("/tmp/s"));
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn test_run_flags() {
        let cli = parse(&["run", "prd.yaml", "--detach", "--backend-cmd", "agent -q"]);
        match cli.command {
            Command::Run { run, detach, recover } => {
                assert!(detach);
                assert!(!recover);
                assert_eq!(run.backend_cmd.as_deref(), Some("agent -q"));
                assert_eq!(run.prd, PathBuf::from("prd.yaml"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_supervisor_child_args_round_trip() {
        let cli = parse(&["-p", "shop", "--store", "/tmp/s", "supervise", "/tmp/prd.json", "--no-gate"]);
        let Command::Supervise { run, .. } = &cli.command else {
            panic!("expected supervise");
        };

        let args = foreground_args(&cli, run, true);
        let child = Cli::try_parse_from(std::iter::once(OsString::from("prd-runner")).chain(args)).unwrap();
        assert_eq!(child.project, "shop");
        match child.command {
            Command::Run { run, detach, recover } => {
                assert!(recover);
                assert!(!detach);
                assert!(run.no_gate);
                assert_eq!(run.prd, PathBuf::from("/tmp/prd.json"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_run_flags_override_config() {
        let mut config = RunnerConfig::default();
        let run = RunArgs {
            prd: PathBuf::from("prd.json"),
            backend_cmd: Some("agent".into()),
            gate_cmd: Some("make check".into()),
            no_gate: false,
        };
        apply_run_flags(&mut config, &run);
        assert_eq!(config.backend_command().unwrap(), "agent");
        assert_eq!(config.gate.command.as_deref(), Some("make check"));
    }

    #[test]
    fn test_introspection_needs_no_backend() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap().shared();
        let orchestrators = build_orchestrators(&RunnerConfig::default(), store.clone(), None).unwrap();
        let stats = orchestrators.get_routing_stats("shop").unwrap();
        assert_eq!(stats.total_attempts, 0);

        let run = RunArgs {
            prd: PathBuf::from("prd.json"),
            backend_cmd: None,
            gate_cmd: None,
            no_gate: false,
        };
        assert!(build_orchestrators(&RunnerConfig::default(), store, Some(&run)).is_err());
    }
}
