//! Ralph - verified-loop task orchestrator
//!
//! CLI entry point.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use ralph::agent::SubprocessAgentRunner;
use ralph::cli::{Cli, Command, GatePhase, check_required_tools};
use ralph::config::Config;
use ralph::coordinator::{RunCoordinator, RunOptions};
use ralph::errors::RalphError;
use ralph::events::{EventBus, JsonlLogger, timeline_path};
use ralph::gates::run_gates;
use ralph::guardrail::AllowList;
use ralph::service::wait_until_ready;
use ralph::task_loop::TaskLoopConfig;
use ralph::tasklist::TaskList;

fn setup_logging(level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ralph")
        .join("logs");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let filter = level
        .map(|l| tracing_subscriber::EnvFilter::new(l))
        .unwrap_or_else(|| {
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
        });
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!("logging initialized");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref()).context("failed to set up logging")?;

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            if let Some(ralph_err) = e.downcast_ref::<RalphError>() {
                eprintln!("error: {ralph_err}");
                ralph_err.exit_code()
            } else {
                eprintln!("error: {e}");
                2
            }
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(run_async(cli))
}

async fn run_async(cli: Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_ref()).context("failed to load configuration")?;

    match cli.command {
        Command::Init { dir } => cmd_init(&dir, &config),
        Command::Scan => Ok(cmd_scan(&config)),
        Command::Run {
            only,
            start_from,
            max_iterations,
            gate_phase,
            dry_run,
            resume,
        } => cmd_run(config, only, start_from, max_iterations, gate_phase, dry_run, resume).await,
        Command::Verify => cmd_verify(config).await,
    }
}

fn cmd_init(dir: &std::path::Path, config: &Config) -> Result<i32> {
    fs::create_dir_all(dir)?;
    let config_path = dir.join(".ralph.yml");
    if !config_path.exists() {
        fs::write(&config_path, serde_yaml::to_string(config)?)?;
    }
    let tasks_path = dir.join(&config.task_source.path);
    if !tasks_path.exists() {
        let empty = TaskList {
            project: "untitled".to_string(),
            branch_name: None,
            description: String::new(),
            tasks: Vec::new(),
        };
        fs::write(&tasks_path, serde_json::to_vec_pretty(&empty)?)?;
    }
    println!("scaffolded {} and {}", config_path.display(), tasks_path.display());
    Ok(0)
}

fn cmd_scan(config: &Config) -> i32 {
    let agent_command = config.agents.command.first().map(String::as_str).unwrap_or("claude");
    let checks = check_required_tools(agent_command);
    let mut all_available = true;
    for check in &checks {
        let status = if check.available { "ok" } else { "missing" };
        all_available &= check.available;
        println!(
            "{:<10} {:<8} {}",
            check.name,
            status,
            check.version.as_deref().unwrap_or("-")
        );
    }
    if all_available { 0 } else { 2 }
}

async fn cmd_run(
    config: Config,
    only: Option<String>,
    start_from: Option<String>,
    max_iterations: Option<u32>,
    gate_phase: GatePhase,
    dry_run: bool,
    resume: bool,
) -> Result<i32> {
    let mut task_list = TaskList::load(&config.task_source.path)
        .context("failed to load task list")?;

    if dry_run {
        for task in task_list.pending_in_order() {
            println!("{} [{}] {}", task.id, task.priority, task.title);
        }
        return Ok(0);
    }

    let run_dir = PathBuf::from(".ralph").join("runs").join("current");
    fs::create_dir_all(&run_dir)?;

    let bus = EventBus::with_default_capacity();
    let emitter = bus.emitter();
    let logger = JsonlLogger::create(timeline_path(&run_dir))?;
    let logger_rx = bus.subscribe();
    let logger_handle = tokio::spawn(async move { logger.run(logger_rx).await });

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = cancelled.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancelled.store(true, Ordering::SeqCst);
        });
    }

    let gates = match gate_phase {
        GatePhase::Build => config.gates.build.clone(),
        GatePhase::Full => config.gates.full.clone(),
        GatePhase::None => Vec::new(),
    };

    let runner = SubprocessAgentRunner;
    let loop_config = TaskLoopConfig {
        max_iterations: max_iterations.unwrap_or(config.limits.max_iterations),
        agent_timeout: std::time::Duration::from_secs(config.agents.timeout_secs),
        agent_argv: config.agents.command.clone(),
        worktree: std::env::current_dir()?,
        gates,
        test_allow_list: AllowList::new(&config.test_paths),
    };
    let coordinator = RunCoordinator::new(run_dir, &emitter, &runner, loop_config);
    let options = RunOptions {
        only,
        start_from,
        max_iterations: max_iterations.unwrap_or(config.limits.max_iterations),
        resume,
    };

    let result = coordinator
        .run(&mut task_list, &options, &|| cancelled.load(Ordering::SeqCst))
        .await;

    fs::write(&config.task_source.path, serde_json::to_vec_pretty(&task_list)?)?;
    // Every sender (the bus itself and the emitter handle used throughout
    // the run) must be dropped before the logger task will see the channel
    // close and return.
    drop(bus);
    drop(emitter);
    let _ = logger_handle.await;

    match result {
        Ok(summary) => {
            println!(
                "run complete: {} completed, {} failed",
                summary.tasks_completed, summary.tasks_failed
            );
            Ok(0)
        }
        Err(e) => Err(e.into()),
    }
}

async fn cmd_verify(config: Config) -> Result<i32> {
    let bus = EventBus::with_default_capacity();
    let emitter = bus.emitter();
    let client = reqwest::Client::new();

    for service in &config.services {
        emitter.emit(ralph::events::Event::ServiceStarting {
            service: service.name.clone(),
        });
        match wait_until_ready(service, &client).await {
            Ok(()) => emitter.emit(ralph::events::Event::ServiceReady {
                service: service.name.clone(),
            }),
            Err(e) => {
                emitter.emit(ralph::events::Event::ServiceFailed {
                    service: service.name.clone(),
                    reason: e.to_string(),
                });
                return Err(RalphError::ServiceStartup(e.to_string()).into());
            }
        }
    }

    let repo_root = std::env::current_dir()?;
    let result = run_gates(&config.gates.full, &repo_root, "_verify", "full", &emitter).await;
    if result.all_fatal_passed {
        Ok(0)
    } else {
        Err(RalphError::GateFatal.into())
    }
}
