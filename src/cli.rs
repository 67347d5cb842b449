//! CLI command definitions (spec.md §6.1).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Ralph - verified-loop task orchestrator
#[derive(Parser)]
#[command(name = "ralph", about = "Drives an agent through implement/test/gate/review until a task list is done")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true, help = "Log level")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scaffold configuration and an empty task list.
    Init {
        /// Directory to scaffold into.
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Probe for required external tools; report and exit 0/2.
    Scan,

    /// Execute the verified loop.
    Run {
        /// Run only this task id, skipping all others.
        #[arg(long)]
        only: Option<String>,

        /// Skip every task before this id in priority order.
        #[arg(long)]
        start_from: Option<String>,

        /// Per-task iteration cap; overrides config when set.
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Which gate phase to run: build, full, or none.
        #[arg(long, default_value = "full")]
        gate_phase: GatePhase,

        /// List tasks that would run and exit without invoking an agent.
        #[arg(long)]
        dry_run: bool,

        /// Resume a previously interrupted run from its session store.
        #[arg(long)]
        resume: bool,
    },

    /// Run post-completion checks only (gates, services, UI).
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum GatePhase {
    Build,
    Full,
    None,
}

/// Result of checking a required tool, used by `ralph scan`.
pub struct ToolCheck {
    pub name: &'static str,
    pub available: bool,
    pub version: Option<String>,
}

impl ToolCheck {
    pub fn check(name: &'static str, version_args: &[&str]) -> Self {
        let result = std::process::Command::new(name).args(version_args).output();
        match result {
            Ok(output) if output.status.success() => {
                let version_str = String::from_utf8_lossy(&output.stdout);
                Self {
                    name,
                    available: true,
                    version: Some(parse_version(&version_str)),
                }
            }
            _ => Self {
                name,
                available: false,
                version: None,
            },
        }
    }
}

fn parse_version(output: &str) -> String {
    for word in output.split_whitespace() {
        let word = word.trim_start_matches('v');
        if word.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            let version: String = word.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
            if !version.is_empty() {
                return version;
            }
        }
    }
    "unknown".to_string()
}

/// The external tools the core relies on: an agent command and git (for the
/// guardrail's preferred snapshot path).
pub fn check_required_tools(agent_command: &str) -> Vec<ToolCheck> {
    vec![
        ToolCheck::check("git", &["--version"]),
        ToolCheck::check_owned(agent_command),
    ]
}

impl ToolCheck {
    /// Like [`check`](Self::check), but for a tool name only known at
    /// runtime (the configured agent command), so it can't be `&'static str`.
    fn check_owned(name: &str) -> Self {
        let result = std::process::Command::new(name).arg("--version").output();
        // Leak the name once so `ToolCheck::name` can stay `&'static str`
        // for the common case of compile-time-known tool names too.
        let leaked: &'static str = Box::leak(name.to_string().into_boxed_str());
        match result {
            Ok(output) if output.status.success() => {
                let version_str = String::from_utf8_lossy(&output.stdout);
                Self {
                    name: leaked,
                    available: true,
                    version: Some(parse_version(&version_str)),
                }
            }
            _ => Self {
                name: leaked,
                available: false,
                version: None,
            },
        }
    }
}
