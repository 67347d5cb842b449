//! Ralph configuration types and loading.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::gates::GateSpec;
use crate::service::ServiceSpec;

/// Main Ralph configuration (spec.md §6.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where to find the task list.
    pub task_source: TaskSourceConfig,

    /// Services to start and health-probe before post-completion verification.
    pub services: Vec<ServiceSpec>,

    /// Gate sequences for the "build" and "full" phases.
    pub gates: GatesConfig,

    /// Glob patterns the test-writing phase may write to.
    #[serde(rename = "test-paths")]
    pub test_paths: Vec<String>,

    /// Agent invocation settings.
    pub agents: AgentsConfig,

    /// Iteration and timeout budgets.
    pub limits: LimitsConfig,

    /// Git-related settings.
    pub git: GitConfig,
}

impl Config {
    /// Load configuration with fallback chain: explicit path, then
    /// project-local `.ralph.yml`, then user config dir, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".ralph.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ralph").join("ralph.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSourceConfig {
    /// Path to the task list JSON file.
    pub path: PathBuf,
}

impl Default for TaskSourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tasks.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatesConfig {
    pub build: Vec<GateSpec>,
    pub full: Vec<GateSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Argv for the agent command, e.g. `["claude", "--print"]`.
    pub command: Vec<String>,

    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "--print".to_string()],
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { max_iterations: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    #[serde(rename = "require-clean-worktree")]
    pub require_clean_worktree: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            require_clean_worktree: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_limits() {
        let config = Config::default();
        assert_eq!(config.limits.max_iterations, 20);
        assert_eq!(config.task_source.path, PathBuf::from("tasks.json"));
        assert_eq!(config.agents.command, vec!["claude", "--print"]);
    }

    #[test]
    fn deserializes_partial_yaml_with_defaults() {
        let yaml = r#"
task_source:
  path: my-tasks.json

limits:
  max-iterations: 5
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.task_source.path, PathBuf::from("my-tasks.json"));
        assert_eq!(config.limits.max_iterations, 5);
        assert_eq!(config.agents.timeout_secs, 600);
    }

    #[test]
    fn deserializes_gates_and_services() {
        let yaml = r#"
gates:
  full:
    - name: lint
      argv: ["cargo", "clippy"]
      fatal: true
services:
  - name: backend
    health_urls: ["http://localhost:8080/health"]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.gates.full.len(), 1);
        assert_eq!(config.gates.full[0].name, "lint");
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].name, "backend");
    }
}
