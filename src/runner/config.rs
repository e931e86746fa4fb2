//! Configuration for a direct harness run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::agents::{AgentConfig, AgentType, EntryPoint};

/// Configuration for invoking an agent entry point once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Directory the agent directory is resolved against.
    pub base_dir: PathBuf,
    /// Subdirectory prepended to the search path.
    pub agent_dir: PathBuf,
    /// Additional directories searched after the agent directory.
    pub extra_search_paths: Vec<PathBuf>,
    /// Module and function to call.
    pub entry_point: EntryPoint,
    /// How the agent is reached.
    pub agent_type: AgentType,
    /// Interpreter used by the Python adapter.
    pub python: String,
    /// Repository directory placeholder passed to the agent.
    pub repo_dir: String,
    /// Whether the agent runs in test mode.
    pub test_mode: bool,
    /// Maximum call duration; `None` waits for the agent to finish.
    pub timeout: Option<Duration>,
    /// Environment variables to pass to the agent.
    pub env_vars: Vec<(String, String)>,
    /// Request file replacing the built-in sample.
    pub request_path: Option<PathBuf>,
}

impl HarnessConfig {
    /// Creates a configuration rooted at `base_dir` with defaults.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            agent_dir: PathBuf::from("ridges"),
            extra_search_paths: Vec::new(),
            entry_point: EntryPoint::default(),
            agent_type: AgentType::Python,
            python: "python3".to_string(),
            repo_dir: "test_repo".to_string(),
            test_mode: true,
            timeout: None,
            env_vars: Vec::new(),
            request_path: None,
        }
    }

    /// Sets the agent type.
    pub fn with_agent(mut self, agent_type: AgentType) -> Self {
        self.agent_type = agent_type;
        self
    }

    /// Sets the agent subdirectory.
    pub fn with_agent_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.agent_dir = dir.into();
        self
    }

    /// Appends a directory to the search path.
    pub fn with_search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extra_search_paths.push(dir.into());
        self
    }

    /// Sets the entry point.
    pub fn with_entry_point(
        mut self,
        module: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        self.entry_point = EntryPoint::new(module, function);
        self
    }

    /// Sets the Python interpreter.
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Sets the repository directory placeholder.
    pub fn with_repo_dir(mut self, repo_dir: impl Into<String>) -> Self {
        self.repo_dir = repo_dir.into();
        self
    }

    /// Enables or disables test mode.
    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Loads the request from a file instead of the built-in sample.
    pub fn with_request_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.request_path = Some(path.into());
        self
    }

    /// Agent directory joined onto the base directory.
    pub fn agent_path(&self) -> PathBuf {
        self.base_dir.join(&self.agent_dir)
    }

    /// Full search path, agent directory first. Relative entries are
    /// anchored at `cwd` so the child sees the same directories.
    pub fn search_path(&self, cwd: &Path) -> Vec<PathBuf> {
        std::iter::once(self.agent_path())
            .chain(self.extra_search_paths.iter().cloned())
            .map(|p| if p.is_absolute() { p } else { cwd.join(p) })
            .collect()
    }

    /// Builds the adapter-facing configuration.
    pub fn agent_config(&self) -> std::io::Result<AgentConfig> {
        let cwd = std::env::current_dir()?;
        Ok(AgentConfig {
            entry_point: self.entry_point.clone(),
            search_path: self.search_path(&cwd),
            timeout: self.timeout,
            env_vars: self.env_vars.clone(),
        })
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_config_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.agent_dir, PathBuf::from("ridges"));
        assert_eq!(config.entry_point.module, "miner.top_miner_v2");
        assert_eq!(config.entry_point.function, "agent_main");
        assert_eq!(config.repo_dir, "test_repo");
        assert!(config.test_mode);
        assert!(config.timeout.is_none());
        assert_eq!(config.agent_type, AgentType::Python);
    }

    #[test]
    fn test_harness_config_builder() {
        let config = HarnessConfig::new("/work")
            .with_agent(AgentType::Process)
            .with_agent_dir("agents")
            .with_entry_point("solver.main", "run")
            .with_timeout(Duration::from_secs(30))
            .with_test_mode(false)
            .with_env("MY_VAR", "value");

        assert_eq!(config.agent_type, AgentType::Process);
        assert_eq!(config.agent_path(), PathBuf::from("/work/agents"));
        assert_eq!(config.entry_point.to_string(), "solver.main:run");
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert!(!config.test_mode);
        assert_eq!(config.env_vars.len(), 1);
    }

    #[test]
    fn test_search_path_order_and_anchoring() {
        let config = HarnessConfig::new("proj")
            .with_search_path("/opt/shared")
            .with_search_path("vendor");

        let path = config.search_path(Path::new("/home/me"));
        assert_eq!(
            path,
            vec![
                PathBuf::from("/home/me/proj/ridges"),
                PathBuf::from("/opt/shared"),
                PathBuf::from("/home/me/vendor"),
            ]
        );
    }
}
