//! Process agent adapter.
//!
//! Runs an executable found at `<search dir>/<module path>` that reads the
//! call as JSON from stdin and writes the returned value as JSON to stdout.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use super::{
    json_type_name, last_line, locate, run_child, AgentAdapter, AgentCall, AgentConfig,
    AgentError, AgentOutput, AgentType, ResolvedEntryPoint,
};

/// Adapter for agents shipped as standalone executables.
pub struct ProcessAdapter;

impl ProcessAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProcessAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}

#[async_trait]
impl AgentAdapter for ProcessAdapter {
    fn agent_type(&self) -> AgentType {
        AgentType::Process
    }

    async fn resolve(&self, config: &AgentConfig) -> Result<ResolvedEntryPoint, AgentError> {
        let rel = config.entry_point.relative_path();
        let program = locate(&config.search_path, [rel.as_path()]).ok_or_else(|| {
            AgentError::NotFound(format!(
                "{} not found in search path [{}]",
                rel.display(),
                config
                    .search_path
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        if !is_executable(&program) {
            return Err(AgentError::NotFound(format!(
                "{} is not executable",
                program.display()
            )));
        }

        debug!("Located {} at {}", config.entry_point, program.display());

        Ok(ResolvedEntryPoint {
            entry_point: config.entry_point.clone(),
            program: program.clone(),
            location: Some(program),
            version: None,
        })
    }

    async fn invoke(
        &self,
        config: &AgentConfig,
        resolved: &ResolvedEntryPoint,
        call: &AgentCall,
    ) -> Result<AgentOutput, AgentError> {
        let start = Instant::now();

        let payload = serde_json::to_vec(call)
            .map_err(|e| AgentError::Encode(e.to_string()))?;

        let mut cmd = Command::new(&resolved.program);
        cmd.arg(&resolved.entry_point.function);

        for (key, value) in &config.env_vars {
            cmd.env(key, value);
        }

        info!("Starting agent process {}", resolved.program.display());

        let output = run_child(cmd, &payload, config.timeout).await?;
        let duration = start.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        for line in stderr.lines() {
            debug!("[agent stderr] {}", line);
        }

        if !output.status.success() {
            let exit = match output.status.code() {
                Some(c) => format!("exited with code {}", c),
                None => "terminated by signal".to_string(),
            };
            let message = match last_line(&stderr) {
                Some(line) => format!("{} ({})", line, exit),
                None => format!("agent {}", exit),
            };
            return Err(AgentError::ExecutionFailed {
                message,
                trace: stderr,
            });
        }

        // An agent that returns nothing prints nothing.
        let value = if stdout.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(stdout.trim())
                .map_err(|e| AgentError::MalformedOutput(format!("{}: {:?}", e, stdout)))?
        };

        let type_name = json_type_name(&value).to_string();
        info!("Agent process returned {} in {:?}", type_name, duration);

        Ok(AgentOutput {
            type_name,
            value,
            stderr,
            duration,
        })
    }
}
