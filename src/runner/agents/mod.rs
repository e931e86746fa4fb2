//! Agent adapters for reaching an external `agent_main` entry point.
//!
//! Each adapter knows how to:
//! 1. Resolve the entry point against a search path
//! 2. Invoke it once with an [`AgentCall`]
//! 3. Decode the returned value and its runtime type

pub mod process;
pub mod python;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tracing::debug;

use super::request::TestRequest;
use crate::error::FailureKind;

/// Supported ways of reaching the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Python module imported by a bootstrap running under the interpreter.
    Python,
    /// Executable speaking JSON over stdin/stdout.
    Process,
}

impl AgentType {
    /// Returns the display name for this agent type.
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentType::Python => "Python",
            AgentType::Process => "Process",
        }
    }
}

impl Default for AgentType {
    fn default() -> Self {
        Self::Python
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" | "py" => Ok(AgentType::Python),
            "process" | "exec" | "executable" => Ok(AgentType::Process),
            other => Err(format!("Unknown agent type: {}", other)),
        }
    }
}

/// A dotted module path plus the callable to import from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub module: String,
    pub function: String,
}

impl EntryPoint {
    pub fn new(module: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
        }
    }

    /// `miner.top_miner_v2` -> `miner/top_miner_v2`.
    pub fn relative_path(&self) -> PathBuf {
        self.module.split('.').filter(|s| !s.is_empty()).collect()
    }
}

impl Default for EntryPoint {
    fn default() -> Self {
        Self::new("miner.top_miner_v2", "agent_main")
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.function)
    }
}

/// The three arguments of `agent_main(request, repo_dir, test_mode)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCall {
    pub input: TestRequest,
    pub repo_dir: String,
    pub test_mode: bool,
}

/// Configuration passed to an agent adapter.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Entry point to resolve.
    pub entry_point: EntryPoint,
    /// Directories searched in order; the agent directory comes first.
    pub search_path: Vec<PathBuf>,
    /// Optional limit on the call. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Environment variables for the child.
    pub env_vars: Vec<(String, String)>,
}

/// Where an entry point was found.
#[derive(Debug, Clone)]
pub struct ResolvedEntryPoint {
    pub entry_point: EntryPoint,
    /// Program that will be spawned (interpreter or the agent itself).
    pub program: PathBuf,
    /// Source file or executable backing the module, if located on disk.
    pub location: Option<PathBuf>,
    /// Interpreter or agent version, when it reports one.
    pub version: Option<String>,
}

/// Value returned by the entry point.
#[derive(Debug, Clone)]
pub struct AgentOutput {
    /// Runtime type as reported by the agent side (`dict`, `object`, ...).
    pub type_name: String,
    /// The returned value.
    pub value: Value,
    /// Whatever the agent wrote to stderr.
    pub stderr: String,
    /// Call duration.
    pub duration: Duration,
}

/// Trait for agent adapters.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Returns the agent type.
    fn agent_type(&self) -> AgentType;

    /// Locates the entry point without calling it.
    async fn resolve(&self, config: &AgentConfig) -> Result<ResolvedEntryPoint, AgentError>;

    /// Calls a previously resolved entry point once.
    async fn invoke(
        &self,
        config: &AgentConfig,
        resolved: &ResolvedEntryPoint,
        call: &AgentCall,
    ) -> Result<AgentOutput, AgentError>;
}

/// Error type for agent operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Cannot import {entry_point}: {message}")]
    ImportFailed {
        entry_point: String,
        message: String,
        trace: String,
    },

    #[error("Agent raised: {message}")]
    ExecutionFailed { message: String, trace: String },

    #[error("Agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("Agent returned malformed output: {0}")]
    MalformedOutput(String),

    #[error("Failed to encode call: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Resolution vs. invocation.
    pub fn kind(&self) -> FailureKind {
        match self {
            AgentError::NotFound(_) | AgentError::ImportFailed { .. } | AgentError::Config(_) => {
                FailureKind::Resolution
            }
            AgentError::ExecutionFailed { .. }
            | AgentError::Timeout(_)
            | AgentError::MalformedOutput(_)
            | AgentError::Encode(_)
            | AgentError::Io(_) => FailureKind::Invocation,
        }
    }

    /// Agent-side diagnostics (a traceback for Python agents).
    pub fn trace(&self) -> Option<&str> {
        match self {
            AgentError::ImportFailed { trace, .. } | AgentError::ExecutionFailed { trace, .. }
                if !trace.trim().is_empty() =>
            {
                Some(trace.as_str())
            }
            _ => None,
        }
    }
}

pub use process::ProcessAdapter;
pub use python::PythonAdapter;

/// Creates an adapter for the given agent type.
pub fn create_adapter(agent_type: AgentType, python: &str) -> Box<dyn AgentAdapter> {
    match agent_type {
        AgentType::Python => Box::new(PythonAdapter::with_command(python)),
        AgentType::Process => Box::new(ProcessAdapter::new()),
    }
}

/// JSON kind of a value, used as the runtime type for non-Python agents.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Last non-empty line of a diagnostic stream, which for a Python
/// traceback is the exception message.
pub(crate) fn last_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(String::from)
}

/// Writes the serialized call and closes stdin.
pub(crate) async fn write_call(mut stdin: ChildStdin, payload: &[u8]) -> Result<(), AgentError> {
    // An agent that exits without reading its input closes the pipe early.
    match stdin.write_all(payload).await {
        Ok(()) => {
            stdin.shutdown().await.ok();
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            debug!("Agent closed stdin before reading the call");
            Ok(())
        }
        Err(e) => Err(AgentError::Io(e)),
    }
}

/// Runs `exchange` under the optional limit.
pub(crate) async fn with_timeout<T>(
    limit: Option<Duration>,
    exchange: impl std::future::Future<Output = Result<T, AgentError>>,
) -> Result<T, AgentError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, exchange)
            .await
            .map_err(|_| AgentError::Timeout(limit))?,
        None => exchange.await,
    }
}

/// Spawns `cmd`, feeds it `payload` on stdin and collects its output.
/// Writing the call counts against the timeout.
pub(crate) async fn run_child(
    mut cmd: Command,
    payload: &[u8],
    timeout: Option<Duration>,
) -> Result<Output, AgentError> {
    let program = cmd.as_std().get_program().to_string_lossy().to_string();

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AgentError::NotFound(format!("{} ({})", program, e))
        } else {
            AgentError::Config(format!("Failed to spawn {}: {}", program, e))
        }
    })?;

    let stdin = child.stdin.take();
    let exchange = async move {
        let write = async move {
            match stdin {
                Some(stdin) => write_call(stdin, payload).await,
                None => Ok(()),
            }
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        written?;
        Ok::<Output, AgentError>(output?)
    };

    // Dropping the exchange on timeout drops the child, which kills it.
    with_timeout(timeout, exchange).await
}

/// First directory in `search_path` containing any of `candidates`.
pub(crate) fn locate<'a>(
    search_path: &[PathBuf],
    candidates: impl IntoIterator<Item = &'a Path> + Clone,
) -> Option<PathBuf> {
    search_path.iter().find_map(|dir| {
        candidates
            .clone()
            .into_iter()
            .map(|c| dir.join(c))
            .find(|p| p.is_file())
    })
}
