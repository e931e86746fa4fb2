//! Python agent adapter.
//!
//! Runs the interpreter with a small bootstrap that prepends the search path
//! to `sys.path` and imports the entry point. Resolution ends once the
//! bootstrap reports the import; the same interpreter then reads the call
//! from stdin and writes the return value as JSON.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{
    last_line, with_timeout, write_call, AgentAdapter, AgentCall, AgentConfig, AgentError,
    AgentOutput, AgentType, EntryPoint, ResolvedEntryPoint,
};

/// Bootstrap exit status when the module or function cannot be imported.
pub const IMPORT_FAILED_EXIT: i32 = 3;
/// Bootstrap exit status when the entry point raised.
pub const CALL_FAILED_EXIT: i32 = 4;

/// How long to wait for stderr after the interpreter exits.
const STDERR_GRACE: Duration = Duration::from_secs(5);

/// argv: module, function, then the search path entries in order.
///
/// The result channel is a private duplicate of fd 1. fd 1 itself is pointed
/// at stderr before the import, so output from C extensions and child
/// processes cannot reach the result.
const BOOTSTRAP: &str = r#"
import importlib
import json
import math
import os
import sys
import traceback

result_out = os.fdopen(os.dup(1), "w")
os.dup2(2, 1)
sys.stdout = sys.stderr

module_name, function_name = sys.argv[1], sys.argv[2]
for entry in reversed(sys.argv[3:]):
    sys.path.insert(0, entry)

try:
    module = importlib.import_module(module_name)
    entry_point = getattr(module, function_name)
except Exception:
    traceback.print_exc()
    sys.exit(3)

result_out.write(json.dumps({"imported": getattr(module, "__file__", None)}) + "\n")
result_out.flush()

call = json.load(sys.stdin)

try:
    result = entry_point(call["input"], repo_dir=call["repo_dir"], test_mode=call["test_mode"])
except Exception:
    traceback.print_exc()
    sys.exit(4)


def finite(value):
    if isinstance(value, float) and not math.isfinite(value):
        return repr(value)
    if isinstance(value, dict):
        return {key: finite(item) for key, item in value.items()}
    if isinstance(value, (list, tuple)):
        return [finite(item) for item in value]
    return value


envelope = {"type": type(result).__name__, "value": result}
try:
    encoded = json.dumps(envelope, default=repr, allow_nan=False)
except ValueError:
    encoded = json.dumps(finite(envelope), default=repr, allow_nan=False)
result_out.write(encoded)
result_out.flush()
"#;

/// First line on the result channel, written after a successful import.
#[derive(Deserialize)]
struct ImportMarker {
    imported: Option<String>,
}

#[derive(Deserialize)]
struct BootstrapResult {
    #[serde(rename = "type")]
    type_name: String,
    value: Value,
}

/// An interpreter that has imported the entry point and waits for the call.
struct Session {
    child: Child,
    stdin: ChildStdin,
    results: BufReader<ChildStdout>,
    stderr: JoinHandle<String>,
}

/// Adapter for agents written as Python modules.
pub struct PythonAdapter {
    /// Interpreter to run.
    command: String,
    session: Mutex<Option<Session>>,
}

impl PythonAdapter {
    /// Creates an adapter using `python3` from `PATH`.
    pub fn new() -> Self {
        Self::with_command("python3")
    }

    /// Creates with a custom interpreter path.
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            session: Mutex::new(None),
        }
    }

    async fn version(&self) -> Option<String> {
        let output = Command::new(&self.command)
            .arg("--version")
            .output()
            .await
            .ok()?;

        if output.status.success() {
            // Python 2 reports its version on stderr.
            let text = if output.stdout.is_empty() {
                output.stderr
            } else {
                output.stdout
            };
            Some(String::from_utf8_lossy(&text).trim().to_string())
        } else {
            None
        }
    }
}

impl Default for PythonAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn bootstrap_args(entry_point: &EntryPoint, search_path: &[PathBuf]) -> Vec<String> {
    [entry_point.module.clone(), entry_point.function.clone()]
        .into_iter()
        .chain(search_path.iter().map(|p| p.to_string_lossy().to_string()))
        .collect()
}

async fn drain(mut stderr: ChildStderr) -> String {
    let mut buf = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut buf).await {
        debug!("Stopped reading agent stderr: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Stderr gathered so far. A grandchild holding the pipe open is not waited on.
async fn collect_stderr(handle: JoinHandle<String>) -> String {
    match tokio::time::timeout(STDERR_GRACE, handle).await {
        Ok(Ok(text)) => text,
        _ => String::new(),
    }
}

fn log_stderr(stderr: &str) {
    for line in stderr.lines() {
        debug!("[agent stderr] {}", line);
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("interpreter exited with code {}", c),
        None => "interpreter terminated by signal".to_string(),
    }
}

#[async_trait]
impl AgentAdapter for PythonAdapter {
    fn agent_type(&self) -> AgentType {
        AgentType::Python
    }

    async fn resolve(&self, config: &AgentConfig) -> Result<ResolvedEntryPoint, AgentError> {
        let version = self.version().await.ok_or_else(|| {
            AgentError::NotFound(format!("Python interpreter '{}' is not available", self.command))
        })?;

        let mut cmd = Command::new(&self.command);
        cmd.arg("-c")
            .arg(BOOTSTRAP)
            .args(bootstrap_args(&config.entry_point, &config.search_path))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &config.env_vars {
            cmd.env(key, value);
        }

        debug!("Importing {} with {}", config.entry_point, self.command);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AgentError::NotFound(format!("{} ({})", self.command, e))
            } else {
                AgentError::Config(format!("Failed to spawn {}: {}", self.command, e))
            }
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(AgentError::Config(
                "interpreter stdio was not captured".to_string(),
            ));
        };

        let stderr = tokio::spawn(drain(stderr));
        let mut results = BufReader::new(stdout);
        let mut marker = String::new();

        // Dropping the child on timeout kills it.
        let read = with_timeout(config.timeout, async {
            Ok::<_, AgentError>(results.read_line(&mut marker).await?)
        })
        .await?;

        if read == 0 {
            let status = with_timeout(config.timeout, async {
                Ok::<_, AgentError>(child.wait().await?)
            })
            .await?;
            let stderr = collect_stderr(stderr).await;
            log_stderr(&stderr);

            let message = last_line(&stderr).unwrap_or_else(|| describe_exit(status.code()));
            return Err(AgentError::ImportFailed {
                entry_point: config.entry_point.to_string(),
                message,
                trace: stderr,
            });
        }

        let marker: ImportMarker = serde_json::from_str(marker.trim())
            .map_err(|e| AgentError::MalformedOutput(format!("{}: {:?}", e, marker)))?;
        let location = marker.imported.map(PathBuf::from);

        match &location {
            Some(path) => debug!("Imported {} from {}", config.entry_point, path.display()),
            None => debug!("Imported {} (no source file)", config.entry_point),
        }

        *self.session.lock().await = Some(Session {
            child,
            stdin,
            results,
            stderr,
        });

        Ok(ResolvedEntryPoint {
            entry_point: config.entry_point.clone(),
            program: PathBuf::from(&self.command),
            location,
            version: Some(version),
        })
    }

    async fn invoke(
        &self,
        config: &AgentConfig,
        resolved: &ResolvedEntryPoint,
        call: &AgentCall,
    ) -> Result<AgentOutput, AgentError> {
        let start = Instant::now();

        let Session {
            mut child,
            stdin,
            mut results,
            stderr,
        } = self.session.lock().await.take().ok_or_else(|| {
            AgentError::Config(format!("{} has not been resolved", resolved.entry_point))
        })?;

        let payload = serde_json::to_vec(call).map_err(|e| AgentError::Encode(e.to_string()))?;

        info!(
            "Invoking {} with {}",
            resolved.entry_point,
            resolved.program.display()
        );

        let exchange = async {
            let read = async {
                let mut out = Vec::new();
                results.read_to_end(&mut out).await.map(|_| out)
            };
            let (written, out) = tokio::join!(write_call(stdin, &payload), read);
            written?;
            let out = out?;
            let status = child.wait().await?;
            Ok::<_, AgentError>((status, out))
        };
        let (status, stdout) = with_timeout(config.timeout, exchange).await?;
        let duration = start.elapsed();

        let stdout = String::from_utf8_lossy(&stdout).to_string();
        let stderr = collect_stderr(stderr).await;
        log_stderr(&stderr);

        match status.code() {
            Some(0) => {}
            Some(CALL_FAILED_EXIT) => {
                return Err(AgentError::ExecutionFailed {
                    message: last_line(&stderr).unwrap_or_else(|| "exception raised".to_string()),
                    trace: stderr,
                });
            }
            code => {
                return Err(AgentError::ExecutionFailed {
                    message: describe_exit(code),
                    trace: stderr,
                });
            }
        }

        let result: BootstrapResult = serde_json::from_str(stdout.trim())
            .map_err(|e| AgentError::MalformedOutput(format!("{}: {:?}", e, stdout)))?;

        info!(
            "{} returned {} in {:?}",
            resolved.entry_point, result.type_name, duration
        );

        Ok(AgentOutput {
            type_name: result.type_name,
            value: result.value,
            stderr,
            duration,
        })
    }
}
