//! Agent results, the patch format check, and the harness report.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::agents::{AgentOutput, AgentType, EntryPoint};
use crate::error::{FailureKind, HarnessError};

/// Key the agent result is expected to carry.
pub const PATCH_KEY: &str = "patch";

/// Maximum length of captured diagnostics kept in a report.
const MAX_TRACE_LEN: usize = 10_000;

/// Value returned by `agent_main`, with its runtime type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    /// Runtime type name as seen by the agent (`dict`, `object`, ...).
    pub type_name: String,
    /// The returned value, uninterpreted.
    pub value: Value,
}

impl AgentResult {
    pub fn new(type_name: impl Into<String>, value: Value) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }

    /// Checks that the value is a mapping containing a `patch` entry.
    /// The patch content itself is not inspected.
    pub fn format_check(&self) -> FormatCheck {
        match &self.value {
            Value::Object(map) if map.contains_key(PATCH_KEY) => FormatCheck::Correct,
            _ => FormatCheck::MissingPatch,
        }
    }

    /// The `patch` entry, if present.
    pub fn patch(&self) -> Option<&Value> {
        self.value.as_object().and_then(|m| m.get(PATCH_KEY))
    }

    /// Pretty JSON dump of the value.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.value).unwrap_or_else(|_| self.value.to_string())
    }
}

impl From<AgentOutput> for AgentResult {
    fn from(output: AgentOutput) -> Self {
        Self::new(output.type_name, output.value)
    }
}

/// Outcome of the structural check. A miss is a warning, never a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatCheck {
    Correct,
    MissingPatch,
}

impl FormatCheck {
    pub fn is_correct(&self) -> bool {
        matches!(self, FormatCheck::Correct)
    }
}

/// Overall outcome of a harness run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarnessStatus {
    /// Entry point resolved and returned without raising.
    Passed,
    /// Resolution or invocation failed.
    Failed,
}

impl HarnessStatus {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            HarnessStatus::Passed => 0,
            HarnessStatus::Failed => 1,
        }
    }
}

impl std::fmt::Display for HarnessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HarnessStatus::Passed => write!(f, "passed"),
            HarnessStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Complete record of one harness run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessReport {
    /// Unique identifier for this run.
    pub run_id: String,
    /// Entry point that was targeted.
    pub entry_point: EntryPoint,
    /// Adapter used.
    pub agent_type: AgentType,
    /// Overall outcome.
    pub status: HarnessStatus,
    /// What went wrong, when the run failed.
    pub failure: Option<FailureKind>,
    /// Error message, when the run failed.
    pub error: Option<String>,
    /// Agent diagnostics and error chain (truncated).
    pub trace: Option<String>,
    /// The agent's return value.
    pub result: Option<AgentResult>,
    /// Structural check of the return value.
    pub format: Option<FormatCheck>,
    /// Timestamp when the run started.
    pub started_at: DateTime<Utc>,
    /// Timestamp when the run completed.
    pub completed_at: DateTime<Utc>,
    /// Total duration of the run.
    pub duration: Duration,
}

impl HarnessReport {
    /// Creates a passing report for a returned value.
    pub fn passed(
        run_id: impl Into<String>,
        entry_point: EntryPoint,
        agent_type: AgentType,
        duration: Duration,
        result: AgentResult,
    ) -> Self {
        let now = Utc::now();
        let format = result.format_check();
        Self {
            run_id: run_id.into(),
            entry_point,
            agent_type,
            status: HarnessStatus::Passed,
            failure: None,
            error: None,
            trace: None,
            result: Some(result),
            format: Some(format),
            started_at: now - chrono::Duration::from_std(duration).unwrap_or_default(),
            completed_at: now,
            duration,
        }
    }

    /// Creates a failing report from the error that ended the run.
    pub fn failed(
        run_id: impl Into<String>,
        entry_point: EntryPoint,
        agent_type: AgentType,
        duration: Duration,
        error: &HarnessError,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            entry_point,
            agent_type,
            status: HarnessStatus::Failed,
            failure: Some(error.kind()),
            error: Some(error.to_string()),
            trace: Some(truncate_string(error_trace(error), MAX_TRACE_LEN)),
            result: None,
            format: None,
            started_at: now - chrono::Duration::from_std(duration).unwrap_or_default(),
            completed_at: now,
            duration,
        }
    }

    /// Returns true if the run passed.
    pub fn is_success(&self) -> bool {
        self.status == HarnessStatus::Passed
    }

    /// Returns true if the run passed but the result lacks a patch.
    pub fn has_format_warning(&self) -> bool {
        self.format == Some(FormatCheck::MissingPatch)
    }
}

/// Renders the error source chain followed by any agent-side trace.
pub fn error_trace(error: &HarnessError) -> String {
    let mut out = String::from("Error chain:\n");
    let mut current: Option<&dyn std::error::Error> = Some(error);
    let mut depth = 0;
    while let Some(err) = current {
        out.push_str(&format!("  {}: {}\n", depth, err));
        current = err.source();
        depth += 1;
    }

    if let HarnessError::Agent(agent_err) = error {
        if let Some(trace) = agent_err.trace() {
            out.push_str("Agent trace:\n");
            out.push_str(trace.trim_end());
            out.push('\n');
        }
    }

    out
}

/// Truncates a string to at most `max_len` bytes on a char boundary.
fn truncate_string(s: String, max_len: usize) -> String {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}
