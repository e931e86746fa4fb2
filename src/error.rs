//! Error types for harness operations.
//!
//! Failures are split the way they are reported:
//! - Resolution: the agent entry point could not be located or imported
//! - Invocation: the entry point was reached but the call did not return a value
//! - Request: the test request could not be loaded (before any agent is touched)

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runner::agents::AgentError;

/// Errors that can occur while running the direct harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Invalid test request: {0}")]
    Request(String),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Classifies the error for reporting.
    pub fn kind(&self) -> FailureKind {
        match self {
            HarnessError::Agent(e) => e.kind(),
            HarnessError::Request(_) => FailureKind::Request,
            HarnessError::Io(_) => FailureKind::Invocation,
        }
    }
}

/// Category of a harness failure. All of them map to the same exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Module, function, interpreter or executable could not be found.
    Resolution,
    /// The entry point raised, exited non-zero, timed out or returned garbage.
    Invocation,
    /// The request file was unreadable.
    Request,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Resolution => write!(f, "resolution"),
            FailureKind::Invocation => write!(f, "invocation"),
            FailureKind::Request => write!(f, "request"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_classification() {
        assert_eq!(HarnessError::Request("x".into()).kind(), FailureKind::Request);

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        assert_eq!(HarnessError::from(io).kind(), FailureKind::Invocation);
    }

    #[test]
    fn test_agent_error_kind_passes_through() {
        let err: HarnessError = AgentError::NotFound("miner.top_miner_v2".into()).into();
        assert_eq!(err.kind(), FailureKind::Resolution);

        let err: HarnessError = AgentError::ImportFailed {
            entry_point: "miner.top_miner_v2:agent_main".into(),
            message: "No module named 'miner'".into(),
            trace: String::new(),
        }
        .into();
        assert_eq!(err.kind(), FailureKind::Resolution);

        let err: HarnessError = AgentError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(err.kind(), FailureKind::Invocation);

        let err: HarnessError = AgentError::Encode("bad".into()).into();
        assert_eq!(err.kind(), FailureKind::Invocation);
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::Resolution.to_string(), "resolution");
        assert_eq!(FailureKind::Invocation.to_string(), "invocation");
    }
}
