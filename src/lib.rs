//! miner-harness: direct smoke test for miner agents.
//!
//! Resolves an external `agent_main` entry point, calls it once with a fixed
//! bug-fix request, and checks that the result carries a `patch`.

pub mod cli;
pub mod error;
pub mod runner;

pub use error::{FailureKind, HarnessError};
