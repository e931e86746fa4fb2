//! Command-line interface for miner-harness.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
