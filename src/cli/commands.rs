//! CLI definition for miner-harness.
//!
//! A single command: resolve the agent entry point, run it once against the
//! sample request, report, and exit 0 on success or 1 on failure.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::runner::{AgentType, DirectHarness, HarnessConfig, HarnessStatus};

/// Default agent subdirectory, relative to the base directory.
const DEFAULT_AGENT_DIR: &str = "ridges";

/// Default module holding the entry point.
const DEFAULT_MODULE: &str = "miner.top_miner_v2";

/// Default entry point function.
const DEFAULT_FUNCTION: &str = "agent_main";

/// Repository directory placeholder handed to the agent.
const DEFAULT_REPO_DIR: &str = "test_repo";

/// Direct smoke test for a miner agent.
#[derive(Parser, Debug)]
#[command(name = "miner-harness")]
#[command(about = "Run a miner agent's entry point once against a sample bug-fix request")]
#[command(version)]
#[command(
    long_about = "miner-harness bypasses the full evaluation infrastructure and calls the agent directly.\n\nIt prepends the agent directory to the search path, resolves the entry point, calls it with a fixed request, and checks that the result contains a 'patch' key.\n\nExample usage:\n  miner-harness --agent-dir ridges --module miner.top_miner_v2 --function agent_main"
)]
pub struct Cli {
    /// Directory the agent directory is resolved against.
    #[arg(long, env = "MINER_HARNESS_BASE_DIR", default_value = ".")]
    pub base_dir: PathBuf,

    /// Agent directory prepended to the search path.
    #[arg(long, default_value = DEFAULT_AGENT_DIR)]
    pub agent_dir: PathBuf,

    /// Extra search path entries, searched after the agent directory.
    #[arg(long = "search-path")]
    pub search_paths: Vec<PathBuf>,

    /// Dotted module path of the entry point.
    #[arg(short = 'm', long, default_value = DEFAULT_MODULE)]
    pub module: String,

    /// Entry point function name.
    #[arg(short = 'f', long, default_value = DEFAULT_FUNCTION)]
    pub function: String,

    /// How to reach the agent (python, process).
    #[arg(short = 'a', long, default_value = "python")]
    pub adapter: AgentType,

    /// Python interpreter used by the python adapter.
    #[arg(long, env = "MINER_HARNESS_PYTHON", default_value = "python3")]
    pub python: String,

    /// Repository directory placeholder passed to the agent.
    #[arg(long, default_value = DEFAULT_REPO_DIR)]
    pub repo_dir: String,

    /// Call the agent with test_mode=False.
    #[arg(long)]
    pub no_test_mode: bool,

    /// Kill the agent after this many seconds (no limit by default).
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// JSON or YAML file replacing the built-in request.
    #[arg(short = 'r', long)]
    pub request: Option<PathBuf>,

    /// Environment variable for the agent, as KEY=VALUE. Repeatable.
    #[arg(short = 'e', long = "env", value_parser = parse_env_pair)]
    pub env_vars: Vec<(String, String)>,

    /// Print the run report as JSON instead of console text.
    #[arg(long)]
    pub json: bool,

    /// Print the request that would be sent and exit.
    #[arg(long)]
    pub print_request: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,
}

impl Cli {
    /// Maps arguments onto the harness configuration.
    pub fn harness_config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::new(&self.base_dir)
            .with_agent(self.adapter)
            .with_agent_dir(&self.agent_dir)
            .with_entry_point(&self.module, &self.function)
            .with_python(&self.python)
            .with_repo_dir(&self.repo_dir)
            .with_test_mode(!self.no_test_mode);

        for dir in &self.search_paths {
            config = config.with_search_path(dir);
        }
        for (key, value) in &self.env_vars {
            config = config.with_env(key, value);
        }
        if let Some(secs) = self.timeout {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(path) = &self.request {
            config = config.with_request_file(path);
        }

        config
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

/// Parses CLI arguments from the process environment.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses arguments and runs.
pub async fn run() -> anyhow::Result<HarnessStatus> {
    let cli = parse_cli();
    run_with_cli(cli).await
}

/// Runs with pre-parsed arguments. Harness failures come back as
/// [`HarnessStatus::Failed`]; `Err` is reserved for output errors.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<HarnessStatus> {
    let harness = DirectHarness::new(cli.harness_config());

    if cli.print_request {
        let request = harness.load_request()?;
        println!("{}", request.to_pretty_json());
        return Ok(HarnessStatus::Passed);
    }

    info!(
        "Running {} from {}",
        harness.config().entry_point,
        harness.config().agent_path().display()
    );

    let report = if cli.json {
        let report = harness.run().await;
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", json).context("Failed to write report")?;
        report
    } else {
        let mut stdout = io::stdout().lock();
        let mut stderr = io::stderr().lock();
        harness.run_with_console(&mut stdout, &mut stderr).await
    };

    Ok(report.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::path::Path;

    #[test]
    fn test_cli_parses() {
        // Verify CLI definition is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["miner-harness"]).expect("should parse");
        assert_eq!(cli.agent_dir, PathBuf::from(DEFAULT_AGENT_DIR));
        assert_eq!(cli.module, DEFAULT_MODULE);
        assert_eq!(cli.function, DEFAULT_FUNCTION);
        assert_eq!(cli.adapter, AgentType::Python);
        assert_eq!(cli.repo_dir, DEFAULT_REPO_DIR);
        assert!(!cli.no_test_mode);
        assert!(cli.timeout.is_none());
        assert!(!cli.json);

        let config = cli.harness_config();
        assert!(config.test_mode);
        assert!(config.timeout.is_none());
        assert_eq!(config.entry_point.to_string(), "miner.top_miner_v2:agent_main");
    }

    #[test]
    fn test_all_options() {
        let cli = Cli::try_parse_from([
            "miner-harness",
            "--base-dir",
            "/work",
            "--agent-dir",
            "agents",
            "--search-path",
            "/opt/lib",
            "-m",
            "solver.main",
            "-f",
            "run",
            "--adapter",
            "process",
            "--repo-dir",
            "repo",
            "--no-test-mode",
            "--timeout",
            "30",
            "-e",
            "API_KEY=abc=def",
            "--json",
        ])
        .expect("should parse");

        let config = cli.harness_config();
        assert_eq!(config.agent_type, AgentType::Process);
        assert_eq!(config.agent_path(), Path::new("/work/agents"));
        assert_eq!(config.extra_search_paths, vec![PathBuf::from("/opt/lib")]);
        assert_eq!(config.entry_point.to_string(), "solver.main:run");
        assert_eq!(config.repo_dir, "repo");
        assert!(!config.test_mode);
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(
            config.env_vars,
            vec![("API_KEY".to_string(), "abc=def".to_string())]
        );
        assert!(cli.json);
    }

    #[test]
    fn test_rejects_unknown_adapter() {
        assert!(Cli::try_parse_from(["miner-harness", "--adapter", "ruby"]).is_err());
    }

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("A=1").unwrap(),
            ("A".to_string(), "1".to_string())
        );
        assert_eq!(parse_env_pair("A=").unwrap(), ("A".to_string(), String::new()));
        assert!(parse_env_pair("=1").is_err());
        assert!(parse_env_pair("A").is_err());
    }
}
