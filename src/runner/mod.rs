//! Direct harness for smoke-testing an agent entry point in isolation.
//!
//! # Architecture
//!
//! ```text
//! TestRequest → DirectHarness → AgentAdapter (resolve, invoke) → AgentResult → format check
//! ```
//!
//! The harness:
//! 1. Prepends the agent directory to the search path
//! 2. Resolves `miner.top_miner_v2:agent_main` through an adapter
//! 3. Calls it once with the fixed request, `repo_dir` and `test_mode`
//! 4. Reports the result type, the value and whether it carries a `patch`
//!
//! # Example
//!
//! ```ignore
//! use miner_harness::runner::{DirectHarness, HarnessConfig};
//!
//! let config = HarnessConfig::new(".").with_agent_dir("ridges");
//! let report = DirectHarness::new(config).run().await;
//!
//! std::process::exit(report.status.exit_code().into());
//! ```

pub mod agents;
pub mod config;
pub mod executor;
pub mod request;
pub mod result;

pub use agents::{AgentAdapter, AgentCall, AgentError, AgentType, EntryPoint};
pub use config::HarnessConfig;
pub use executor::DirectHarness;
pub use request::{TestCase, TestRequest};
pub use result::{AgentResult, FormatCheck, HarnessReport, HarnessStatus};
