//! Direct harness - resolves the agent entry point, calls it once, reports.

use std::io::{self, Write};
use std::time::Instant;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::agents::{create_adapter, AgentAdapter, AgentCall, AgentConfig};
use super::config::HarnessConfig;
use super::request::TestRequest;
use super::result::{error_trace, AgentResult, FormatCheck, HarnessReport};
use crate::error::HarnessError;

const RULE: &str = "==================================================";

/// Progress text goes to `out`, failure traces to `err`.
struct Console<'a, O: Write, E: Write> {
    out: &'a mut O,
    err: &'a mut E,
}

impl<O: Write, E: Write> Console<'_, O, E> {
    fn line(&mut self, text: impl AsRef<str>) {
        // Losing console output must not turn a passing run into a failure.
        if let Err(e) = writeln!(self.out, "{}", text.as_ref()) {
            debug!("Console write failed: {}", e);
        }
    }

    fn trace(&mut self, text: &str) {
        if let Err(e) = write!(self.err, "{}", text).and_then(|_| self.err.flush()) {
            debug!("Trace write failed: {}", e);
        }
    }
}

/// Single-shot smoke test of an agent entry point.
pub struct DirectHarness {
    config: HarnessConfig,
    adapter: Box<dyn AgentAdapter>,
}

impl DirectHarness {
    /// Creates a harness using the adapter named in the configuration.
    pub fn new(config: HarnessConfig) -> Self {
        let adapter = create_adapter(config.agent_type, &config.python);
        Self { config, adapter }
    }

    /// Creates a harness with an explicit adapter.
    pub fn with_adapter(config: HarnessConfig, adapter: Box<dyn AgentAdapter>) -> Self {
        Self { config, adapter }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The request sent to the agent: the request file if configured,
    /// otherwise the built-in sample.
    pub fn load_request(&self) -> Result<TestRequest, HarnessError> {
        match &self.config.request_path {
            Some(path) => TestRequest::from_file(path),
            None => Ok(TestRequest::sample()),
        }
    }

    /// Runs without console output.
    pub async fn run(&self) -> HarnessReport {
        self.run_with_console(&mut io::sink(), &mut io::sink()).await
    }

    /// Runs the smoke test, writing progress to `out` and failure traces
    /// to `err`. Never returns an error: every failure ends up in the report.
    pub async fn run_with_console<O: Write, E: Write>(
        &self,
        out: &mut O,
        err: &mut E,
    ) -> HarnessReport {
        let run_id = format!("run-{}", Uuid::new_v4());
        let start = Instant::now();
        let mut console = Console { out, err };

        console.line(RULE);
        console.line("Direct Agent Test");
        console.line(RULE);

        info!(
            "Starting run {} against {} via {} adapter",
            run_id, self.config.entry_point, self.config.agent_type
        );

        let report = match self.call_agent(&mut console).await {
            Ok(result) => {
                self.report_result(&mut console, &result);
                HarnessReport::passed(
                    run_id,
                    self.config.entry_point.clone(),
                    self.config.agent_type,
                    start.elapsed(),
                    result,
                )
            }
            Err(e) => {
                error!("Run {} failed ({}): {}", run_id, e.kind(), e);
                console.line(format!("❌ Error testing agent: {}", e));
                console.trace(&error_trace(&e));
                HarnessReport::failed(
                    run_id,
                    self.config.entry_point.clone(),
                    self.config.agent_type,
                    start.elapsed(),
                    &e,
                )
            }
        };

        if report.is_success() {
            console.line("\n🎉 Direct agent test completed successfully!");
        } else {
            console.line("\n💥 Direct agent test failed!");
        }

        info!(
            "Run {} finished in {:?} with status {}",
            report.run_id, report.duration, report.status
        );

        report
    }

    /// Resolution and invocation, inside one error boundary.
    async fn call_agent<O: Write, E: Write>(
        &self,
        console: &mut Console<'_, O, E>,
    ) -> Result<AgentResult, HarnessError> {
        let request = self.load_request()?;
        let agent_config: AgentConfig = self.config.agent_config()?;
        debug!("Search path: {:?}", agent_config.search_path);

        let resolved = self.adapter.resolve(&agent_config).await?;
        match &resolved.location {
            Some(path) => console.line(format!(
                "✅ Resolved {} ({})",
                resolved.entry_point,
                path.display()
            )),
            None => console.line(format!("✅ Resolved {}", resolved.entry_point)),
        }
        if let Some(version) = &resolved.version {
            debug!("Agent runtime: {}", version);
        }

        console.line("🧪 Running agent with test input...");
        console.line(format!("Input: {}", request.to_pretty_json()));

        let call = AgentCall {
            input: request,
            repo_dir: self.config.repo_dir.clone(),
            test_mode: self.config.test_mode,
        };

        let output = self
            .adapter
            .invoke(&agent_config, &resolved, &call)
            .await?;

        Ok(AgentResult::from(output))
    }

    fn report_result<O: Write, E: Write>(
        &self,
        console: &mut Console<'_, O, E>,
        result: &AgentResult,
    ) {
        console.line("✅ Agent execution completed!");
        console.line(format!("Result type: {}", result.type_name));
        console.line(format!("Result: {}", result.to_pretty_json()));

        match result.format_check() {
            FormatCheck::Correct => {
                console.line("✅ Result format is correct (contains 'patch' key)");
            }
            FormatCheck::MissingPatch => {
                warn!("Agent result has no 'patch' key");
                console.line("⚠️  Result format may be incorrect (should contain 'patch' key)");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::runner::agents::{AgentError, AgentOutput, AgentType, ResolvedEntryPoint};
    use crate::runner::result::HarnessStatus;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-process stand-in for an agent.
    enum Behavior {
        Return(&'static str, Value),
        Raise(&'static str),
        Missing,
    }

    struct StubAdapter {
        behavior: Behavior,
        calls: Mutex<Vec<AgentCall>>,
    }

    impl StubAdapter {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AgentAdapter for StubAdapter {
        fn agent_type(&self) -> AgentType {
            AgentType::Process
        }

        async fn resolve(&self, config: &AgentConfig) -> Result<ResolvedEntryPoint, AgentError> {
            if matches!(self.behavior, Behavior::Missing) {
                return Err(AgentError::NotFound(config.entry_point.module.clone()));
            }
            Ok(ResolvedEntryPoint {
                entry_point: config.entry_point.clone(),
                program: PathBuf::from("stub"),
                location: None,
                version: None,
            })
        }

        async fn invoke(
            &self,
            _config: &AgentConfig,
            _resolved: &ResolvedEntryPoint,
            call: &AgentCall,
        ) -> Result<AgentOutput, AgentError> {
            self.calls.lock().unwrap().push(call.clone());
            match &self.behavior {
                Behavior::Return(type_name, value) => Ok(AgentOutput {
                    type_name: type_name.to_string(),
                    value: value.clone(),
                    stderr: String::new(),
                    duration: Duration::from_millis(1),
                }),
                Behavior::Raise(msg) => Err(AgentError::ExecutionFailed {
                    message: msg.to_string(),
                    trace: format!("Traceback (most recent call last):\n{}\n", msg),
                }),
                Behavior::Missing => unreachable!("resolve fails first"),
            }
        }
    }

    async fn run_stub(behavior: Behavior) -> (HarnessReport, String, String) {
        let harness = DirectHarness::with_adapter(
            HarnessConfig::default(),
            Box::new(StubAdapter::new(behavior)),
        );
        let mut out = Vec::new();
        let mut err = Vec::new();
        let report = harness.run_with_console(&mut out, &mut err).await;
        (
            report,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_patch_result_passes() {
        let (report, out, _) =
            run_stub(Behavior::Return("dict", json!({"patch": "--- a\n+++ b\n"}))).await;

        assert_eq!(report.status, HarnessStatus::Passed);
        assert_eq!(report.format, Some(FormatCheck::Correct));
        assert!(out.contains("Input: {"));
        assert!(out.contains("\"problem_statement\""));
        assert!(out.contains("Result type: dict"));
        assert!(out.contains("Result format is correct"));
        assert!(out.contains("completed successfully"));
    }

    #[tokio::test]
    async fn test_missing_patch_warns_but_passes() {
        let (report, out, _) = run_stub(Behavior::Return("dict", json!({}))).await;
        assert!(report.is_success());
        assert!(report.has_format_warning());
        assert!(out.contains("Result format may be incorrect"));
        assert!(!out.contains("Result format is correct"));
    }

    #[tokio::test]
    async fn test_non_mapping_result_warns_but_passes() {
        let (report, out, _) = run_stub(Behavior::Return("str", json!("patch"))).await;
        assert_eq!(report.status.exit_code(), 0);
        assert!(out.contains("Result type: str"));
        assert!(out.contains("Result format may be incorrect"));
    }

    #[tokio::test]
    async fn test_raise_fails_with_trace() {
        let (report, out, err) = run_stub(Behavior::Raise("ValueError: boom")).await;
        assert_eq!(report.status, HarnessStatus::Failed);
        assert_eq!(report.failure, Some(FailureKind::Invocation));
        assert_eq!(report.status.exit_code(), 1);
        assert!(out.contains("❌ Error testing agent:"));
        assert!(out.contains("ValueError: boom"));
        assert!(out.contains("test failed"));
        assert!(err.contains("Traceback"));
    }

    #[tokio::test]
    async fn test_unresolvable_entry_point_fails() {
        let (report, out, _) = run_stub(Behavior::Missing).await;
        assert_eq!(report.failure, Some(FailureKind::Resolution));
        assert!(!out.contains("Running agent"));
        assert!(report.result.is_none());
    }

    #[tokio::test]
    async fn test_call_arguments() {
        let adapter = std::sync::Arc::new(StubAdapter::new(Behavior::Return(
            "dict",
            json!({"patch": ""}),
        )));

        struct Shared(std::sync::Arc<StubAdapter>);

        #[async_trait]
        impl AgentAdapter for Shared {
            fn agent_type(&self) -> AgentType {
                self.0.agent_type()
            }
            async fn resolve(&self, c: &AgentConfig) -> Result<ResolvedEntryPoint, AgentError> {
                self.0.resolve(c).await
            }
            async fn invoke(
                &self,
                c: &AgentConfig,
                r: &ResolvedEntryPoint,
                call: &AgentCall,
            ) -> Result<AgentOutput, AgentError> {
                self.0.invoke(c, r, call).await
            }
        }

        let harness = DirectHarness::with_adapter(
            HarnessConfig::default(),
            Box::new(Shared(adapter.clone())),
        );
        harness.run().await;

        let calls = adapter.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].repo_dir, "test_repo");
        assert!(calls[0].test_mode);
        assert_eq!(calls[0].input, TestRequest::sample());
    }

    #[tokio::test]
    async fn test_bad_request_file_fails_before_agent() {
        let config = HarnessConfig::default().with_request_file("/nonexistent/request.json");
        let adapter = StubAdapter::new(Behavior::Return("dict", json!({"patch": ""})));
        let harness = DirectHarness::with_adapter(config, Box::new(adapter));

        let report = harness.run().await;
        assert_eq!(report.failure, Some(FailureKind::Request));
    }
}
