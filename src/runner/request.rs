//! The test request handed to the agent entry point.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::HarnessError;

/// A bug-fix task description passed by value to `agent_main`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRequest {
    /// What the agent is asked to fix.
    pub problem_statement: String,
    /// Input/expected-output pairs, in order.
    pub test_cases: Vec<TestCase>,
    /// Relevant source snippet.
    pub code_context: String,
}

/// One input/expected pair. Both sides are free-form JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: Value,
    pub expected: Value,
}

impl TestCase {
    pub fn new(input: Value, expected: Value) -> Self {
        Self { input, expected }
    }
}

impl TestRequest {
    /// The built-in payload: a broken `add` that subtracts.
    pub fn sample() -> Self {
        Self {
            problem_statement:
                "Fix the bug in the following code: def add(a, b): return a - b".to_string(),
            test_cases: vec![
                TestCase::new(json!([2, 3]), json!(5)),
                TestCase::new(json!([0, 0]), json!(0)),
            ],
            code_context: "def add(a, b): return a - b  # This is wrong".to_string(),
        }
    }

    /// Loads a request from a JSON or YAML file, picked by extension.
    pub fn from_file(path: &Path) -> Result<Self, HarnessError> {
        let content = fs::read_to_string(path).map_err(|e| {
            HarnessError::Request(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        let request = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| {
                HarnessError::Request(format!("Invalid YAML in {}: {}", path.display(), e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                HarnessError::Request(format!("Invalid JSON in {}: {}", path.display(), e))
            })?
        };

        Ok(request)
    }

    /// Pretty JSON, as echoed on the console before the call.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

impl Default for TestRequest {
    fn default() -> Self {
        Self::sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sample_shape() {
        let request = TestRequest::sample();
        assert!(request.problem_statement.starts_with("Fix the bug"));
        assert_eq!(request.test_cases.len(), 2);
        assert_eq!(request.test_cases[0].input, json!([2, 3]));
        assert_eq!(request.test_cases[0].expected, json!(5));
        assert!(request.code_context.contains("a - b"));
    }

    #[test]
    fn test_sample_serializes_with_snake_case_keys() {
        let value = serde_json::to_value(TestRequest::sample()).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("problem_statement"));
        assert!(obj.contains_key("test_cases"));
        assert!(obj.contains_key("code_context"));
        assert_eq!(value["test_cases"][1]["input"], json!([0, 0]));
    }

    #[test]
    fn test_from_json_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("request.json");
        fs::write(
            &path,
            r#"{"problem_statement":"Fix the bug...","test_cases":[{"input":[2,3],"expected":5}],"code_context":"def add(a, b): return a - b"}"#,
        )
        .unwrap();

        let request = TestRequest::from_file(&path).unwrap();
        assert_eq!(request.problem_statement, "Fix the bug...");
        assert_eq!(request.test_cases.len(), 1);
    }

    #[test]
    fn test_from_yaml_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("request.yaml");
        fs::write(
            &path,
            "problem_statement: Fix it\ntest_cases:\n  - input: [1, 1]\n    expected: 2\ncode_context: \"x\"\n",
        )
        .unwrap();

        let request = TestRequest::from_file(&path).unwrap();
        assert_eq!(request.test_cases[0].input, json!([1, 1]));
        assert_eq!(request.test_cases[0].expected, json!(2));
    }

    #[test]
    fn test_from_missing_file() {
        let err = TestRequest::from_file(Path::new("/nonexistent/request.json")).unwrap_err();
        assert!(matches!(err, HarnessError::Request(_)));
    }
}
