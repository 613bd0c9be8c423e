use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single hidden test case supplied by the curriculum store.
///
/// `input` is either one value (passed as the only argument) or a list of
/// positional arguments. An empty list or `null` means "call with no
/// arguments".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub input: Value,
    pub expected: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TestCase {
    pub fn new(input: Value, expected: Value) -> Self {
        Self {
            input,
            expected,
            description: None,
        }
    }

    /// Positional arguments for the call, in order.
    pub fn arguments(&self) -> Vec<Value> {
        match &self.input {
            Value::Null => Vec::new(),
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(alias = "code")]
    pub source: String,
    #[serde(default, rename = "testCases", alias = "test_cases")]
    pub test_cases: Vec<TestCase>,
}

/// Raw result of one interpreter run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl ProcessResult {
    /// Failure shape used when the interpreter could not be run at all.
    pub fn spawn_failure(message: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: 1,
            timed_out: false,
            execution_time_ms,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestVerdict {
    /// 1-based position of the test case
    #[serde(rename = "test_case")]
    pub index: usize,
    pub passed: bool,
    pub input: Value,
    pub expected: Value,
    #[serde(default)]
    pub actual: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TestVerdict {
    /// A failed verdict for a test case that produced no usable result.
    pub fn failed(position: usize, test_case: &TestCase, error: impl Into<String>) -> Self {
        Self {
            index: position + 1,
            passed: false,
            input: test_case.input.clone(),
            expected: test_case.expected.clone(),
            actual: None,
            error: Some(error.into()),
        }
    }
}

/// Envelope handed back to the HTTP layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub success: bool,
    pub execution_time_ms: u64,
    /// `None` for plain runs; graded runs always carry a list, even an empty one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_verdicts: Option<Vec<TestVerdict>>,
    pub console_output: String,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn verdicts(&self) -> &[TestVerdict] {
        self.test_verdicts.as_deref().unwrap_or(&[])
    }

    pub fn passed_count(&self) -> usize {
        self.verdicts().iter().filter(|v| v.passed).count()
    }
}
