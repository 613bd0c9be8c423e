/// Test Harness Generator
///
/// Turns a student's function plus a list of test cases into one standalone
/// program. Each test case becomes an independent call whose outcome is
/// printed as a single marker line:
///
/// ```text
/// @@KATA_RESULT_<nonce>@@{"index":0,"passed":true,"input":[2,3],"expected":5,"actual":5,"error":null}
/// ```
///
/// The nonce is fresh per build and lives only inside the harness closure.
/// While the student's function runs, `sys.stdout` points at a buffer; the
/// buffer is replayed with every marker occurrence removed, so prints from
/// the function cannot produce a result line. Lines are flushed as they are
/// produced: if the process dies at test K, tests 1..K-1 are already on
/// stdout.
///
/// Introspection (closures, frames) can still reach the harness internals,
/// the same limit the static guard has.

use crate::guard::FUNCTION_DEFINITION;
use kata_common::types::TestCase;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("No function definition found")]
    NoFunctionDefinition,
    #[error("Failed to encode test case {index}: {source}")]
    Encode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

lazy_static! {
    static ref TOP_LEVEL_DEFINITION: Regex =
        Regex::new(r"(?m)^def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap();
}

/// Program text ready for the runner, plus what the parser needs to read it back.
#[derive(Debug, Clone)]
pub struct HarnessProgram {
    pub text: String,
    pub marker: String,
    pub function_name: String,
}

// Helpers appended after the student's source. Everything the harness needs
// at run time lives in the `_kata_harness` closure: the marker and the real
// stdout are never bound to module globals the student's function can read.
const PRELUDE: &str = r#"

# ---- kata test harness ----
import json as _kata_json


def _kata_harness(marker):
    import json
    import signal
    import sys

    real_stdout = sys.stdout
    state = {"active": False, "timed_out": False}
    timeout_message = "Code execution timed out"
    capture_limit = 1 << 20

    class KataTimeout(BaseException):
        pass

    class Capture:
        def __init__(self):
            self.parts = []
            self.size = 0

        def write(self, text):
            text = str(text)
            if self.size < capture_limit:
                self.parts.append(text[: capture_limit - self.size])
            self.size += len(text)
            return len(text)

        def flush(self):
            pass

        def getvalue(self):
            return "".join(self.parts)

    def scrub(text):
        while marker in text:
            text = text.replace(marker, "")
        return text

    def show(text):
        if text:
            real_stdout.write(scrub(text))
            real_stdout.flush()

    def describe(exc):
        try:
            message = str(exc)
        except BaseException:
            message = ""
        return message if message else type(exc).__name__

    def jsonable(value):
        if value is None or isinstance(value, (bool, int, float, str)):
            return value
        if isinstance(value, (list, tuple)):
            return [jsonable(item) for item in value]
        if isinstance(value, (set, frozenset)):
            try:
                items = sorted(value)
            except TypeError:
                items = list(value)
            return [jsonable(item) for item in items]
        if isinstance(value, dict):
            return {(k if isinstance(k, str) else str(k)): jsonable(v) for k, v in value.items()}
        return repr(value)

    def equal(actual, expected):
        if isinstance(expected, bool) or isinstance(actual, bool):
            return isinstance(actual, bool) and isinstance(expected, bool) and actual == expected
        if isinstance(expected, dict):
            if not isinstance(actual, dict):
                return False
            actual = {(k if isinstance(k, str) else str(k)): v for k, v in actual.items()}
            return len(actual) == len(expected) and all(
                key in actual and equal(actual[key], value) for key, value in expected.items()
            )
        if isinstance(expected, list):
            if isinstance(actual, tuple):
                actual = list(actual)
            return isinstance(actual, list) and len(actual) == len(expected) and all(
                equal(a, e) for a, e in zip(actual, expected)
            )
        return bool(actual == expected)

    def emit(index, passed, input_value, expected, actual, error):
        record = {
            "index": index,
            "passed": passed,
            "input": input_value,
            "expected": expected,
            "actual": actual,
            "error": error,
        }
        try:
            line = json.dumps(record, allow_nan=False)
        except (TypeError, ValueError, RecursionError):
            record["actual"] = None if actual is None else repr(actual)
            line = json.dumps(record, allow_nan=False)
        real_stdout.write(marker + line + "\n")
        real_stdout.flush()

    def evaluate(name, args, expected, echo):
        func = globals().get(name)
        if not callable(func):
            return False, None, "Function " + name + " not found"

        banner = None
        capture = Capture()
        sys.stdout = capture
        try:
            try:
                result = func(*args)
            except KataTimeout:
                raise
            except BaseException as exc:
                return False, None, describe(exc)

            if echo:
                try:
                    banner = ">>> " + name + "()\n" + str(result) + "\n"
                except KataTimeout:
                    raise
                except BaseException:
                    banner = None

            try:
                passed = equal(result, expected)
            except KataTimeout:
                raise
            except BaseException:
                passed = False

            try:
                actual = jsonable(result)
                json.dumps(actual, allow_nan=False)
            except KataTimeout:
                raise
            except BaseException as exc:
                return passed, None, describe(exc)
            return passed, actual, None
        finally:
            sys.stdout = real_stdout
            show(capture.getvalue())
            show(banner)

    def run_case(index, name, args, input_value, expected, echo):
        if state["timed_out"]:
            emit(index, False, input_value, expected, None, timeout_message)
            return
        try:
            state["active"] = True
            passed, actual, error = evaluate(name, args, expected, echo)
        except KataTimeout:
            passed, actual, error = False, None, timeout_message
        finally:
            state["active"] = False
            sys.stdout = real_stdout
        emit(index, passed, input_value, expected, actual, error)

    def run(index, name, args, input_value, expected, echo):
        try:
            run_case(index, name, args, input_value, expected, echo)
        except KataTimeout:
            sys.stdout = real_stdout
            emit(index, False, input_value, expected, None, timeout_message)

    def on_alarm(signum, frame):
        state["timed_out"] = True
        if state["active"]:
            state["active"] = False
            raise KataTimeout(timeout_message)

    def arm(seconds):
        if hasattr(signal, "SIGALRM"):
            signal.signal(signal.SIGALRM, on_alarm)
            signal.setitimer(signal.ITIMER_REAL, seconds)

    def disarm():
        if hasattr(signal, "SIGALRM"):
            signal.setitimer(signal.ITIMER_REAL, 0)

    return run, arm, disarm


_kata_run, _kata_arm, _kata_disarm = _kata_harness("__KATA_MARKER__")
del _kata_harness
"#;

// The alarm only interrupts a running test; between tests it just marks the
// remaining ones as timed out.
const ALARM_ON: &str = "\n_kata_arm(__KATA_SECONDS__)\n";

const ALARM_OFF: &str = "\n_kata_disarm()\n";

/// Encode a JSON value as a Python expression that rebuilds it.
///
/// The JSON text is wrapped in a JSON string literal, which is also a valid
/// Python string literal, and decoded at runtime.
fn python_json(value: &Value, index: usize) -> Result<String, HarnessError> {
    let encode = |e| HarnessError::Encode { index, source: e };
    let json = serde_json::to_string(value).map_err(encode)?;
    let literal = serde_json::to_string(&json).map_err(encode)?;
    Ok(format!("_kata_json.loads({})", literal))
}

/// Name of the function under test: the first top-level `def`, otherwise the
/// first `def` at any depth.
pub fn extract_function_name(source: &str) -> Option<String> {
    TOP_LEVEL_DEFINITION
        .captures(source)
        .or_else(|| FUNCTION_DEFINITION.captures(source))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone, Default)]
pub struct TestHarnessGenerator {
    /// Budget for the in-program alarm; `None` leaves timing to the runner
    in_program_timeout: Option<Duration>,
}

impl TestHarnessGenerator {
    pub fn new(in_program_timeout: Option<Duration>) -> Self {
        Self { in_program_timeout }
    }

    /// Derive the in-program budget from the runner's wall-clock bound.
    ///
    /// The alarm fires a little early so the harness can still report the
    /// remaining tests before the runner kills the process.
    pub fn with_runner_timeout(runner_timeout: Duration) -> Self {
        let margin = (runner_timeout / 10).max(Duration::from_millis(100));
        let budget = runner_timeout.saturating_sub(margin);
        Self::new((!budget.is_zero()).then_some(budget))
    }

    pub fn in_program_timeout(&self) -> Option<Duration> {
        self.in_program_timeout
    }

    pub fn build(&self, source: &str, test_cases: &[TestCase]) -> Result<HarnessProgram, HarnessError> {
        let function_name = extract_function_name(source).ok_or(HarnessError::NoFunctionDefinition)?;
        let marker = format!("@@KATA_RESULT_{}@@", uuid::Uuid::new_v4().simple());

        let mut text = String::with_capacity(source.len() + PRELUDE.len() + test_cases.len() * 256);
        text.push_str(source);
        if !source.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&PRELUDE.replace("__KATA_MARKER__", &marker));

        if let Some(budget) = self.in_program_timeout {
            let seconds = format!("{:.3}", budget.as_secs_f64());
            text.push_str(&ALARM_ON.replace("__KATA_SECONDS__", &seconds));
        }

        let name_literal = serde_json::to_string(&function_name)
            .map_err(|e| HarnessError::Encode { index: 0, source: e })?;

        for (index, test_case) in test_cases.iter().enumerate() {
            let args = python_json(&Value::Array(test_case.arguments()), index)?;
            let input = python_json(&test_case.input, index)?;
            let expected = python_json(&test_case.expected, index)?;
            let echo = if index == 0 { "True" } else { "False" };

            // writing to a String cannot fail
            let _ = write!(
                text,
                "\n# Test case {}\n_kata_run({}, {}, {}, {}, {}, {})\n",
                index + 1,
                index,
                name_literal,
                args,
                input,
                expected,
                echo
            );
        }

        if self.in_program_timeout.is_some() {
            text.push_str(ALARM_OFF);
        }

        Ok(HarnessProgram {
            text,
            marker,
            function_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cases() -> Vec<TestCase> {
        vec![
            TestCase::new(json!([2, 3]), json!(5)),
            TestCase::new(json!([]), json!([1, 2, 3])),
            TestCase::new(json!("it's \"quoted\"\n"), json!({"a": [true, null]})),
        ]
    }

    #[test]
    fn test_extract_function_name() {
        assert_eq!(extract_function_name("def add(a, b):\n    return a + b").as_deref(), Some("add"));
        assert_eq!(extract_function_name("x = 1\nprint(x)"), None);
    }

    #[test]
    fn test_prefers_top_level_function() {
        let source = "class Helper:\n    def method(self):\n        return 1\n\ndef solve():\n    return Helper().method()\n";
        assert_eq!(extract_function_name(source).as_deref(), Some("solve"));

        let nested_only = "if True:\n    def inner():\n        return 1\n";
        assert_eq!(extract_function_name(nested_only).as_deref(), Some("inner"));
    }

    #[test]
    fn test_build_without_function_fails() {
        let generator = TestHarnessGenerator::default();
        let err = generator.build("print('hi')", &cases()).unwrap_err();
        assert_eq!(err.to_string(), "No function definition found");
    }

    #[test]
    fn test_source_is_emitted_verbatim_first() {
        let source = "def add(a, b):\n    return a + b";
        let program = TestHarnessGenerator::default().build(source, &cases()).unwrap();

        assert!(program.text.starts_with(source));
        assert_eq!(program.function_name, "add");
    }

    #[test]
    fn test_one_block_per_case_in_order() {
        let program = TestHarnessGenerator::default()
            .build("def f(*args):\n    return 1", &cases())
            .unwrap();

        let calls: Vec<&str> = program
            .text
            .lines()
            .filter(|line| line.starts_with("_kata_run("))
            .collect();

        assert_eq!(calls.len(), 3);
        assert!(calls[0].starts_with("_kata_run(0, \"f\", "));
        assert!(calls[0].ends_with(", True)"));
        assert!(calls[1].starts_with("_kata_run(1, \"f\", "));
        assert!(calls[1].ends_with(", False)"));
        assert!(calls[2].starts_with("_kata_run(2, \"f\", "));
    }

    #[test]
    fn test_arguments_are_embedded_as_json_literals() {
        let program = TestHarnessGenerator::default()
            .build("def add(a, b):\n    return a + b", &cases()[..1])
            .unwrap();

        assert!(program
            .text
            .contains(r#"_kata_run(0, "add", _kata_json.loads("[2,3]"), _kata_json.loads("[2,3]"), _kata_json.loads("5"), True)"#));
    }

    #[test]
    fn test_quotes_and_newlines_are_escaped() {
        let program = TestHarnessGenerator::default()
            .build("def f(s):\n    return s", &cases()[2..])
            .unwrap();

        // the JSON text "it's \"quoted\"\n" survives two rounds of escaping
        assert!(program
            .text
            .contains(r#"_kata_json.loads("[\"it's \\\"quoted\\\"\\n\"]")"#));
        assert!(!program.text.contains("quoted\"\n\""));
    }

    #[test]
    fn test_marker_is_unique_per_build() {
        let generator = TestHarnessGenerator::default();
        let a = generator.build("def f():\n    return 1", &[]).unwrap();
        let b = generator.build("def f():\n    return 1", &[]).unwrap();

        assert_ne!(a.marker, b.marker);
        assert!(a.marker.starts_with("@@KATA_RESULT_"));
        assert!(a.text.contains(&format!("_kata_harness(\"{}\")", a.marker)));
        assert!(!a.text.contains("_KATA_MARKER"));
    }

    #[test]
    fn test_alarm_only_when_enabled() {
        let source = "def f():\n    return 1";

        let plain = TestHarnessGenerator::default().build(source, &cases()).unwrap();
        assert!(!plain.text.contains("\n_kata_arm("));
        assert!(!plain.text.contains("\n_kata_disarm()"));

        let guarded = TestHarnessGenerator::new(Some(Duration::from_millis(4500)))
            .build(source, &cases())
            .unwrap();
        let arm = guarded.text.find("\n_kata_arm(4.500)\n").unwrap();
        let first_case = guarded.text.find("\n_kata_run(0, ").unwrap();
        let disarm = guarded.text.rfind("\n_kata_disarm()\n").unwrap();
        assert!(arm < first_case && first_case < disarm);
    }

    #[test]
    fn test_budget_from_runner_timeout() {
        let generator = TestHarnessGenerator::with_runner_timeout(Duration::from_millis(5000));
        assert_eq!(generator.in_program_timeout(), Some(Duration::from_millis(4500)));

        let generator = TestHarnessGenerator::with_runner_timeout(Duration::from_millis(500));
        assert_eq!(generator.in_program_timeout(), Some(Duration::from_millis(400)));

        let generator = TestHarnessGenerator::with_runner_timeout(Duration::from_millis(50));
        assert_eq!(generator.in_program_timeout(), None);
    }

    #[test]
    fn test_only_standard_library_imports() {
        let program = TestHarnessGenerator::new(Some(Duration::from_secs(1)))
            .build("def f():\n    return 1", &cases())
            .unwrap();

        let imports: Vec<&str> = program
            .text
            .lines()
            .filter(|line| line.trim_start().starts_with("import "))
            .collect();
        assert_eq!(
            imports,
            vec!["import json as _kata_json", "import json", "import signal", "import sys"]
        );
    }
}
