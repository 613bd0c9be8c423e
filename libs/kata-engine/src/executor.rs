/// Execution Coordinator - High-Level Orchestration
///
/// **Responsibility:**
/// Tie guard, harness, runner and parser together for the two call patterns
/// the HTTP layer needs, and always hand back a complete `ExecutionOutcome`.
///
/// **Architecture:**
/// 1. StaticGuard rejects bad source without spawning anything (guard.rs)
/// 2. TestHarnessGenerator wraps source with test calls (harness.rs)
/// 3. ProgramRunner executes the program text (runner.rs)
/// 4. ResultParser rebuilds verdicts from stdout (evaluator.rs)
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (runner's job)
/// - How results are encoded on stdout (harness and parser)

use crate::evaluator::{summarize, ResultParser};
use crate::guard::StaticGuard;
use crate::harness::TestHarnessGenerator;
use crate::runner::{ProcessRunner, ProgramRunner};
use kata_common::config::RunnerConfig;
use kata_common::types::{ExecutionOutcome, ExecutionRequest, TestCase, TestVerdict};
use std::time::Instant;
use tracing::{info, warn};

/// Error reported when graded tests ran but not all of them passed
pub const TESTS_FAILED_ERROR: &str = "Some test cases failed";

/// Error reported when a failed process left nothing behind
pub const EXECUTION_FAILED_ERROR: &str = "Execution failed";

#[derive(Debug, Clone)]
pub struct ExecutionCoordinator<R = ProcessRunner> {
    guard: StaticGuard,
    harness: TestHarnessGenerator,
    runner: R,
}

impl ExecutionCoordinator<ProcessRunner> {
    /// Production wiring: local interpreter runner with the configured limits
    pub fn from_config(config: &RunnerConfig) -> Self {
        let runner = ProcessRunner::new(config);
        let harness = if config.in_program_timeout {
            TestHarnessGenerator::with_runner_timeout(runner.timeout())
        } else {
            TestHarnessGenerator::default()
        };

        Self::new(StaticGuard::new(config.max_source_bytes), harness, runner)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Outcome for a run that never produced usable results: every test case
/// carries the same error. Plain runs pass `None` and get no verdict list.
fn failed_outcome(
    error: String,
    console_output: String,
    test_cases: Option<&[TestCase]>,
    start: Instant,
) -> ExecutionOutcome {
    ExecutionOutcome {
        success: false,
        execution_time_ms: elapsed_ms(start),
        test_verdicts: test_cases.map(|test_cases| {
            test_cases
                .iter()
                .enumerate()
                .map(|(position, test_case)| TestVerdict::failed(position, test_case, error.clone()))
                .collect()
        }),
        console_output,
        error: Some(error),
    }
}

impl<R: ProgramRunner> ExecutionCoordinator<R> {
    pub fn new(guard: StaticGuard, harness: TestHarnessGenerator, runner: R) -> Self {
        Self {
            guard,
            harness,
            runner,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn guard(&self) -> &StaticGuard {
        &self.guard
    }

    /// Plain run when the request has no test cases, graded run otherwise
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        if request.test_cases.is_empty() {
            self.run_plain(&request.source).await
        } else {
            self.run_graded(&request.source, &request.test_cases).await
        }
    }

    /// Run the source as-is and report what it printed
    #[tracing::instrument(skip_all, fields(source_bytes = source.len()))]
    pub async fn run_plain(&self, source: &str) -> ExecutionOutcome {
        let start = Instant::now();

        if let Err(rejection) = self.guard.validate(source) {
            info!(reason = %rejection, "Source rejected");
            return failed_outcome(rejection.to_string(), format!("Error: {}", rejection), None, start);
        }

        let result = self.runner.run(source).await;
        let success = result.succeeded();

        let console_output = if success || result.stderr.is_empty() {
            result.stdout.clone()
        } else {
            result.stderr.clone()
        };

        let error = if success {
            None
        } else if result.stderr.is_empty() {
            Some(format!("Process exited with code {}", result.exit_code))
        } else {
            Some(result.stderr.clone())
        };

        let execution_time_ms = elapsed_ms(start);
        info!(
            success,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            execution_time_ms,
            "Plain run completed"
        );

        ExecutionOutcome {
            success,
            execution_time_ms,
            test_verdicts: None,
            console_output,
            error,
        }
    }

    /// Run the source against a test suite and grade every case
    #[tracing::instrument(skip_all, fields(source_bytes = source.len(), test_count = test_cases.len()))]
    pub async fn run_graded(&self, source: &str, test_cases: &[TestCase]) -> ExecutionOutcome {
        let start = Instant::now();

        if let Err(rejection) = self.guard.validate(source) {
            info!(reason = %rejection, "Source rejected");
            return failed_outcome(rejection.to_string(), format!("Error: {}", rejection), Some(test_cases), start);
        }

        let program = match self.harness.build(source, test_cases) {
            Ok(program) => program,
            Err(e) => {
                warn!(error = %e, "Failed to build test harness");
                return failed_outcome(e.to_string(), format!("Error: {}", e), Some(test_cases), start);
            }
        };

        let result = self.runner.run(&program.text).await;
        let report = ResultParser::new(program.marker.as_str()).parse(&result.stdout, test_cases);

        // Process-level failure before any test reported (syntax error,
        // module-level exception, timeout during import, missing interpreter)
        if !result.succeeded() && report.markers_found == 0 {
            let error = if result.stderr.is_empty() {
                EXECUTION_FAILED_ERROR.to_string()
            } else {
                result.stderr.clone()
            };
            warn!(
                function = %program.function_name,
                exit_code = result.exit_code,
                timed_out = result.timed_out,
                "Harness produced no results"
            );
            let console_output = if report.transcript.is_empty() {
                error.clone()
            } else {
                format!("{}\n\n{}", report.transcript, error)
            };
            return failed_outcome(error, console_output, Some(test_cases), start);
        }

        let success = if test_cases.is_empty() {
            result.succeeded()
        } else {
            report.all_passed()
        };

        let mut console_output = summarize(&report);
        if !result.succeeded() && !result.stderr.is_empty() {
            console_output.push_str("\n\n");
            console_output.push_str(&result.stderr);
        }

        let error = if success {
            None
        } else if test_cases.is_empty() {
            Some(if result.stderr.is_empty() {
                EXECUTION_FAILED_ERROR.to_string()
            } else {
                result.stderr.clone()
            })
        } else {
            Some(TESTS_FAILED_ERROR.to_string())
        };

        let execution_time_ms = elapsed_ms(start);
        let passed = report.verdicts.iter().filter(|v| v.passed).count();
        info!(
            function = %program.function_name,
            tests = test_cases.len(),
            passed,
            markers_found = report.markers_found,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            execution_time_ms,
            "Graded run completed"
        );

        ExecutionOutcome {
            success,
            execution_time_ms,
            test_verdicts: Some(report.verdicts),
            console_output,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kata_common::types::ProcessResult;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Runner double that records the programs it was asked to run and
    /// answers with a scripted result.
    struct ScriptedRunner {
        calls: AtomicUsize,
        programs: Mutex<Vec<String>>,
        script: Box<dyn Fn(&str) -> ProcessResult + Send + Sync>,
    }

    impl ScriptedRunner {
        fn new(script: impl Fn(&str) -> ProcessResult + Send + Sync + 'static) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                programs: Mutex::new(Vec::new()),
                script: Box::new(script),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_program(&self) -> Option<String> {
            self.programs.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl ProgramRunner for ScriptedRunner {
        async fn run(&self, program_text: &str) -> ProcessResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.programs.lock().unwrap().push(program_text.to_string());
            (self.script)(program_text)
        }
    }

    fn process(stdout: &str, stderr: &str, exit_code: i32) -> ProcessResult {
        ProcessResult {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
            timed_out: false,
            execution_time_ms: 3,
        }
    }

    /// Pull the per-build marker back out of generated program text
    fn marker_of(program_text: &str) -> String {
        let start = program_text.find("_kata_harness(\"").unwrap() + "_kata_harness(\"".len();
        let end = start + program_text[start..].find('"').unwrap();
        program_text[start..end].to_string()
    }

    fn record(marker: &str, index: usize, passed: bool, actual: Value, error: Value) -> String {
        format!(
            "{}{}",
            marker,
            json!({"index": index, "passed": passed, "input": [], "expected": null, "actual": actual, "error": error})
        )
    }

    fn coordinator(runner: ScriptedRunner) -> ExecutionCoordinator<ScriptedRunner> {
        ExecutionCoordinator::new(StaticGuard::default(), TestHarnessGenerator::default(), runner)
    }

    fn three_cases() -> Vec<TestCase> {
        vec![
            TestCase::new(json!([1]), json!(1)),
            TestCase::new(json!([0]), json!(0)),
            TestCase::new(json!([3]), json!(3)),
        ]
    }

    #[tokio::test]
    async fn test_rejection_never_spawns() {
        let coordinator = coordinator(ScriptedRunner::new(|_| process("", "", 0)));

        let plain = coordinator.run_plain("def f():\n    import os\n    return 1").await;
        let graded = coordinator
            .run_graded("def f():\n    import os\n    return 1", &three_cases())
            .await;

        assert_eq!(coordinator.runner().calls(), 0);
        assert!(!plain.success);
        assert_eq!(plain.error.as_deref(), Some("Restricted operation detected"));
        assert_eq!(plain.test_verdicts, None);
        assert!(!graded.success);
        assert_eq!(graded.error.as_deref(), Some("Restricted operation detected"));
        assert_eq!(graded.verdicts().len(), 3);
        assert!(graded
            .verdicts()
            .iter()
            .all(|v| !v.passed && v.error.as_deref() == Some("Restricted operation detected")));
    }

    #[tokio::test]
    async fn test_missing_return_is_rejected() {
        let coordinator = coordinator(ScriptedRunner::new(|_| process("", "", 0)));

        let outcome = coordinator.run_plain("def f():\n    while True: pass").await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Return statement required"));
        assert_eq!(outcome.console_output, "Error: Return statement required");
        assert_eq!(coordinator.runner().calls(), 0);
    }

    #[tokio::test]
    async fn test_plain_success_echoes_stdout() {
        let coordinator = coordinator(ScriptedRunner::new(|_| process("hello", "", 0)));

        let outcome = coordinator
            .run_plain("def f():\n    return 1\nprint('hello')")
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.console_output, "hello");
        assert_eq!(outcome.error, None);
        assert_eq!(coordinator.runner().calls(), 1);
        assert_eq!(
            coordinator.runner().last_program().as_deref(),
            Some("def f():\n    return 1\nprint('hello')"),
            "plain runs execute the source unmodified"
        );
    }

    #[tokio::test]
    async fn test_plain_failure_reports_stderr() {
        let coordinator = coordinator(ScriptedRunner::new(|_| {
            process("", "ZeroDivisionError: division by zero", 1)
        }));

        let outcome = coordinator.run_plain("def f():\n    return 1 / 0\nf()").await;

        assert!(!outcome.success);
        assert_eq!(outcome.console_output, "ZeroDivisionError: division by zero");
        assert_eq!(outcome.error.as_deref(), Some("ZeroDivisionError: division by zero"));
    }

    #[tokio::test]
    async fn test_graded_all_pass() {
        let coordinator = coordinator(ScriptedRunner::new(|program| {
            let marker = marker_of(program);
            let stdout = [
                ">>> f()".to_string(),
                "1".to_string(),
                record(&marker, 0, true, json!(1), Value::Null),
                record(&marker, 1, true, json!(0), Value::Null),
                record(&marker, 2, true, json!(3), Value::Null),
            ]
            .join("\n");
            process(&stdout, "", 0)
        }));

        let outcome = coordinator
            .run_graded("def f(x):\n    return x", &three_cases())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.passed_count(), 3);
        assert_eq!(outcome.console_output, ">>> f()\n1\n\n✓ All 3 test case(s) passed!");
    }

    #[tokio::test]
    async fn test_graded_partial_failure() {
        let coordinator = coordinator(ScriptedRunner::new(|program| {
            let marker = marker_of(program);
            let stdout = [
                record(&marker, 0, true, json!(1), Value::Null),
                record(&marker, 1, false, Value::Null, json!("division by zero")),
                record(&marker, 2, true, json!(3), Value::Null),
            ]
            .join("\n");
            process(&stdout, "", 0)
        }));

        let outcome = coordinator
            .run_graded("def f(x):\n    return 3 // x * x // 3", &three_cases())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some(TESTS_FAILED_ERROR));
        let passed: Vec<bool> = outcome.verdicts().iter().map(|v| v.passed).collect();
        assert_eq!(passed, vec![true, false, true]);
        assert_eq!(outcome.verdicts()[1].error.as_deref(), Some("division by zero"));
    }

    #[tokio::test]
    async fn test_graded_crash_without_markers_fails_every_case() {
        let coordinator = coordinator(ScriptedRunner::new(|_| {
            process("", "SyntaxError: invalid syntax", 1)
        }));

        let outcome = coordinator
            .run_graded("def f(x):\n    return x +", &three_cases())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("SyntaxError: invalid syntax"));
        assert_eq!(outcome.verdicts().len(), 3);
        for (i, verdict) in outcome.verdicts().iter().enumerate() {
            assert_eq!(verdict.index, i + 1);
            assert!(!verdict.passed);
            assert_eq!(verdict.error.as_deref(), Some("SyntaxError: invalid syntax"));
        }
    }

    #[tokio::test]
    async fn test_graded_crash_mid_run_keeps_earlier_results() {
        let coordinator = coordinator(ScriptedRunner::new(|program| {
            let marker = marker_of(program);
            process(
                &record(&marker, 0, true, json!(1), Value::Null),
                "Execution timed out after 5000 ms",
                124,
            )
        }));

        let outcome = coordinator
            .run_graded("def f(x):\n    return x", &three_cases())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some(TESTS_FAILED_ERROR));
        assert!(outcome.verdicts()[0].passed);
        assert_eq!(outcome.verdicts()[1].error.as_deref(), Some("Test execution failed"));
        assert_eq!(outcome.verdicts()[2].error.as_deref(), Some("Test execution failed"));
        assert!(outcome.console_output.ends_with("Execution timed out after 5000 ms"));
    }

    #[tokio::test]
    async fn test_graded_spawn_failure() {
        let coordinator = coordinator(ScriptedRunner::new(|_| {
            ProcessResult::spawn_failure("Failed to start interpreter 'python3': No such file or directory", 0)
        }));

        let outcome = coordinator
            .run_graded("def f(x):\n    return x", &three_cases())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.verdicts().len(), 3);
        assert!(outcome.error.unwrap().contains("Failed to start interpreter"));
    }

    #[tokio::test]
    async fn test_graded_without_tests_uses_exit_code() {
        let ok = coordinator(ScriptedRunner::new(|_| process("", "", 0)));
        let outcome = ok.run_graded("def f():\n    return 1", &[]).await;
        assert!(outcome.success);
        assert_eq!(outcome.test_verdicts, Some(vec![]));

        let crashed = coordinator(ScriptedRunner::new(|_| process("", "", 2)));
        let outcome = crashed.run_graded("def f():\n    return 1", &[]).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some(EXECUTION_FAILED_ERROR));
    }

    #[tokio::test]
    async fn test_execute_dispatches_on_test_cases() {
        let coordinator = coordinator(ScriptedRunner::new(|program| {
            if program.contains("_kata_harness(") {
                let marker = marker_of(program);
                process(&record(&marker, 0, true, json!(1), Value::Null), "", 0)
            } else {
                process("plain", "", 0)
            }
        }));

        let plain = coordinator
            .execute(&ExecutionRequest {
                source: "def f():\n    return 1".to_string(),
                test_cases: vec![],
            })
            .await;
        assert_eq!(plain.console_output, "plain");

        let graded = coordinator
            .execute(&ExecutionRequest {
                source: "def f():\n    return 1".to_string(),
                test_cases: vec![TestCase::new(json!([]), json!(1))],
            })
            .await;
        assert!(graded.success);
        assert_eq!(graded.verdicts().len(), 1);
    }
}
