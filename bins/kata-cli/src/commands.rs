// CLI commands for running submissions locally
use anyhow::{bail, Context, Result};
use kata_common::config::RunnerConfig;
use kata_common::types::{ExecutionOutcome, TestCase};
use kata_engine::{ExecutionCoordinator, StaticGuard, TestHarnessGenerator};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Test files hold either a bare list or a request-shaped object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TestFile {
    List(Vec<TestCase>),
    Wrapped {
        #[serde(rename = "testCases", alias = "test_cases")]
        test_cases: Vec<TestCase>,
    },
}

pub fn load_config(path: Option<&Path>, timeout_ms: Option<u64>) -> Result<RunnerConfig> {
    let mut config = match path {
        Some(path) => RunnerConfig::load(path)?.with_env_overrides(|key| std::env::var(key).ok())?,
        None => RunnerConfig::load_default()?,
    };

    if let Some(timeout_ms) = timeout_ms {
        config.timeout_ms = timeout_ms;
        config.validate()?;
    }

    debug!(
        interpreter = %config.interpreter.command,
        timeout_ms = config.timeout_ms,
        "Runner configured"
    );
    Ok(config)
}

fn read_source(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn parse_tests(content: &str) -> Result<Vec<TestCase>> {
    let parsed: TestFile = serde_json::from_str(content).context("Failed to parse test cases")?;
    Ok(match parsed {
        TestFile::List(test_cases) => test_cases,
        TestFile::Wrapped { test_cases } => test_cases,
    })
}

fn read_tests(file: &Path) -> Result<Vec<TestCase>> {
    let content = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    parse_tests(&content).with_context(|| format!("Invalid test file {}", file.display()))
}

fn print_outcome(outcome: &ExecutionOutcome) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    Ok(())
}

/// Static checks only; nothing is executed
pub fn check(config: &RunnerConfig, file: &Path) -> Result<()> {
    let source = read_source(file)?;

    if let Err(rejection) = StaticGuard::new(config.max_source_bytes).validate(&source) {
        bail!("{}: {}", file.display(), rejection);
    }

    println!("✓ {} passed static checks", file.display());
    Ok(())
}

pub async fn run(config: &RunnerConfig, file: &Path) -> Result<()> {
    let source = read_source(file)?;
    let outcome = ExecutionCoordinator::from_config(config).run_plain(&source).await;
    print_outcome(&outcome)
}

/// Returns whether every test case passed
pub async fn grade(config: &RunnerConfig, file: &Path, tests: &Path) -> Result<bool> {
    let source = read_source(file)?;
    let test_cases = read_tests(tests)?;

    let outcome = ExecutionCoordinator::from_config(config)
        .run_graded(&source, &test_cases)
        .await;
    print_outcome(&outcome)?;

    eprintln!(
        "{} {}/{} test case(s) passed",
        if outcome.success { "✓" } else { "✗" },
        outcome.passed_count(),
        test_cases.len()
    );
    Ok(outcome.success)
}

pub fn print_harness(config: &RunnerConfig, file: &Path, tests: &Path) -> Result<()> {
    let source = read_source(file)?;
    let test_cases = read_tests(tests)?;

    let generator = if config.in_program_timeout {
        TestHarnessGenerator::with_runner_timeout(Duration::from_millis(config.timeout_ms))
    } else {
        TestHarnessGenerator::default()
    };
    let program = generator.build(&source, &test_cases)?;

    println!("{}", program.text);
    Ok(())
}
