// Prometheus metrics for the Kata API

use kata_common::types::ExecutionOutcome;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec, TextEncoder,
};

lazy_static! {
    static ref EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "kata_executions_total",
        "Executions handled, by mode and result",
        &["mode", "result"]
    )
    .unwrap();
    static ref TEST_CASES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "kata_test_cases_total",
        "Graded test cases, by verdict",
        &["verdict"]
    )
    .unwrap();
    static ref EXECUTION_SECONDS: HistogramVec = register_histogram_vec!(
        "kata_execution_duration_seconds",
        "Wall-clock time per execution, by mode",
        &["mode"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();
}

#[derive(Debug, Clone, Copy)]
pub enum Mode {
    Plain,
    Graded,
}

impl Mode {
    fn label(self) -> &'static str {
        match self {
            Mode::Plain => "plain",
            Mode::Graded => "graded",
        }
    }
}

pub fn record(mode: Mode, outcome: &ExecutionOutcome) {
    let result = if outcome.success { "success" } else { "failure" };
    EXECUTIONS_TOTAL.with_label_values(&[mode.label(), result]).inc();

    let passed = outcome.passed_count() as u64;
    let failed = outcome.verdicts().len() as u64 - passed;
    TEST_CASES_TOTAL.with_label_values(&["passed"]).inc_by(passed);
    TEST_CASES_TOTAL.with_label_values(&["failed"]).inc_by(failed);

    EXECUTION_SECONDS
        .with_label_values(&[mode.label()])
        .observe(outcome.execution_time_ms as f64 / 1000.0);
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> anyhow::Result<String> {
    // Touch the lazies so series exist before the first execution
    lazy_static::initialize(&EXECUTIONS_TOTAL);
    lazy_static::initialize(&TEST_CASES_TOTAL);
    lazy_static::initialize(&EXECUTION_SECONDS);

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
