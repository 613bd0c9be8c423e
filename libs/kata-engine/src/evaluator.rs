/// Result Parser - Marker Decoding and Verdict Reconstruction
///
/// **Core Responsibility:**
/// Turn the harness program's stdout back into one `TestVerdict` per test case.
///
/// **Critical Properties:**
/// - Knows nothing about processes or interpreters
/// - Never fails: malformed or missing markers become failed verdicts
/// - Output length always equals the number of test cases, in input order
///
/// **Wire Format:**
/// One line per test case, `<marker><json record>`. Anything else on stdout
/// (the `>>>` echo, the student's own prints) is kept as the transcript.

use kata_common::types::{TestCase, TestVerdict};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Error attached to test cases whose marker never appeared
pub const MISSING_RESULT_ERROR: &str = "Test execution failed";

#[derive(Debug, Deserialize)]
struct MarkerRecord {
    index: usize,
    passed: bool,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    expected: Value,
    #[serde(default)]
    actual: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Everything recovered from one harness run
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessReport {
    pub verdicts: Vec<TestVerdict>,
    /// Non-marker stdout lines, in order
    pub transcript: String,
    /// How many test indices had a decodable marker
    pub markers_found: usize,
}

impl HarnessReport {
    pub fn all_passed(&self) -> bool {
        self.verdicts.iter().all(|v| v.passed)
    }
}

#[derive(Debug, Clone)]
pub struct ResultParser {
    marker: String,
}

impl ResultParser {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn parse(&self, stdout: &str, test_cases: &[TestCase]) -> HarnessReport {
        let mut slots: Vec<Option<TestVerdict>> = vec![None; test_cases.len()];
        let mut transcript: Vec<&str> = Vec::new();

        for line in stdout.lines() {
            // The marker may follow student output that lacked a trailing newline
            let Some(position) = line.find(&self.marker) else {
                transcript.push(line);
                continue;
            };

            let before = &line[..position];
            if !before.is_empty() {
                transcript.push(before);
            }

            let payload = &line[position + self.marker.len()..];
            let record: MarkerRecord = match serde_json::from_str(payload) {
                Ok(record) => record,
                Err(e) => {
                    debug!(error = %e, "Ignoring malformed result marker");
                    continue;
                }
            };

            match slots.get_mut(record.index) {
                Some(slot) if slot.is_none() => {
                    *slot = Some(TestVerdict {
                        index: record.index + 1,
                        passed: record.passed,
                        input: record.input,
                        expected: record.expected,
                        actual: record.actual,
                        error: record.error,
                    });
                }
                Some(_) => debug!(index = record.index, "Ignoring duplicate result marker"),
                None => debug!(index = record.index, "Ignoring out-of-range result marker"),
            }
        }

        let markers_found = slots.iter().filter(|slot| slot.is_some()).count();

        let verdicts = slots
            .into_iter()
            .zip(test_cases)
            .enumerate()
            .map(|(position, (slot, test_case))| {
                slot.unwrap_or_else(|| TestVerdict::failed(position, test_case, MISSING_RESULT_ERROR))
            })
            .collect();

        HarnessReport {
            verdicts,
            transcript: transcript.join("\n").trim_end().to_string(),
            markers_found,
        }
    }
}

/// Human-readable console text for a graded run
///
/// Transcript first (so the student sees their own prints and the first
/// call's echo), then a pass banner or one line per failing test.
pub fn summarize(report: &HarnessReport) -> String {
    let mut sections: Vec<String> = Vec::new();

    if !report.transcript.is_empty() {
        sections.push(report.transcript.clone());
    }

    let total = report.verdicts.len();
    let failed: Vec<&TestVerdict> = report.verdicts.iter().filter(|v| !v.passed).collect();

    if failed.is_empty() {
        sections.push(format!("✓ All {} test case(s) passed!", total));
    } else {
        let mut summary = format!("✗ {} of {} test case(s) failed.", failed.len(), total);
        for verdict in failed {
            let actual = verdict
                .actual
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_else(|| "null".to_string());
            summary.push_str(&format!(
                "\nTest {}: expected {}, got {}",
                verdict.index, verdict.expected, actual
            ));
            if let Some(error) = &verdict.error {
                summary.push_str(&format!(" ({})", error));
            }
        }
        sections.push(summary);
    }

    sections.join("\n\n")
}
