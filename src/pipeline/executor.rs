use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::state::{ExecutionReport, RunSummary, TestCaseResult};
use crate::config::RunnerConfig;
use crate::util::{run_cmd_with_timeout, CommandTimeout};

pub const COMBINED_FILE_NAME: &str = "test_combined.py";
const JSON_REPORT_FILE_NAME: &str = "report.json";

/// Runs a combined test module and reports what happened.
///
/// Implementations never fail: anything that goes wrong is folded into a
/// failed [`ExecutionReport`] with `diagnostic` set.
pub trait TestRunner: Send + Sync {
    fn run(&self, source: &str) -> ExecutionReport;
}

/// Runs pytest as a subprocess in a throwaway directory.
pub struct PytestRunner {
    config: RunnerConfig,
    /// Cleared once pytest rejects `--json-report` (plugin not installed)
    json_report_available: AtomicBool,
}

impl PytestRunner {
    pub fn new(config: RunnerConfig) -> Self {
        let json_report = config.json_report;
        Self {
            config,
            json_report_available: AtomicBool::new(json_report),
        }
    }

    fn build_command(&self, dir: &Path, test_file: &Path, with_json: bool) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(test_file)
            .arg("--disable-warnings")
            .arg(format!("--maxfail={}", self.config.maxfail))
            .arg("-q");
        if with_json {
            cmd.arg("--json-report").arg(format!(
                "--json-report-file={}",
                dir.join(JSON_REPORT_FILE_NAME).display()
            ));
        }
        cmd.current_dir(dir).env("PYTHONDONTWRITEBYTECODE", "1");
        cmd
    }

    fn try_run(&self, source: &str) -> Result<ExecutionReport> {
        let temp_dir = TempDir::new().context("Failed to create temporary directory")?;
        let test_file = temp_dir.path().join(COMBINED_FILE_NAME);
        fs::write(&test_file, source)
            .with_context(|| format!("Failed to write {}", test_file.display()))?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let mut with_json = self.json_report_available.load(Ordering::Relaxed);

        loop {
            let cmd = self.build_command(temp_dir.path(), &test_file, with_json);
            debug!("Running {:?}", cmd);

            let output = match run_cmd_with_timeout(cmd, timeout) {
                Ok(output) => output,
                Err(e) if e.downcast_ref::<CommandTimeout>().is_some() => {
                    warn!("Test run timed out after {}s", self.config.timeout_secs);
                    return Ok(ExecutionReport {
                        timed_out: true,
                        ..ExecutionReport::aborted(format!(
                            "test runner timed out after {}s and was killed",
                            self.config.timeout_secs
                        ))
                    });
                }
                Err(e) => {
                    return Ok(ExecutionReport::aborted(format!(
                        "could not start test runner '{}': {:#}",
                        self.config.program, e
                    )))
                }
            };

            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let exit_code = output.status.code();

            if with_json && json_plugin_missing(exit_code, &stderr) {
                warn!("pytest-json-report is not installed; falling back to stdout parsing");
                self.json_report_available.store(false, Ordering::Relaxed);
                with_json = false;
                continue;
            }

            let mut report = ExecutionReport {
                passed: exit_code == Some(0),
                exit_code,
                timed_out: false,
                stdout,
                stderr,
                diagnostic: None,
                summary: RunSummary::default(),
                tests: Vec::new(),
            };

            let report_path = temp_dir.path().join(JSON_REPORT_FILE_NAME);
            let parsed = if !with_json {
                None
            } else if !report_path.exists() {
                warn!("pytest exited without writing {}", JSON_REPORT_FILE_NAME);
                report.diagnostic = Some("pytest-json-report file was not written".to_string());
                None
            } else {
                match fs::read_to_string(&report_path)
                    .context("Failed to read JSON report")
                    .and_then(|raw| parse_json_report(&raw))
                {
                    Ok(parsed) => Some(parsed),
                    Err(e) => {
                        warn!("Ignoring malformed JSON report: {:#}", e);
                        report.diagnostic = Some(format!("malformed JSON report: {:#}", e));
                        None
                    }
                }
            };

            match parsed {
                Some((summary, tests)) => {
                    report.summary = summary;
                    report.tests = tests;
                }
                None => {
                    debug!("No JSON report; parsing the pytest summary line");
                    report.summary = parse_summary_line(&report.stdout).unwrap_or_default();
                }
            }

            if exit_code.is_none() {
                report.diagnostic = Some("test runner was terminated by a signal".to_string());
            }

            info!(
                "pytest exit code {:?}: {} passed, {} failed, {} errors",
                exit_code, report.summary.passed, report.summary.failed, report.summary.errors
            );
            return Ok(report);
        }
    }
}

impl TestRunner for PytestRunner {
    fn run(&self, source: &str) -> ExecutionReport {
        self.try_run(source)
            .unwrap_or_else(|e| ExecutionReport::aborted(format!("{:#}", e)))
    }
}

/// pytest exits with usage error 4 when a plugin flag is unknown.
fn json_plugin_missing(exit_code: Option<i32>, stderr: &str) -> bool {
    exit_code == Some(4) && stderr.contains("unrecognized arguments") && stderr.contains("--json-report")
}

#[derive(Debug, Deserialize)]
struct JsonReport {
    #[serde(default)]
    summary: JsonSummary,
    #[serde(default)]
    tests: Vec<JsonTest>,
    #[serde(default)]
    collectors: Vec<JsonCollector>,
}

#[derive(Debug, Default, Deserialize)]
struct JsonSummary {
    collected: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct JsonTest {
    nodeid: String,
    outcome: String,
    setup: Option<JsonPhase>,
    call: Option<JsonPhase>,
    teardown: Option<JsonPhase>,
}

#[derive(Debug, Deserialize)]
struct JsonPhase {
    outcome: Option<String>,
    longrepr: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct JsonCollector {
    nodeid: String,
    outcome: String,
    longrepr: Option<serde_json::Value>,
}

fn longrepr_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl JsonTest {
    /// Longrepr of the first phase that did not pass.
    fn failure_repr(&self) -> Option<String> {
        [&self.setup, &self.call, &self.teardown]
            .into_iter()
            .flatten()
            .find(|phase| phase.outcome.as_deref().is_some_and(|o| o != "passed"))
            .and_then(|phase| phase.longrepr.as_ref())
            .map(longrepr_text)
    }
}

/// Parse a pytest-json-report document into counts and per-test results.
/// Failed collectors (import or syntax errors) count as errors.
pub fn parse_json_report(raw: &str) -> Result<(RunSummary, Vec<TestCaseResult>)> {
    let report: JsonReport = serde_json::from_str(raw).context("Failed to parse JSON report")?;

    let mut summary = RunSummary::default();
    let mut tests = Vec::with_capacity(report.tests.len());

    for test in &report.tests {
        match test.outcome.as_str() {
            "passed" | "xpassed" => summary.passed += 1,
            "failed" => summary.failed += 1,
            "error" => summary.errors += 1,
            "skipped" | "xfailed" => summary.skipped += 1,
            _ => {}
        }
        let longrepr = if test.outcome == "passed" {
            None
        } else {
            test.failure_repr()
        };
        tests.push(TestCaseResult {
            nodeid: test.nodeid.clone(),
            outcome: test.outcome.clone(),
            longrepr,
        });
    }

    for collector in report.collectors.iter().filter(|c| c.outcome == "failed") {
        summary.errors += 1;
        tests.push(TestCaseResult {
            nodeid: collector.nodeid.clone(),
            outcome: "error".to_string(),
            longrepr: collector.longrepr.as_ref().map(longrepr_text),
        });
    }

    summary.collected = report
        .summary
        .collected
        .unwrap_or(report.tests.len() as u32);

    Ok((summary, tests))
}

static SUMMARY_COUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+) (passed|failed|errors?|skipped|xfailed|xpassed)\b").unwrap()
});

/// Parse the closing `N passed, M failed in 0.12s` line of pytest output.
pub fn parse_summary_line(stdout: &str) -> Option<RunSummary> {
    let line = stdout
        .lines()
        .rev()
        .find(|line| SUMMARY_COUNT_RE.is_match(line))?;

    let mut summary = RunSummary::default();
    for caps in SUMMARY_COUNT_RE.captures_iter(line) {
        let count: u32 = caps[1].parse().ok()?;
        match &caps[2] {
            "passed" | "xpassed" => summary.passed += count,
            "failed" => summary.failed += count,
            "error" | "errors" => summary.errors += count,
            "skipped" | "xfailed" => summary.skipped += count,
            _ => {}
        }
    }
    summary.collected = summary.passed + summary.failed + summary.skipped;
    Some(summary)
}
