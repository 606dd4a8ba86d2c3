//! The workflow state record and the stage transition table.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::detector::Framework;

/// Pipeline stages. `Success` and `Failure` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Detect,
    Generate,
    Combine,
    Execute,
    Critic,
    Success,
    Failure,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Detect => "detect",
            Stage::Generate => "generate",
            Stage::Combine => "combine",
            Stage::Execute => "execute",
            Stage::Critic => "critic",
            Stage::Success => "success",
            Stage::Failure => "failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Success | Stage::Failure)
    }

    /// Successor along the linear edges. `Critic` branches on a [`Verdict`]
    /// and terminal stages have no successor.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Detect => Some(Stage::Generate),
            Stage::Generate => Some(Stage::Combine),
            Stage::Combine => Some(Stage::Execute),
            Stage::Execute => Some(Stage::Critic),
            Stage::Critic | Stage::Success | Stage::Failure => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision taken by the Critic stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every test passed.
    Pass,
    /// Tests failed and iterations remain; loop back with this feedback.
    Retry { feedback: String },
    /// Tests failed and the iteration cap is reached.
    Exhausted,
}

impl Verdict {
    pub fn next_stage(&self) -> Stage {
        match self {
            Verdict::Pass => Stage::Success,
            Verdict::Retry { .. } => Stage::Generate,
            Verdict::Exhausted => Stage::Failure,
        }
    }
}

/// Outcome of one test as reported by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub nodeid: String,
    /// `passed`, `failed`, `error`, `skipped`, `xfailed` or `xpassed`
    pub outcome: String,
    pub longrepr: Option<String>,
}

impl TestCaseResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome.as_str(), "failed" | "error")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub collected: u32,
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
    pub skipped: u32,
}

/// Structured result of running the combined source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    /// Set when the runner could not produce a normal result
    /// (spawn failure, timeout, missing or malformed report).
    pub diagnostic: Option<String>,
    pub summary: RunSummary,
    pub tests: Vec<TestCaseResult>,
}

impl ExecutionReport {
    /// A failed report for a run that never produced test results.
    pub fn aborted(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostic: Some(diagnostic.into()),
            ..Self::default()
        }
    }

    pub fn failing_tests(&self) -> impl Iterator<Item = &TestCaseResult> {
        self.tests.iter().filter(|t| t.is_failure())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: u32,
    pub passed_run: bool,
    pub collected: u32,
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: u32,
    pub stage: Stage,
    pub action: String,
}

/// The single record every stage reads from and writes to.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub readme_text: String,
    pub code_text: String,
    pub detected_functions: Vec<String>,
    pub detected_framework: Framework,
    pub generated_tests: String,
    pub combined_source: String,
    pub execution_report: Option<ExecutionReport>,
    pub feedback_text: String,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub iteration_results: Vec<IterationSummary>,
    pub history: Vec<HistoryEntry>,
    pub final_message: String,
}

impl WorkflowState {
    pub fn new(readme_text: String, code_text: String, max_iterations: u32) -> Self {
        Self {
            readme_text,
            code_text,
            detected_functions: Vec::new(),
            detected_framework: Framework::None,
            generated_tests: String::new(),
            combined_source: String::new(),
            execution_report: None,
            feedback_text: String::new(),
            iteration_count: 1,
            max_iterations,
            iteration_results: Vec::new(),
            history: Vec::new(),
            final_message: String::new(),
        }
    }

    pub fn record(&mut self, stage: Stage, action: impl Into<String>) {
        self.history.push(HistoryEntry {
            iteration: self.iteration_count,
            stage,
            action: action.into(),
        });
    }

    pub fn passed(&self) -> bool {
        self.execution_report.as_ref().is_some_and(|r| r.passed)
    }
}
