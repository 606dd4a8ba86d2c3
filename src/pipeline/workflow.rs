use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::combiner;
use super::critic::Critic;
use super::executor::TestRunner;
use super::generator::TestGenerator;
use super::reporter::{fallback_summary, Reporter};
use super::state::{IterationSummary, Stage, Verdict, WorkflowState};
use crate::detector;
use crate::error::PipelineError;

pub const SUCCESS_FILE_NAME: &str = "test_final_generated.py";
pub const FAILURE_FILE_NAME: &str = "test_final_failed.py";

/// Receives one line of user-facing progress per completed stage.
pub trait ProgressSink: Send + Sync {
    fn stage(&self, state: &WorkflowState, stage: Stage, message: &str);
}

/// Discards progress. Used by tests and library callers.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn stage(&self, _state: &WorkflowState, _stage: Stage, _message: &str) {}
}

#[derive(Debug)]
pub enum WorkflowOutcome {
    /// Every test passed; the state holds the passing combined source.
    Success(WorkflowState),
    /// The iteration cap was reached; the state holds the last attempt.
    Failure(WorkflowState),
}

impl WorkflowOutcome {
    pub fn state(&self) -> &WorkflowState {
        match self {
            WorkflowOutcome::Success(state) | WorkflowOutcome::Failure(state) => state,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WorkflowOutcome::Success(_))
    }

    pub fn file_name(&self) -> &'static str {
        if self.is_success() {
            SUCCESS_FILE_NAME
        } else {
            FAILURE_FILE_NAME
        }
    }

    /// Write the combined source to `<output_dir>/<file_name>`.
    pub fn write_artifact(&self, output_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;
        let path = output_dir.join(self.file_name());
        fs::write(&path, &self.state().combined_source)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// The detect → generate → combine → execute → critic loop.
pub struct Workflow {
    generator: TestGenerator,
    critic: Critic,
    reporter: Option<Reporter>,
    runner: Box<dyn TestRunner>,
    progress: Box<dyn ProgressSink>,
    max_iterations: u32,
}

impl Workflow {
    pub fn new(
        generator: TestGenerator,
        critic: Critic,
        runner: Box<dyn TestRunner>,
        max_iterations: u32,
    ) -> Self {
        Self {
            generator,
            critic,
            reporter: None,
            runner,
            progress: Box::new(SilentProgress),
            max_iterations,
        }
    }

    pub fn with_reporter(mut self, reporter: Option<Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    fn finish_stage(&self, state: &mut WorkflowState, stage: Stage, message: String) {
        debug!("[{}/{}] {}: {}", state.iteration_count, state.max_iterations, stage, message);
        self.progress.stage(state, stage, &message);
        state.record(stage, message);
    }

    /// Drive the loop to a terminal stage.
    ///
    /// Completion failures and unusable generations abort the run with a
    /// [`PipelineError`]; test failures never do.
    pub async fn run(&self, readme_text: String, code_text: String) -> Result<WorkflowOutcome> {
        if self.max_iterations == 0 {
            return Err(
                PipelineError::InvalidConfig("max_iterations must be at least 1".to_string())
                    .into(),
            );
        }

        let mut state = WorkflowState::new(readme_text, code_text, self.max_iterations);
        let mut stage = Stage::Detect;

        while !stage.is_terminal() {
            stage = match stage {
                Stage::Detect => {
                    let detection = detector::detect(&state.code_text, &state.readme_text);
                    state.detected_functions = detection.functions;
                    state.detected_framework = detection.framework;
                    let message = format!(
                        "found {} function(s) [{}], framework: {}",
                        state.detected_functions.len(),
                        state.detected_functions.join(", "),
                        state.detected_framework
                    );
                    self.finish_stage(&mut state, stage, message);
                    linear_successor(stage)?
                }

                Stage::Generate => {
                    state.generated_tests = self.generator.generate(&state).await?;
                    let message = format!(
                        "generated {} lines of tests",
                        state.generated_tests.lines().count()
                    );
                    self.finish_stage(&mut state, stage, message);
                    linear_successor(stage)?
                }

                Stage::Combine => {
                    state.combined_source = combiner::combine(
                        &state.code_text,
                        &state.generated_tests,
                        state.detected_framework,
                    );
                    let message = format!(
                        "combined source is {} lines",
                        state.combined_source.lines().count()
                    );
                    self.finish_stage(&mut state, stage, message);
                    linear_successor(stage)?
                }

                Stage::Execute => {
                    let report = self.runner.run(&state.combined_source);
                    let summary = report.summary;
                    state.iteration_results.push(IterationSummary {
                        iteration: state.iteration_count,
                        passed_run: report.passed,
                        collected: summary.collected,
                        passed: summary.passed,
                        failed: summary.failed,
                        errors: summary.errors,
                    });
                    let mut message = format!(
                        "{}: {} passed, {} failed, {} errors",
                        if report.passed { "PASS" } else { "FAIL" },
                        summary.passed,
                        summary.failed,
                        summary.errors
                    );
                    if let Some(diagnostic) = &report.diagnostic {
                        message.push_str(&format!(" ({})", diagnostic));
                    }
                    state.execution_report = Some(report);
                    self.finish_stage(&mut state, stage, message);
                    linear_successor(stage)?
                }

                Stage::Critic => {
                    let verdict = self.critic.review(&state).await?;
                    let next = verdict.next_stage();
                    let message = match verdict {
                        Verdict::Pass => "all tests passed".to_string(),
                        Verdict::Exhausted => format!(
                            "gave up after {} iteration(s)",
                            state.iteration_count
                        ),
                        Verdict::Retry { feedback } => {
                            state.feedback_text = feedback;
                            "feedback sent back to the generator".to_string()
                        }
                    };
                    self.finish_stage(&mut state, stage, message);
                    if next == Stage::Generate {
                        state.iteration_count += 1;
                        info!(
                            "Starting iteration {}/{}",
                            state.iteration_count, state.max_iterations
                        );
                    }
                    next
                }

                Stage::Success | Stage::Failure => break,
            };
        }

        let success = stage == Stage::Success;
        state.final_message = match &self.reporter {
            Some(reporter) => reporter.summarize(&state, success).await,
            None => fallback_summary(&state, success),
        };

        info!(
            "Workflow finished: {} after {} iteration(s)",
            stage, state.iteration_count
        );

        Ok(if success {
            WorkflowOutcome::Success(state)
        } else {
            WorkflowOutcome::Failure(state)
        })
    }
}

fn linear_successor(stage: Stage) -> Result<Stage> {
    stage
        .next()
        .ok_or_else(|| anyhow!("stage {} has no linear successor", stage))
}
