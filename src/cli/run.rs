use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::read_inputs;
use crate::config::Config;
use crate::error::PipelineError;
use crate::llm::factory;
use crate::pipeline::critic::Critic;
use crate::pipeline::generator::TestGenerator;
use crate::pipeline::reporter::Reporter;
use crate::pipeline::state::{Stage, WorkflowState};
use crate::pipeline::{ProgressSink, PytestRunner, Workflow, WorkflowOutcome};

/// Prints one line per completed stage to stdout.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn stage(&self, state: &WorkflowState, stage: Stage, message: &str) {
        println!(
            "[{}/{}] {:<8} {}",
            state.iteration_count, state.max_iterations, stage, message
        );
    }
}

/// CLI overrides for `testloop run`.
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub max_iterations: Option<u32>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub timeout: Option<u64>,
    pub output_dir: Option<String>,
    pub no_report: bool,
}

/// Fold CLI flags into the loaded config. Stage-specific models keep
/// their own settings.
pub fn apply_overrides(config: &mut Config, overrides: &RunOverrides) {
    if let Some(max) = overrides.max_iterations {
        info!("CLI override: max_iterations = {}", max);
        config.workflow.max_iterations = max;
    }
    if let Some(ref provider) = overrides.provider {
        info!("CLI override: provider = {}", provider);
        config.llm.provider = provider.clone();
    }
    if let Some(ref model) = overrides.model {
        info!("CLI override: model = {}", model);
        config.llm.model = model.clone();
    }
    if let Some(timeout) = overrides.timeout {
        info!("CLI override: runner timeout = {}s", timeout);
        config.runner.timeout_secs = timeout;
    }
    if let Some(ref dir) = overrides.output_dir {
        info!("CLI override: output_dir = {}", dir);
        config.workflow.output_dir = dir.clone();
    }
    if overrides.no_report {
        info!("CLI override: final report disabled");
        config.workflow.final_report = false;
    }
}

/// Assemble the workflow from config. Client construction failures
/// (unknown provider, missing API key) are configuration errors.
pub fn build_workflow(config: &Config, dry_run: bool) -> Result<Workflow> {
    let as_config_error = |e: anyhow::Error| PipelineError::InvalidConfig(format!("{:#}", e));

    let generator = TestGenerator::new(
        factory::create_client(&config.llm, dry_run).map_err(as_config_error)?,
    )
    .with_custom_instructions(config.prompts.generator_custom.clone())
    .with_max_prompt_chars(config.workflow.max_prompt_chars);

    let critic = Critic::new(
        factory::create_client(config.critic_llm(), dry_run).map_err(as_config_error)?,
    )
    .with_custom_instructions(config.prompts.critic_custom.clone());

    let reporter = if config.workflow.final_report {
        Some(
            Reporter::new(
                factory::create_client(config.reporter_llm(), dry_run)
                    .map_err(as_config_error)?,
            )
            .with_custom_instructions(config.prompts.reporter_custom.clone()),
        )
    } else {
        None
    };

    let runner = PytestRunner::new(config.runner.clone());

    Ok(Workflow::new(
        generator,
        critic,
        Box::new(runner),
        config.workflow.max_iterations,
    )
    .with_reporter(reporter))
}

fn print_summary(outcome: &WorkflowOutcome, artifact: &Path) {
    let state = outcome.state();
    println!();
    println!("Iterations:");
    for result in &state.iteration_results {
        println!(
            "  {}. {} ({} collected, {} passed, {} failed, {} errors)",
            result.iteration,
            if result.passed_run { "pass" } else { "fail" },
            result.collected,
            result.passed,
            result.failed,
            result.errors
        );
    }
    if !state.final_message.is_empty() {
        println!();
        println!("{}", state.final_message);
    }
    println!();
    if outcome.is_success() {
        println!("✓ Tests pass. Wrote {}", artifact.display());
    } else {
        println!(
            "✗ Gave up after {} iteration(s). Last attempt written to {}",
            state.iteration_count,
            artifact.display()
        );
        if let Some(diagnostic) = state
            .execution_report
            .as_ref()
            .and_then(|r| r.diagnostic.as_deref())
        {
            println!("  Runner diagnostic: {}", diagnostic);
        }
    }
}

/// `testloop run`: returns the outcome after writing the artifact.
pub async fn run(
    readme: PathBuf,
    code: PathBuf,
    config_path: Option<String>,
    overrides: RunOverrides,
    summary_json: Option<PathBuf>,
    dry_run: bool,
) -> Result<WorkflowOutcome> {
    let mut config = Config::load_with_path(config_path)
        .map_err(|e| PipelineError::InvalidConfig(format!("{:#}", e)))?;
    apply_overrides(&mut config, &overrides);
    config.validate()?;

    let (readme_text, code_text) = read_inputs(&readme, &code)?;

    info!("README: {}", readme.display());
    info!("Code: {}", code.display());
    info!(
        "Model: {}/{} (max {} iteration(s))",
        config.llm.provider, config.llm.model, config.workflow.max_iterations
    );
    info!("Dry run: {}", dry_run);

    let workflow = build_workflow(&config, dry_run)?.with_progress(Box::new(ConsoleProgress));
    let outcome = workflow.run(readme_text, code_text).await?;

    let artifact = outcome.write_artifact(Path::new(&config.workflow.output_dir))?;
    info!("Wrote {}", artifact.display());

    if let Some(path) = summary_json {
        let json = serde_json::to_string_pretty(outcome.state())
            .context("Failed to serialize run summary")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write run summary {}", path.display()))?;
        info!("Run summary written to {}", path.display());
    }

    print_summary(&outcome, &artifact);
    Ok(outcome)
}
