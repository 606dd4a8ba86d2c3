use tracing::warn;

use super::generator::strip_think;
use super::state::WorkflowState;
use crate::llm::client::LlmClient;
use crate::llm::prompts;

/// Deterministic closing summary, used when no model is asked or it fails.
pub fn fallback_summary(state: &WorkflowState, success: bool) -> String {
    let summary = state
        .execution_report
        .as_ref()
        .map(|r| r.summary)
        .unwrap_or_default();
    if success {
        format!(
            "All {} tests passed after {} iteration(s) for {} function(s).",
            summary.passed,
            state.iteration_count,
            state.detected_functions.len()
        )
    } else {
        format!(
            "Gave up after {} iteration(s): {} passed, {} failed, {} errors.",
            state.iteration_count, summary.passed, summary.failed, summary.errors
        )
    }
}

pub struct Reporter {
    client: Box<dyn LlmClient>,
    custom_instructions: Option<String>,
}

impl Reporter {
    pub fn new(client: Box<dyn LlmClient>) -> Self {
        Self {
            client,
            custom_instructions: None,
        }
    }

    pub fn with_custom_instructions(mut self, custom: Option<String>) -> Self {
        self.custom_instructions = custom;
        self
    }

    /// Never fails: the outcome is already decided when this runs.
    pub async fn summarize(&self, state: &WorkflowState, success: bool) -> String {
        let prompt = prompts::reporter_prompt(state, success, self.custom_instructions.as_deref());
        match self.client.complete(&prompt).await {
            Ok(raw) => {
                let text = strip_think(&raw).trim().to_string();
                if text.is_empty() {
                    fallback_summary(state, success)
                } else {
                    text
                }
            }
            Err(e) => {
                warn!("Final report failed, using plain summary: {:#}", e);
                fallback_summary(state, success)
            }
        }
    }
}
