use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, info};

use super::generator::strip_think;
use super::state::{Verdict, WorkflowState};
use crate::error::PipelineError;
use crate::llm::client::LlmClient;
use crate::llm::prompts;

/// What the critic is allowed to do next, decided without any LLM call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Pass,
    Retry,
    Exhausted,
}

/// Pure termination rule: pass wins, then the iteration cap.
pub fn decide(passed: bool, iteration_count: u32, max_iterations: u32) -> Decision {
    if passed {
        Decision::Pass
    } else if iteration_count < max_iterations {
        Decision::Retry
    } else {
        Decision::Exhausted
    }
}

#[derive(Debug, Deserialize)]
struct CriticReply {
    feedback: String,
}

/// Extract feedback from a critic reply: the `feedback` field of a JSON
/// object when one is present, otherwise the cleaned text.
pub fn parse_feedback(raw: &str) -> String {
    let cleaned = strip_think(raw);
    let trimmed = cleaned.trim();

    let json_candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&trimmed[start..=end]),
        _ => None,
    };
    if let Some(candidate) = json_candidate {
        if let Ok(reply) = serde_json::from_str::<CriticReply>(candidate) {
            if !reply.feedback.trim().is_empty() {
                return reply.feedback.trim().to_string();
            }
        }
    }

    trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
        .to_string()
}

pub struct Critic {
    client: Box<dyn LlmClient>,
    custom_instructions: Option<String>,
}

impl Critic {
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

    /// Review the latest execution. Only a retry costs an LLM call.
    pub async fn review(&self, state: &WorkflowState) -> Result<Verdict> {
        match decide(state.passed(), state.iteration_count, state.max_iterations) {
            Decision::Pass => Ok(Verdict::Pass),
            Decision::Exhausted => {
                info!(
                    "Iteration cap reached ({}/{})",
                    state.iteration_count, state.max_iterations
                );
                Ok(Verdict::Exhausted)
            }
            Decision::Retry => {
                let prompt = prompts::critic_prompt(state, self.custom_instructions.as_deref());
                debug!("Critic prompt is {} chars", prompt.len());

                let raw = self
                    .client
                    .complete(&prompt)
                    .await
                    .map_err(|e| PipelineError::completion("critic", e))?;

                let mut feedback = parse_feedback(&raw);
                if feedback.is_empty() {
                    feedback = "The previous tests failed. Re-read the code and fix the failing assertions.".to_string();
                }
                Ok(Verdict::Retry { feedback })
            }
        }
    }
}
