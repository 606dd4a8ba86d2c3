use anyhow::{bail, Result};
use tracing::debug;

use super::client::{LlmClient, MockLlmClient};
use super::client_impl::{AnthropicClient, GeminiClient, OpenAIClient, RequestOptions};
use crate::config::LlmConfig;

/// Create an LLM client for one stage from its `LlmConfig`.
/// `dry_run` swaps in the offline mock and skips API key lookup.
pub fn create_client(llm_config: &LlmConfig, dry_run: bool) -> Result<Box<dyn LlmClient>> {
    if dry_run {
        return Ok(Box::new(MockLlmClient::new()));
    }

    let api_key = llm_config.get_api_key()?;
    let model = llm_config.model.clone();
    let options = RequestOptions {
        max_tokens: llm_config.get_max_tokens(),
        temperature: llm_config.get_temperature(),
        timeout_secs: llm_config.get_timeout_secs(),
    };

    debug!(
        "Creating {} client for model {}",
        llm_config.provider, llm_config.model
    );

    match llm_config.provider.as_str() {
        "anthropic" => match &llm_config.base_url {
            Some(url) => Ok(Box::new(AnthropicClient::with_base_url(
                api_key,
                model,
                url.clone(),
                options,
            )?)),
            None => Ok(Box::new(AnthropicClient::new(api_key, model, options)?)),
        },

        "openai" => match &llm_config.base_url {
            Some(url) => Ok(Box::new(OpenAIClient::with_base_url(
                api_key,
                model,
                url.clone(),
                options,
            )?)),
            None => Ok(Box::new(OpenAIClient::new(api_key, model, options)?)),
        },

        "groq" => match &llm_config.base_url {
            Some(url) => Ok(Box::new(OpenAIClient::with_base_url(
                api_key,
                model,
                url.clone(),
                options,
            )?)),
            None => Ok(Box::new(OpenAIClient::groq(api_key, model, options)?)),
        },

        "openai-compatible" => {
            let base_url = llm_config
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434/v1".to_string());

            Ok(Box::new(OpenAIClient::with_base_url(
                api_key, model, base_url, options,
            )?))
        }

        "gemini" => match &llm_config.base_url {
            Some(url) => Ok(Box::new(GeminiClient::with_base_url(
                api_key,
                model,
                url.clone(),
                options,
            )?)),
            None => Ok(Box::new(GeminiClient::new(api_key, model, options)?)),
        },

        unknown => bail!("Unknown LLM provider: {}", unknown),
    }
}
