use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::PipelineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,

    /// Optional: separate model for the critic stage (default: `llm`)
    pub critic_llm: Option<LlmConfig>,

    /// Optional: separate model for the final report (default: `llm`)
    pub reporter_llm: Option<LlmConfig>,

    pub workflow: WorkflowConfig,
    pub runner: RunnerConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>, // For OpenAI-compatible APIs

    /// Optional: Override max_tokens for LLM requests
    /// If not specified, uses provider-specific defaults:
    /// - anthropic: 4096
    /// - openai / groq: 4096
    /// - openai-compatible (ollama): 16384
    /// - gemini: 8192
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Sampling temperature. Providers that accept it default to 0.2.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// HTTP request timeout in seconds (default: 120)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl LlmConfig {
    /// Get max_tokens value, using provider-specific default if not specified
    pub fn get_max_tokens(&self) -> u32 {
        if let Some(tokens) = self.max_tokens {
            return tokens;
        }

        match self.provider.as_str() {
            "anthropic" => 4096,
            "openai" | "groq" => 4096,
            "openai-compatible" => 16384, // ollama and similar
            "gemini" => 8192,
            _ => 4096,
        }
    }

    pub fn get_temperature(&self) -> f32 {
        self.temperature.unwrap_or(0.2)
    }

    pub fn get_timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(120)
    }

    /// Get API key from the environment variable named in this config
    pub fn get_api_key(&self) -> Result<String> {
        match &self.api_key_env {
            Some(env_var) => {
                // Special case: "none" means no API key needed (e.g., Ollama)
                if env_var.to_lowercase() == "none" {
                    return Ok(String::new());
                }

                // openai-compatible: local models don't need keys, gateways do
                if self.provider == "openai-compatible" {
                    return Ok(env::var(env_var).unwrap_or_default());
                }

                env::var(env_var).map_err(|_| {
                    anyhow::anyhow!("API key not found in environment variable: {}", env_var)
                })
            }
            None => Ok(String::new()),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            model: "openai/gpt-oss-20b".to_string(),
            api_key_env: Some("GROQ_API_KEY".to_string()),
            base_url: None,
            max_tokens: None,
            temperature: None,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Maximum number of generate/execute passes (must be at least 1)
    pub max_iterations: u32,

    /// Directory that receives the final test file
    pub output_dir: String,

    /// Ask the reporter model for a closing summary
    pub final_report: bool,

    /// Character budget for code and README excerpts embedded in prompts
    pub max_prompt_chars: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            output_dir: ".".to_string(),
            final_report: true,
            max_prompt_chars: 6000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Executable that runs the tests (default: "python3")
    pub program: String,

    /// Arguments placed before the test file path (default: ["-m", "pytest"])
    pub args: Vec<String>,

    /// Wall-clock limit for one test run in seconds (default: 60)
    pub timeout_secs: u64,

    /// Passed to pytest as --maxfail
    pub maxfail: u32,

    /// Request a pytest-json-report file for per-test results
    pub json_report: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-m".to_string(), "pytest".to_string()],
            timeout_secs: 60,
            maxfail: 20,
            json_report: true,
        }
    }
}

/// Extra instructions appended to the default stage prompts
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptsConfig {
    #[serde(default)]
    pub generator_custom: Option<String>,
    #[serde(default)]
    pub critic_custom: Option<String>,
    #[serde(default)]
    pub reporter_custom: Option<String>,
}

impl Config {
    /// Load configuration from a specific path, or use default search paths
    pub fn load_with_path(path: Option<String>) -> Result<Self> {
        if let Some(config_path) = path {
            debug!("Loading config from explicit path: {}", config_path);
            return Self::load_from_path(&config_path);
        }

        // Per-project config first
        if let Ok(config) = Self::load_from_path("testloop.toml") {
            debug!("Loaded config from ./testloop.toml");
            return Ok(config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("testloop").join("config.toml");
            if let Ok(config) = Self::load_from_path(&config_path) {
                debug!("Loaded config from {:?}", config_path);
                return Ok(config);
            }
        }

        debug!("Using default config");
        Ok(Self::default())
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// LLM settings for the critic, falling back to the main model
    pub fn critic_llm(&self) -> &LlmConfig {
        self.critic_llm.as_ref().unwrap_or(&self.llm)
    }

    /// LLM settings for the reporter, falling back to the main model
    pub fn reporter_llm(&self) -> &LlmConfig {
        self.reporter_llm.as_ref().unwrap_or(&self.llm)
    }

    /// Reject settings the workflow cannot run with
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.workflow.max_iterations == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.runner.timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "runner.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.runner.program.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "runner.program must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            critic_llm: None,
            reporter_llm: None,
            workflow: WorkflowConfig::default(),
            runner: RunnerConfig::default(),
            prompts: PromptsConfig::default(),
        }
    }
}
