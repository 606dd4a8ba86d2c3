use std::path::PathBuf;
use thiserror::Error;

/// Domain failures of a workflow run. Everything else travels as plain
/// `anyhow::Error` with context attached.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// README or code file missing or unreadable. Raised before the loop starts.
    #[error("could not read {what} file {}: {message}", path.display())]
    Input {
        what: &'static str,
        path: PathBuf,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The LLM call of a stage failed (network, auth, rate limit, bad payload).
    #[error("{stage} completion failed: {message}")]
    Completion { stage: &'static str, message: String },

    /// The generator answered, but with nothing that looks like a pytest module.
    #[error("generator returned no usable test code ({} chars of output)", raw.len())]
    UnusableGeneration { raw: String },
}

impl PipelineError {
    pub fn completion(stage: &'static str, err: anyhow::Error) -> Self {
        Self::Completion {
            stage,
            message: format!("{:#}", err),
        }
    }

    /// True for failures that happen before the feedback loop is entered.
    pub fn is_startup(&self) -> bool {
        matches!(self, Self::Input { .. } | Self::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_keeps_context_chain() {
        let err = anyhow::anyhow!("HTTP 429").context("Failed to send request to OpenAI API");
        let pipeline_err = PipelineError::completion("generator", err);
        let msg = pipeline_err.to_string();
        assert!(msg.starts_with("generator completion failed"));
        assert!(msg.contains("HTTP 429"));
        assert!(!pipeline_err.is_startup());
    }

    #[test]
    fn test_input_error_message() {
        let err = PipelineError::Input {
            what: "README",
            path: PathBuf::from("/missing/README.md"),
            message: "No such file or directory".to_string(),
        };
        assert!(err.is_startup());
        assert_eq!(
            err.to_string(),
            "could not read README file /missing/README.md: No such file or directory"
        );
    }

    #[test]
    fn test_unusable_generation_reports_size() {
        let err = PipelineError::UnusableGeneration {
            raw: "sorry".to_string(),
        };
        assert!(err.to_string().contains("5 chars"));
    }
}
