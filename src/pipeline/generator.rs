use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use super::state::WorkflowState;
use crate::error::PipelineError;
use crate::llm::client::LlmClient;
use crate::llm::prompts::{self, GeneratorPromptInput};

/// Module emitted when there is nothing to test.
pub const SKIP_MODULE: &str = r#"import pytest


def test_no_functions_detected():
    pytest.skip("no functions detected in the code under test")
"#;

static THINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think>.*?(?:</think>|\z)").unwrap());

static PYTEST_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<PYTEST_FILE>(.*?)(?:</PYTEST_FILE>|\z)").unwrap());

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\n(.*?)```").unwrap());

static TEST_DEF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:async\s+)?def\s+test\w*\s*\(|^\s*class\s+Test\w*").unwrap());

/// Remove `<think>` blocks, including an unterminated trailing one.
pub fn strip_think(raw: &str) -> String {
    THINK_RE.replace_all(raw, "").to_string()
}

/// Pull the test module out of a completion: `<PYTEST_FILE>` body first,
/// then the first fenced block, then the whole text.
pub fn extract_test_code(raw: &str) -> String {
    let cleaned = strip_think(raw);

    if let Some(caps) = PYTEST_FILE_RE.captures(&cleaned) {
        let body = caps[1].trim();
        // The model sometimes fences inside the tags
        if let Some(inner) = FENCE_RE.captures(body) {
            return inner[1].trim().to_string() + "\n";
        }
        return body.to_string() + "\n";
    }

    if let Some(caps) = FENCE_RE.captures(&cleaned) {
        return caps[1].trim().to_string() + "\n";
    }

    cleaned.trim().to_string() + "\n"
}

pub fn looks_like_tests(code: &str) -> bool {
    TEST_DEF_RE.is_match(code)
}

pub struct TestGenerator {
    client: Box<dyn LlmClient>,
    custom_instructions: Option<String>,
    max_prompt_chars: usize,
}

impl TestGenerator {
    pub fn new(client: Box<dyn LlmClient>) -> Self {
        Self {
            client,
            custom_instructions: None,
            max_prompt_chars: 6000,
        }
    }

    pub fn with_custom_instructions(mut self, custom: Option<String>) -> Self {
        self.custom_instructions = custom;
        self
    }

    pub fn with_max_prompt_chars(mut self, max_chars: usize) -> Self {
        self.max_prompt_chars = max_chars;
        self
    }

    /// Produce a pytest module for the current state.
    ///
    /// Errors are [`PipelineError::Completion`] or
    /// [`PipelineError::UnusableGeneration`]; both end the run.
    pub async fn generate(&self, state: &WorkflowState) -> Result<String> {
        if state.detected_functions.is_empty() {
            info!("No functions detected; emitting a skipped placeholder test");
            return Ok(SKIP_MODULE.to_string());
        }

        let previous = if state.iteration_count > 1 {
            Some(state.generated_tests.as_str())
        } else {
            None
        };

        let prompt = prompts::generator_prompt(&GeneratorPromptInput {
            functions: &state.detected_functions,
            framework: state.detected_framework,
            code: &state.code_text,
            readme: &state.readme_text,
            feedback: Some(state.feedback_text.as_str()),
            previous_tests: previous,
            custom: self.custom_instructions.as_deref(),
            max_chars: self.max_prompt_chars,
        });

        debug!("Generator prompt is {} chars", prompt.len());

        let raw = self
            .client
            .complete(&prompt)
            .await
            .map_err(|e| PipelineError::completion("generator", e))?;

        let tests = extract_test_code(&raw);
        if !looks_like_tests(&tests) {
            return Err(PipelineError::UnusableGeneration { raw }.into());
        }

        debug!("Generated {} lines of tests", tests.lines().count());
        Ok(tests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::MockLlmClient;
    use async_trait::async_trait;

    struct FixedClient(&'static str);

    #[async_trait]
    impl LlmClient for FixedClient {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl LlmClient for FailingClient {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            anyhow::bail!("OpenAI API error 401 Unauthorized: bad key")
        }
    }

    fn state_with(functions: &[&str]) -> WorkflowState {
        let mut state = WorkflowState::new(
            "README".to_string(),
            "def add(a, b):\n    return a + b\n".to_string(),
            3,
        );
        state.detected_functions = functions.iter().map(|f| f.to_string()).collect();
        state
    }

    #[test]
    fn test_extract_prefers_pytest_file_tags() {
        let raw = "Sure!\n<PYTEST_FILE>\nimport pytest\n\ndef test_add():\n    assert add(1, 2) == 3\n</PYTEST_FILE>\nDone.";
        let code = extract_test_code(raw);
        assert!(code.starts_with("import pytest"));
        assert!(!code.contains("Sure!"));
        assert!(!code.contains("Done."));
    }

    #[test]
    fn test_extract_strips_think_blocks() {
        let raw = "<think>def test_fake(): pass</think>\n```python\ndef test_add():\n    assert add(1, 2) == 3\n```";
        let code = extract_test_code(raw);
        assert!(!code.contains("test_fake"));
        assert!(code.contains("def test_add"));
    }

    #[test]
    fn test_extract_unterminated_think_is_dropped() {
        let code = extract_test_code("def test_a():\n    pass\n<think>still thinking");
        assert!(!code.contains("still thinking"));
    }

    #[test]
    fn test_extract_fence_inside_tags() {
        let raw = "<PYTEST_FILE>\n```python\ndef test_x():\n    assert True\n```\n</PYTEST_FILE>";
        assert_eq!(extract_test_code(raw), "def test_x():\n    assert True\n");
    }

    #[test]
    fn test_extract_raw_text_fallback() {
        let raw = "def test_plain():\n    assert 1 + 1 == 2";
        assert_eq!(extract_test_code(raw), format!("{}\n", raw));
    }

    #[test]
    fn test_looks_like_tests() {
        assert!(looks_like_tests("def test_add():\n    pass\n"));
        assert!(looks_like_tests("class TestAdd:\n    def test_a(self): pass\n"));
        assert!(looks_like_tests("async def test_io():\n    pass\n"));
        assert!(!looks_like_tests("I cannot help with that."));
        assert!(!looks_like_tests(""));
    }

    #[tokio::test]
    async fn test_zero_functions_skips_llm() {
        let generator = TestGenerator::new(Box::new(FailingClient));
        let tests = generator.generate(&state_with(&[])).await.unwrap();
        assert_eq!(tests, SKIP_MODULE);
        assert!(looks_like_tests(&tests));
        assert!(tests.contains("pytest.skip"));
    }

    #[tokio::test]
    async fn test_generate_with_mock_client() {
        let generator = TestGenerator::new(Box::new(MockLlmClient::new()));
        let tests = generator.generate(&state_with(&["add"])).await.unwrap();
        assert!(tests.contains("def test_dry_run_placeholder"));
        assert!(!tests.contains("<think>"));
    }

    #[tokio::test]
    async fn test_unusable_generation_is_typed() {
        let generator = TestGenerator::new(Box::new(FixedClient("I'm sorry, I can't do that.")));
        let err = generator.generate(&state_with(&["add"])).await.unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::UnusableGeneration { raw }) => {
                assert!(raw.contains("sorry"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_completion_error_is_typed() {
        let generator = TestGenerator::new(Box::new(FailingClient));
        let err = generator.generate(&state_with(&["add"])).await.unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::Completion { stage, message }) => {
                assert_eq!(*stage, "generator");
                assert!(message.contains("401"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
