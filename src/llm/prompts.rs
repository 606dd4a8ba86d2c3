//! Prompt builders for the generator, critic and reporter stages.

use crate::detector::Framework;
use crate::pipeline::state::WorkflowState;
use crate::util::truncate_chars;

/// Failing tests shown to the critic
const CRITIC_MAX_FAILURES: usize = 3;
const CRITIC_LONGREPR_CHARS: usize = 400;
const CRITIC_STDERR_CHARS: usize = 800;
const CRITIC_STDOUT_CHARS: usize = 2000;
const PREVIOUS_TESTS_CHARS: usize = 1500;

pub struct GeneratorPromptInput<'a> {
    pub functions: &'a [String],
    pub framework: Framework,
    pub code: &'a str,
    pub readme: &'a str,
    pub feedback: Option<&'a str>,
    pub previous_tests: Option<&'a str>,
    pub custom: Option<&'a str>,
    pub max_chars: usize,
}

fn framework_instructions(framework: Framework) -> &'static str {
    match framework {
        Framework::Flask => {
            "FLASK-SPECIFIC REQUIREMENTS:
- A pytest fixture named `client` (a Flask test client) is already defined. Do NOT define it again.
- Exercise routes with `client.get()` / `client.post()` and assert on status codes and JSON bodies.
- Plain helper functions can still be called directly."
        }
        Framework::FastApi => {
            "FASTAPI-SPECIFIC REQUIREMENTS:
- A pytest fixture named `client` (a `fastapi.testclient.TestClient`) is already defined. Do NOT define it again.
- Exercise endpoints with `client.get()` / `client.post()` and assert on `response.status_code` and `response.json()`."
        }
        Framework::Django => {
            "DJANGO-SPECIFIC REQUIREMENTS:
- A pytest fixture named `client` (a `django.test.Client`) is already defined. Do NOT define it again.
- Prefer calling view helpers directly; use `client` only for URL routing checks."
        }
        Framework::None => "",
    }
}

/// Prompt asking for one pytest test per detected function.
pub fn generator_prompt(input: &GeneratorPromptInput<'_>) -> String {
    let count = input.functions.len();
    let function_list = input.functions.join(", ");
    let feedback = match input.feedback {
        Some(f) if !f.trim().is_empty() => f,
        _ => "None. This is the first attempt.",
    };

    let mut prompt = format!(
        r#"You are an expert Python test generator. Write {count} pytest unit tests.

DETECTED FUNCTIONS ({count}): {function_list}
FRAMEWORK: {framework}
{instructions}

CRITICAL REQUIREMENTS:
1. Write EXACTLY ONE test function per detected function, named `test_<function_name>`.
2. The code under test is placed ABOVE your tests in the same file. Call the functions directly. Do NOT import them and do NOT redefine them.
3. Import pytest and any standard-library modules you use at the top of your tests.
4. Each test must be independent and deterministic. No network, no sleeping.
5. Assert the behavior the code actually implements. Use `pytest.approx` for floats.

FEEDBACK FROM PREVIOUS RUN:
{feedback}

CODE UNDER TEST:
```python
{code}
```

README (excerpt):
{readme}
"#,
        framework = input.framework.as_str().to_uppercase(),
        instructions = framework_instructions(input.framework),
        code = truncate_chars(input.code, input.max_chars),
        readme = truncate_chars(input.readme, input.max_chars / 2),
    );

    if let Some(previous) = input.previous_tests.filter(|p| !p.trim().is_empty()) {
        prompt.push_str(&format!(
            "\nPREVIOUS ATTEMPT (excerpt, fix it rather than starting over):\n```python\n{}\n```\n",
            truncate_chars(previous, PREVIOUS_TESTS_CHARS)
        ));
    }

    prompt.push_str(
        r#"
Return ONLY the test code wrapped in <PYTEST_FILE> tags, with no explanations:
<PYTEST_FILE>
import pytest

def test_function_name():
    ...
</PYTEST_FILE>
"#,
    );

    if let Some(custom) = input.custom {
        prompt.push_str(&format!("\n## Additional Instructions\n\n{}\n", custom));
    }

    prompt
}

/// Prompt asking for remediation feedback on a failed run.
pub fn critic_prompt(state: &WorkflowState, custom: Option<&str>) -> String {
    let report = state.execution_report.clone().unwrap_or_default();
    let summary = report.summary;

    let failures: Vec<String> = report
        .failing_tests()
        .take(CRITIC_MAX_FAILURES)
        .map(|t| {
            format!(
                "- {} ({})\n{}",
                t.nodeid,
                t.outcome,
                truncate_chars(t.longrepr.as_deref().unwrap_or(""), CRITIC_LONGREPR_CHARS)
            )
        })
        .collect();
    let failures = if failures.is_empty() {
        "(no per-test results available)".to_string()
    } else {
        failures.join("\n")
    };

    let exit_code = report
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string());

    let mut prompt = format!(
        r#"Analyze the pytest results and give SPECIFIC, ACTIONABLE feedback for the test generator.

FRAMEWORK: {framework}
DETECTED FUNCTIONS: {functions}
RESULTS: {passed}/{collected} passed, {failed} failed, {errors} errors. Exit code: {exit_code}.
ITERATION: {iteration} of {max_iterations}
RUNNER DIAGNOSTIC: {diagnostic}

FAILED TESTS:
{failures}

PYTEST STDOUT (excerpt):
{stdout}

PYTEST STDERR (excerpt):
{stderr}

GENERATED TESTS (excerpt):
```python
{tests}
```

YOUR TASK: Explain what the test generator must change so the tests pass against the code as written.
Name the failing tests and the exact fix (wrong expected value, missing import, wrong fixture usage, ...).
The code under test must not be changed.

RESPONSE FORMAT (JSON only):
{{"status": "needs_fix", "feedback": "your concise, actionable feedback"}}
"#,
        framework = state.detected_framework.as_str().to_uppercase(),
        functions = state.detected_functions.join(", "),
        passed = summary.passed,
        collected = summary.collected,
        failed = summary.failed,
        errors = summary.errors,
        iteration = state.iteration_count,
        max_iterations = state.max_iterations,
        diagnostic = report.diagnostic.as_deref().unwrap_or("none"),
        stdout = truncate_chars(&report.stdout, CRITIC_STDOUT_CHARS),
        stderr = truncate_chars(&report.stderr, CRITIC_STDERR_CHARS),
        tests = truncate_chars(&state.generated_tests, PREVIOUS_TESTS_CHARS),
    );

    if let Some(custom) = custom {
        prompt.push_str(&format!("\n## Additional Instructions\n\n{}\n", custom));
    }

    prompt
}

/// Prompt asking for a short closing summary for the user.
pub fn reporter_prompt(state: &WorkflowState, success: bool, custom: Option<&str>) -> String {
    let summary = state
        .execution_report
        .as_ref()
        .map(|r| r.summary)
        .unwrap_or_default();
    let outcome = if success {
        "All tests passed."
    } else {
        "Could not reach a 100% pass rate within the iteration limit."
    };

    let mut prompt = format!(
        r#"Write a concise final report for the user about this test generation run.

STATUS: {status}
ITERATIONS: {iterations} of {max_iterations}
FRAMEWORK: {framework}
FUNCTIONS DETECTED ({count}): {functions}
FINAL TEST RESULT: {passed}/{collected} passed, {failed} failed, {errors} errors.

SUMMARY: {outcome}

Keep it to a few sentences. Do NOT include <think> tags or internal reasoning.
"#,
        status = if success { "success" } else { "max_iterations" },
        iterations = state.iteration_count,
        max_iterations = state.max_iterations,
        framework = state.detected_framework.as_str().to_uppercase(),
        count = state.detected_functions.len(),
        functions = state.detected_functions.join(", "),
        passed = summary.passed,
        collected = summary.collected,
        failed = summary.failed,
        errors = summary.errors,
    );

    if let Some(custom) = custom {
        prompt.push_str(&format!("\n## Additional Instructions\n\n{}\n", custom));
    }

    prompt
}
