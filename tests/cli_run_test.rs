//! `testloop run` end to end with the mock model and a shell stand-in for pytest.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use testloop::cli::run::{run, RunOverrides};
use testloop::error::PipelineError;
use testloop::pipeline::workflow::{FAILURE_FILE_NAME, SUCCESS_FILE_NAME};

struct Fixture {
    dir: TempDir,
    readme: PathBuf,
    code: PathBuf,
    config: PathBuf,
}

fn fixture(runner_script: &str) -> Fixture {
    let dir = TempDir::new().unwrap();
    let readme = dir.path().join("README.md");
    let code = dir.path().join("calc.py");
    let config = dir.path().join("testloop.toml");
    fs::write(&readme, "# Calc\n\nA tiny calculator.\n").unwrap();
    fs::write(&code, "def add(a, b):\n    return a + b\n").unwrap();
    fs::write(
        &config,
        format!(
            r#"
[runner]
program = "sh"
args = ["-c", "{}", "runner"]
timeout_secs = 10
json_report = false
"#,
            runner_script
        ),
    )
    .unwrap();
    Fixture {
        dir,
        readme,
        code,
        config,
    }
}

fn overrides(output_dir: &Path, max_iterations: u32) -> RunOverrides {
    RunOverrides {
        max_iterations: Some(max_iterations),
        output_dir: Some(output_dir.to_string_lossy().to_string()),
        ..RunOverrides::default()
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_dry_run_success_writes_generated_file() {
    let fx = fixture("echo '1 passed in 0.01s'");
    let out = fx.dir.path().join("out");
    let summary = fx.dir.path().join("summary.json");

    let outcome = run(
        fx.readme.clone(),
        fx.code.clone(),
        Some(fx.config.to_string_lossy().to_string()),
        overrides(&out, 3),
        Some(summary.clone()),
        true,
    )
    .await
    .unwrap();

    assert!(outcome.is_success());
    let written = fs::read_to_string(out.join(SUCCESS_FILE_NAME)).unwrap();
    assert!(written.starts_with("def add(a, b):\n    return a + b\n"));
    assert!(written.contains("def test_dry_run_placeholder"));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(json["iteration_count"], 1);
    assert_eq!(json["detected_functions"][0], "add");
    assert_eq!(json["detected_framework"], "none");
    assert_eq!(json["execution_report"]["summary"]["passed"], 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_dry_run_failure_writes_failed_file() {
    let fx = fixture("echo '1 failed in 0.01s'; echo 'AssertionError' 1>&2; exit 1");
    let out = fx.dir.path().join("out");

    let outcome = run(
        fx.readme.clone(),
        fx.code.clone(),
        Some(fx.config.to_string_lossy().to_string()),
        overrides(&out, 2),
        None,
        true,
    )
    .await
    .unwrap();

    assert!(!outcome.is_success());
    assert_eq!(outcome.state().iteration_count, 2);
    assert!(out.join(FAILURE_FILE_NAME).exists());
    assert!(!out.join(SUCCESS_FILE_NAME).exists());
    let report = outcome.state().execution_report.as_ref().unwrap();
    assert!(report.stderr.contains("AssertionError"));
}

#[tokio::test]
async fn test_missing_readme_is_startup_error() {
    let fx = fixture("exit 0");
    let err = run(
        fx.dir.path().join("MISSING.md"),
        fx.code.clone(),
        Some(fx.config.to_string_lossy().to_string()),
        overrides(fx.dir.path(), 3),
        None,
        true,
    )
    .await
    .unwrap_err();

    match err.downcast_ref::<PipelineError>() {
        Some(e @ PipelineError::Input { what, .. }) => {
            assert_eq!(*what, "README");
            assert!(e.is_startup());
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_zero_max_iterations_is_startup_error() {
    let fx = fixture("exit 0");
    let err = run(
        fx.readme.clone(),
        fx.code.clone(),
        Some(fx.config.to_string_lossy().to_string()),
        overrides(fx.dir.path(), 0),
        None,
        true,
    )
    .await
    .unwrap_err();

    let pipeline_err = err.downcast_ref::<PipelineError>().unwrap();
    assert!(matches!(pipeline_err, PipelineError::InvalidConfig(_)));
    assert!(pipeline_err.is_startup());
    assert!(!fx.dir.path().join(FAILURE_FILE_NAME).exists());
}
