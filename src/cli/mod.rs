pub mod detect;
pub mod run;

use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::error::PipelineError;

/// Read one of the two input files, mapping failures to an input error.
pub fn read_input(what: &'static str, path: &Path) -> Result<String, PipelineError> {
    fs::read_to_string(path).map_err(|e| PipelineError::Input {
        what,
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Read README and code, README first.
pub fn read_inputs(readme: &Path, code: &Path) -> Result<(String, String)> {
    let readme_text = read_input("README", readme)?;
    let code_text = read_input("code", code)?;
    Ok((readme_text, code_text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_inputs_ok() {
        let dir = tempfile::TempDir::new().unwrap();
        let readme = dir.path().join("README.md");
        let code = dir.path().join("app.py");
        fs::write(&readme, "# Demo").unwrap();
        fs::write(&code, "def f(): pass\n").unwrap();
        let (r, c) = read_inputs(&readme, &code).unwrap();
        assert_eq!(r, "# Demo");
        assert_eq!(c, "def f(): pass\n");
    }

    #[test]
    fn test_missing_code_is_input_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let readme = dir.path().join("README.md");
        fs::write(&readme, "# Demo").unwrap();
        let err = read_inputs(&readme, &dir.path().join("missing.py")).unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(e @ PipelineError::Input { what, .. }) => {
                assert_eq!(*what, "code");
                assert!(e.is_startup());
                assert!(e.to_string().contains("missing.py"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
