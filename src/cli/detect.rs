use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use super::read_inputs;
use crate::detector;

/// Print what the Detector stage finds, without calling any model.
pub fn run(readme: &Path, code: &Path, json: bool) -> Result<()> {
    let (readme_text, code_text) = read_inputs(readme, code)?;
    let detection = detector::detect(&code_text, &readme_text);
    info!(
        "Detected {} function(s) in {}",
        detection.functions.len(),
        code.display()
    );

    if json {
        let out =
            serde_json::to_string_pretty(&detection).context("Failed to serialize detection")?;
        println!("{}", out);
        return Ok(());
    }

    println!("Framework: {}", detection.framework);
    if detection.functions.is_empty() {
        println!("Functions: (none)");
    } else {
        println!("Functions ({}):", detection.functions.len());
        for name in &detection.functions {
            println!("  - {}", name);
        }
    }
    Ok(())
}
