use anyhow::Result;
use std::path::Path;

use super::{open_engine, print_json};
use crate::cli::OutputFormat;

/// Run the verifier; failed checks make the command fail.
pub fn verify(root: &Path, full: bool, format: OutputFormat) -> Result<()> {
    let engine = open_engine(root, format);
    let result = engine.verify(full);

    if format == OutputFormat::Json {
        print_json(&result)?;
    } else {
        for check in &result.checks {
            let mark = if check.passed { "✓" } else { "✗" };
            println!("  {} {}: {}", mark, check.name, check.message);
        }
    }

    if !result.success {
        anyhow::bail!("{} verification check(s) failed", result.errors.len());
    }
    Ok(())
}
