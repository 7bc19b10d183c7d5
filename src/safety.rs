//! Safety checks run before any output file is written.
//!
//! Every output is truncated on write, so an output that resolves to one of
//! the input tables would destroy the data it was derived from.

use anyhow::{bail, Result};
use std::path::Path;

/// Whether two paths name the same file. Existing files are compared by
/// canonical path, anything else by the path as given.
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => a == b,
    }
}

/// Validates that an output path is safe to overwrite.
///
/// Checks:
/// - Output filename must contain the required pattern (e.g., "playlist")
/// - Output cannot be the same file as any of the provided source paths
pub fn validate_output_path(output: &Path, required_pattern: &str, source_paths: &[&Path]) -> Result<()> {
    let output_name = output.file_name().and_then(|n| n.to_str()).unwrap_or("");

    if !output_name.contains(required_pattern) {
        bail!(
            "Safety check failed: output file '{}' must contain '{}' in the name",
            output.display(),
            required_pattern
        );
    }

    for source in source_paths {
        if same_file(output, source) {
            bail!(
                "Safety check failed: output '{}' cannot be the same as input '{}'",
                output.display(),
                source.display()
            );
        }
    }

    Ok(())
}
