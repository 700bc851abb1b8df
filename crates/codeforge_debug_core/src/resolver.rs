use async_trait::async_trait;
use std::path::Path;

use crate::types::{CommandOutput, FuzzerExecutable};
use crate::{OrchestratorError, Result};

/// Query that locates a built fuzz target, usually run inside the
/// project's container image.
#[async_trait]
pub trait ExecutableLookup: Send + Sync {
    async fn lookup_executable(&self, workspace: &Path, fuzzer_name: &str) -> Result<CommandOutput>;
}

/// Fuzzer names end up in shell commands and configuration names.
pub fn validate_fuzzer_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(OrchestratorError::Validation(
            "Fuzzer name is required".to_string(),
        ));
    }
    if name.starts_with('.') {
        return Err(OrchestratorError::Validation(format!(
            "Invalid fuzzer name '{name}': must not start with '.'"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(OrchestratorError::Validation(format!(
            "Invalid fuzzer name '{name}': unexpected character {bad:?}"
        )));
    }
    Ok(())
}

pub async fn resolve(
    lookup: &dyn ExecutableLookup,
    workspace: &Path,
    fuzzer_name: &str,
) -> Result<FuzzerExecutable> {
    validate_fuzzer_name(fuzzer_name)?;

    let output = lookup
        .lookup_executable(workspace, fuzzer_name)
        .await
        .map_err(|e| OrchestratorError::resolution(fuzzer_name, e.to_string()))?;

    if !output.success {
        return Err(OrchestratorError::resolution(fuzzer_name, output.diagnostic()));
    }

    let path = output
        .stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| {
            let detail = output.stderr.trim();
            let diagnostic = if detail.is_empty() {
                "lookup produced no output; has the fuzzer been built?".to_string()
            } else {
                detail.to_string()
            };
            OrchestratorError::resolution(fuzzer_name, diagnostic)
        })?;

    tracing::debug!("Resolved fuzzer {} to {}", fuzzer_name, path);
    Ok(FuzzerExecutable::new(path))
}
