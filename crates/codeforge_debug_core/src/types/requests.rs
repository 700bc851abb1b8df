use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Input of the orchestrator entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub crash_identifier: String,
    pub fuzzer_name: String,
    pub crash_file_path: PathBuf,
}

impl LaunchRequest {
    pub fn new(
        crash_identifier: impl Into<String>,
        fuzzer_name: impl Into<String>,
        crash_file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            crash_identifier: crash_identifier.into(),
            fuzzer_name: fuzzer_name.into(),
            crash_file_path: crash_file_path.into(),
        }
    }
}
