use std::path::PathBuf;
use thiserror::Error;

use crate::types::SessionState;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Could not resolve fuzzer '{fuzzer}': {diagnostic}")]
    Resolution { fuzzer: String, diagnostic: String },

    #[error("No free port available: {0}")]
    PortAllocation(#[source] std::io::Error),

    #[error("Failed to launch debug container: {0}")]
    Launch(String),

    #[error("Failed to track container '{container}': {diagnostic}")]
    Tracking {
        container: String,
        diagnostic: String,
    },

    #[error("Failed to persist debug configuration to {}: {diagnostic}", .path.display())]
    Persist { path: PathBuf, diagnostic: String },

    #[error("Debugger did not attach: {0}")]
    Attach(String),

    #[error("Failed to clean up container '{container}': {diagnostic}")]
    Cleanup {
        container: String,
        diagnostic: String,
    },

    #[error("Debug configuration '{0}' not found")]
    NotFound(String),

    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn resolution(fuzzer: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self::Resolution {
            fuzzer: fuzzer.into(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn persist(path: impl Into<PathBuf>, diagnostic: impl ToString) -> Self {
        Self::Persist {
            path: path.into(),
            diagnostic: diagnostic.to_string(),
        }
    }

    /// Errors raised before a container exists abort the session; the rest
    /// leave a usable manual-connect path behind.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Resolution { .. }
                | Self::PortAllocation(_)
                | Self::Launch(_)
                | Self::InvalidTransition { .. }
        )
    }
}
