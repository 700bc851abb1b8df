use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::types::LaunchRequest;
use crate::{OrchestratorError, Result};

/// Launch progress of one debug session. Declaration order is the order in
/// which a session moves through its states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Validating,
    Resolving,
    Allocating,
    Launching,
    Tracking,
    ConfiguringDebugger,
    AwaitingAttach,
    Attached,
    Failed,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    pub fn can_advance_to(self, next: SessionState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => true,
            Self::Closed => self >= Self::Launching,
            _ => next > self,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugSession {
    pub fuzzer_name: String,
    pub crash_identifier: String,
    pub workspace_path: PathBuf,
    pub container_port: u16,
    host_port: Option<u16>,
    container_name: Option<String>,
    state: SessionState,
}

impl DebugSession {
    pub fn new(request: &LaunchRequest, workspace_path: &Path, container_port: u16) -> Self {
        Self {
            fuzzer_name: request.fuzzer_name.clone(),
            crash_identifier: request.crash_identifier.clone(),
            workspace_path: workspace_path.to_path_buf(),
            container_port,
            host_port: None,
            container_name: None,
            state: SessionState::Validating,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn host_port(&self) -> Option<u16> {
        self.host_port
    }

    pub fn container_name(&self) -> Option<&str> {
        self.container_name.as_deref()
    }

    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(
            "Session {} for fuzzer {}: {:?} -> {:?}",
            self.crash_identifier,
            self.fuzzer_name,
            self.state,
            next
        );
        self.state = next;
        Ok(())
    }

    pub(crate) fn assign_host_port(&mut self, port: u16) -> Result<()> {
        if let Some(existing) = self.host_port {
            return Err(OrchestratorError::Launch(format!(
                "host port already assigned ({existing})"
            )));
        }
        self.host_port = Some(port);
        Ok(())
    }

    pub(crate) fn assign_container_name(&mut self, name: impl Into<String>) -> Result<()> {
        if let Some(existing) = &self.container_name {
            return Err(OrchestratorError::Launch(format!(
                "container name already assigned ({existing})"
            )));
        }
        self.container_name = Some(name.into());
        Ok(())
    }
}

/// An ephemeral container owned by exactly one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerHandle {
    pub name: String,
    pub workspace_path: PathBuf,
    pub image: String,
    pub kind: String,
    pub tracked: bool,
}

/// Container-side path of a built fuzz target, valid for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzerExecutable {
    path: PathBuf,
}

impl FuzzerExecutable {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
