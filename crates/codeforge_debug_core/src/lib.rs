//! CodeForge Debug Core
//!
//! Orchestrates remote-debug sessions for fuzzer crashes: a crash is replayed
//! under gdbserver inside an ephemeral container, a launch configuration is
//! written into the workspace, and the host editor's debugger attaches over a
//! forwarded port. The container lives exactly as long as its terminal.

pub mod config;
pub mod editor;
pub mod error;
pub mod guard;
pub mod launcher;
pub mod paths;
pub mod port;
pub mod resolver;
pub mod runtime;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::OrchestratorConfig;
pub use editor::HostEditor;
pub use error::OrchestratorError;
pub use guard::LifecycleGuard;
pub use launcher::{AttachOutcome, LaunchFailure, LaunchedSession, Launcher};
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use store::ConfigStore;

/// Result type alias using OrchestratorError
pub type Result<T> = std::result::Result<T, OrchestratorError>;
