//! The host editor surface: terminals, debug sessions and notifications.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TerminalId(pub u64);

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "terminal-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalOptions {
    pub name: String,
    pub shell_path: String,
    pub shell_args: Vec<String>,
}

/// Called with the id of every terminal that closes.
pub type CloseHandler = Arc<dyn Fn(TerminalId) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    /// Text offered to the user behind a "copy" action.
    pub copy_text: Option<String>,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
            copy_text: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
            copy_text: None,
        }
    }

    pub fn with_copy(mut self, text: impl Into<String>) -> Self {
        self.copy_text = Some(text.into());
        self
    }
}

/// Undo action for a registration; runs at most once.
pub struct Disposable {
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Disposable {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// Returns `true` only for the call that actually disposed.
    pub fn dispose(&self) -> bool {
        let action = self
            .action
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match action {
            Some(action) => {
                action();
                true
            }
            None => false,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.action
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[async_trait]
pub trait HostEditor: Send + Sync {
    /// Create and show a terminal running `shell_path shell_args`.
    async fn create_terminal(&self, options: TerminalOptions) -> Result<TerminalId, String>;

    fn on_terminal_close(&self, handler: CloseHandler) -> Disposable;

    /// `Ok(false)` when the editor declined to start the session.
    async fn start_debug_session(
        &self,
        workspace: &Path,
        configuration_name: &str,
    ) -> Result<bool, String>;

    fn installed_extension_ids(&self) -> Vec<String>;

    async fn notify(&self, notice: Notice);
}
