//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::editor::{CloseHandler, Disposable, HostEditor, Notice, TerminalId, TerminalOptions};
use crate::resolver::ExecutableLookup;
use crate::runtime::{ContainerInventory, ContainerRuntime};
use crate::types::{CommandOutput, ContainerHandle, KillOutcome};
use crate::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy)]
pub enum KillBehavior {
    Killed,
    AlreadyGone,
    Fails,
}

pub struct FakeRuntime {
    pub image_present: bool,
    pub accept_tracking: bool,
    pub kill_behavior: KillBehavior,
    pub kills: Mutex<Vec<(String, bool)>>,
    pub inventory: ContainerInventory,
    pub counter: AtomicU64,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self {
            image_present: true,
            accept_tracking: true,
            kill_behavior: KillBehavior::Killed,
            kills: Mutex::new(Vec::new()),
            inventory: ContainerInventory::new(),
            counter: AtomicU64::new(0),
        }
    }
}

impl FakeRuntime {
    pub fn kill_count(&self) -> usize {
        self.kills.lock().unwrap().len()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn program(&self) -> &str {
        "docker"
    }

    fn generate_container_name(&self, _workspace: &Path) -> String {
        format!("codeforge-test-debug-{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }

    async fn image_exists(&self, _image: &str) -> Result<bool> {
        Ok(self.image_present)
    }

    async fn kill(&self, name: &str, force: bool) -> Result<KillOutcome> {
        self.kills.lock().unwrap().push((name.to_string(), force));
        match self.kill_behavior {
            KillBehavior::Killed => Ok(KillOutcome::Killed),
            KillBehavior::AlreadyGone => Ok(KillOutcome::AlreadyGone),
            KillBehavior::Fails => Err(OrchestratorError::Cleanup {
                container: name.to_string(),
                diagnostic: "daemon unreachable".to_string(),
            }),
        }
    }

    async fn track(&self, handle: &ContainerHandle) -> bool {
        self.accept_tracking && self.inventory.track(handle)
    }

    async fn untrack(&self, name: &str) {
        self.inventory.untrack(name);
    }
}

pub struct FakeLookup {
    pub output: CommandOutput,
}

impl FakeLookup {
    pub fn found(path: impl AsRef<Path>) -> Self {
        Self {
            output: CommandOutput {
                status_code: Some(0),
                success: true,
                stdout: format!("{}\n", path.as_ref().display()),
                stderr: String::new(),
            },
        }
    }

    pub fn failing(stderr: &str) -> Self {
        Self {
            output: CommandOutput {
                status_code: Some(1),
                success: false,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        }
    }
}

#[async_trait]
impl ExecutableLookup for FakeLookup {
    async fn lookup_executable(&self, _workspace: &Path, _fuzzer: &str) -> Result<CommandOutput> {
        Ok(self.output.clone())
    }
}

type Listeners = Arc<Mutex<Vec<(u64, CloseHandler)>>>;

pub struct FakeEditor {
    pub extensions: Vec<String>,
    pub terminal_error: Option<String>,
    pub start_result: std::result::Result<bool, String>,
    pub terminals: Mutex<Vec<(TerminalId, TerminalOptions)>>,
    pub start_calls: Mutex<Vec<(PathBuf, String)>>,
    pub notices: Mutex<Vec<Notice>>,
    pub listeners: Listeners,
    pub next_id: AtomicU64,
}

impl Default for FakeEditor {
    fn default() -> Self {
        Self {
            extensions: Vec::new(),
            terminal_error: None,
            start_result: Ok(true),
            terminals: Mutex::new(Vec::new()),
            start_calls: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }
}

impl FakeEditor {
    /// Fire a close event the way the editor would.
    pub fn close_terminal(&self, id: TerminalId) {
        let handlers: Vec<CloseHandler> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(id);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn terminal_count(&self) -> usize {
        self.terminals.lock().unwrap().len()
    }
}

#[async_trait]
impl HostEditor for FakeEditor {
    async fn create_terminal(&self, options: TerminalOptions) -> std::result::Result<TerminalId, String> {
        if let Some(error) = &self.terminal_error {
            return Err(error.clone());
        }
        let id = TerminalId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.terminals.lock().unwrap().push((id, options));
        Ok(id)
    }

    fn on_terminal_close(&self, handler: CloseHandler) -> Disposable {
        let key = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((key, handler));
        let listeners = Arc::downgrade(&self.listeners);
        Disposable::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().unwrap().retain(|(k, _)| *k != key);
            }
        })
    }

    async fn start_debug_session(
        &self,
        workspace: &Path,
        configuration_name: &str,
    ) -> std::result::Result<bool, String> {
        self.start_calls
            .lock()
            .unwrap()
            .push((workspace.to_path_buf(), configuration_name.to_string()));
        self.start_result.clone()
    }

    fn installed_extension_ids(&self) -> Vec<String> {
        self.extensions.clone()
    }

    async fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}
