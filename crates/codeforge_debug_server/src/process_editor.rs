//! Headless host editor: terminals are child processes whose output goes to
//! the log. There is no interactive debugger, so attach always falls back to
//! manual connect.

use std::{
    collections::HashMap,
    path::Path,
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use codeforge_debug_core::editor::{
    CloseHandler, Disposable, HostEditor, Notice, NoticeLevel, TerminalId, TerminalOptions,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    sync::oneshot,
};

pub const EXTENSIONS_ENV: &str = "CODEFORGE_DEBUG_EXTENSIONS";

type Listeners = Arc<Mutex<Vec<(u64, CloseHandler)>>>;

struct TerminalEntry {
    name: String,
    close: Option<oneshot::Sender<()>>,
}

pub struct ProcessEditor {
    extensions: Vec<String>,
    terminals: Arc<Mutex<HashMap<TerminalId, TerminalEntry>>>,
    listeners: Listeners,
    next_id: AtomicU64,
}

/// Comma or whitespace separated extension ids.
pub fn parse_extension_ids(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ProcessEditor {
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions,
            terminals: Arc::new(Mutex::new(HashMap::new())),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_env() -> Self {
        let extensions = std::env::var(EXTENSIONS_ENV)
            .map(|raw| parse_extension_ids(&raw))
            .unwrap_or_default();
        Self::new(extensions)
    }

    /// Terminate a terminal's process. Close observers fire once it exited.
    pub fn close_terminal(&self, id: TerminalId) -> bool {
        let sender = lock(&self.terminals)
            .get_mut(&id)
            .and_then(|entry| entry.close.take());
        match sender {
            Some(sender) => sender.send(()).is_ok(),
            None => false,
        }
    }

    pub fn open_terminals(&self) -> Vec<(TerminalId, String)> {
        let mut open: Vec<_> = lock(&self.terminals)
            .iter()
            .map(|(id, entry)| (*id, entry.name.clone()))
            .collect();
        open.sort();
        open
    }
}

fn fire_close(listeners: &Listeners, id: TerminalId) {
    let handlers: Vec<CloseHandler> = lock(listeners)
        .iter()
        .map(|(_, handler)| handler.clone())
        .collect();
    for handler in handlers {
        handler(id);
    }
}

async fn forward_output<R: AsyncRead + Unpin>(reader: R, terminal: TerminalId, stream: &'static str) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!("[{} {}] {}", terminal, stream, line);
    }
}

#[async_trait]
impl HostEditor for ProcessEditor {
    async fn create_terminal(&self, options: TerminalOptions) -> Result<TerminalId, String> {
        let mut child = Command::new(&options.shell_path)
            .args(&options.shell_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to start '{}': {e}", options.shell_path))?;

        let id = TerminalId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, id, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, id, "stderr"));
        }

        let (close_tx, close_rx) = oneshot::channel();
        lock(&self.terminals).insert(
            id,
            TerminalEntry {
                name: options.name.clone(),
                close: Some(close_tx),
            },
        );

        let terminals = self.terminals.clone();
        let listeners = self.listeners.clone();
        tokio::spawn(async move {
            let close_requested = tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => tracing::info!("{} exited with {}", id, status),
                        Err(e) => tracing::warn!("{} wait failed: {}", id, e),
                    }
                    false
                }
                _ = close_rx => true,
            };
            if close_requested {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to terminate {}: {}", id, e);
                }
                tracing::info!("{} closed", id);
            }
            lock(&terminals).remove(&id);
            fire_close(&listeners, id);
        });

        tracing::info!("Opened {} '{}'", id, options.name);
        Ok(id)
    }

    fn on_terminal_close(&self, handler: CloseHandler) -> Disposable {
        let key = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.listeners).push((key, handler));
        let listeners = Arc::downgrade(&self.listeners);
        Disposable::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                lock(&listeners).retain(|(k, _)| *k != key);
            }
        })
    }

    async fn start_debug_session(
        &self,
        _workspace: &Path,
        configuration_name: &str,
    ) -> Result<bool, String> {
        tracing::info!(
            "No interactive debugger in headless mode; '{}' must be started by a client",
            configuration_name
        );
        Ok(false)
    }

    fn installed_extension_ids(&self) -> Vec<String> {
        self.extensions.clone()
    }

    async fn notify(&self, notice: Notice) {
        let copy = notice
            .copy_text
            .as_deref()
            .map(|text| format!(" [{text}]"))
            .unwrap_or_default();
        match notice.level {
            NoticeLevel::Info => tracing::info!("{}{}", notice.message, copy),
            NoticeLevel::Warning => tracing::warn!("{}{}", notice.message, copy),
            NoticeLevel::Error => tracing::error!("{}{}", notice.message, copy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn options(script: &str) -> TerminalOptions {
        TerminalOptions {
            name: "test".to_string(),
            shell_path: "sh".to_string(),
            shell_args: vec!["-c".to_string(), script.to_string()],
        }
    }

    fn close_channel(editor: &ProcessEditor) -> (Disposable, mpsc::UnboundedReceiver<TerminalId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let disposable = editor.on_terminal_close(Arc::new(move |id| {
            let _ = tx.send(id);
        }));
        (disposable, rx)
    }

    #[test]
    fn parse_extension_ids_accepts_commas_and_spaces() {
        assert_eq!(
            parse_extension_ids("webfreak.debug, vadimcn.vscode-lldb,,  other"),
            vec!["webfreak.debug", "vadimcn.vscode-lldb", "other"]
        );
        assert!(parse_extension_ids("").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exited_process_fires_close_observers() {
        let editor = ProcessEditor::new(Vec::new());
        let (_disposable, mut closed) = close_channel(&editor);

        let id = editor
            .create_terminal(options("echo replaying; exit 0"))
            .await
            .expect("sh should start");

        let fired = tokio::time::timeout(Duration::from_secs(5), closed.recv())
            .await
            .expect("close should be observed");
        assert_eq!(fired, Some(id));
        assert!(editor.open_terminals().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn close_terminal_kills_the_process() {
        let editor = ProcessEditor::new(Vec::new());
        let (_disposable, mut closed) = close_channel(&editor);

        let id = editor
            .create_terminal(options("sleep 30"))
            .await
            .expect("sh should start");
        assert_eq!(editor.open_terminals(), vec![(id, "test".to_string())]);

        assert!(editor.close_terminal(id));
        assert!(!editor.close_terminal(id));

        let fired = tokio::time::timeout(Duration::from_secs(5), closed.recv())
            .await
            .expect("close should be observed");
        assert_eq!(fired, Some(id));
    }

    #[tokio::test]
    async fn disposed_observers_are_not_called() {
        let editor = ProcessEditor::new(Vec::new());
        let (disposable, mut closed) = close_channel(&editor);
        assert!(disposable.dispose());

        fire_close(&editor.listeners, TerminalId(9));
        assert!(closed.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_shell_is_reported() {
        let editor = ProcessEditor::new(Vec::new());
        let err = editor
            .create_terminal(TerminalOptions {
                name: "x".to_string(),
                shell_path: "/nonexistent/codeforge-shell".to_string(),
                shell_args: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(err.contains("/nonexistent/codeforge-shell"));
    }

    #[tokio::test]
    async fn headless_editor_declines_debug_sessions() {
        let editor = ProcessEditor::new(vec!["webfreak.debug".to_string()]);
        assert_eq!(
            editor.start_debug_session(Path::new("/ws"), "CodeForge GDB: f").await,
            Ok(false)
        );
        assert_eq!(editor.installed_extension_ids(), vec!["webfreak.debug"]);
    }
}
