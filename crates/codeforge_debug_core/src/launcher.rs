//! Debug session launcher.
//!
//! Drives one crash through validation, executable resolution, port
//! allocation and container launch, then persists a launch configuration and
//! hands off to the editor's debugger after a grace delay. Anything that goes
//! wrong before the container starts aborts the session; anything after it
//! degrades the session but leaves the container and a manual-connect path
//! in place.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::OrchestratorConfig;
use crate::editor::{HostEditor, Notice, TerminalId, TerminalOptions};
use crate::guard::LifecycleGuard;
use crate::resolver::{self, ExecutableLookup};
use crate::runtime::{default_image_name, shell_quote, ContainerRuntime};
use crate::store::{build_configuration, detect_backend, ConfigStore};
use crate::types::{ContainerHandle, DebugSession, LaunchRequest, ManualConnect, SessionState};
use crate::{paths, port, OrchestratorError, Result};

pub const CONTAINER_KIND: &str = "debug";

/// Launch configuration name for a fuzzer; the merge key in the store.
pub fn configuration_name(fuzzer_name: &str) -> String {
    format!("CodeForge GDB: {fuzzer_name}")
}

/// Shell command run inside the container: a one-shot gdbserver replaying
/// the crash against the fuzz target. Coverage profiling is disabled so the
/// replay does not write profile data over the workspace.
pub fn stub_command(container_port: u16, executable: &Path, crash_file: &Path) -> String {
    format!(
        "export LLVM_PROFILE_FILE=/dev/null && exec gdbserver --once 0.0.0.0:{} {} {}",
        container_port,
        shell_quote(&executable.to_string_lossy()),
        shell_quote(&crash_file.to_string_lossy()),
    )
}

/// Arguments for `<runtime> run` that start the debug container.
pub fn container_run_args(
    config: &OrchestratorConfig,
    container_name: &str,
    image: &str,
    workspace: &Path,
    host_port: u16,
    executable: &Path,
    crash_file: &Path,
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        if config.allocate_tty { "-it" } else { "-i" }.to_string(),
        "--name".to_string(),
        container_name.to_string(),
        "-p".to_string(),
        format!("{}:{}", host_port, config.container_port),
    ];
    if config.mount_workspace {
        let ws = workspace.to_string_lossy();
        args.push("-v".to_string());
        args.push(format!("{ws}:{ws}"));
        args.push("-w".to_string());
        args.push(ws.to_string());
    }
    args.push(image.to_string());
    args.push("sh".to_string());
    args.push("-c".to_string());
    args.push(stub_command(config.container_port, executable, crash_file));
    args
}

/// A session that failed before its container started.
#[derive(Debug, Error)]
#[error("Debug session failed during {state:?}: {error}")]
pub struct LaunchFailure {
    pub state: SessionState,
    #[source]
    pub error: OrchestratorError,
}

impl LaunchFailure {
    pub fn user_message(&self) -> String {
        match &self.error {
            OrchestratorError::Validation(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug)]
pub enum AttachOutcome {
    Attached,
    /// The editor could not start debugging; the container keeps running.
    Failed(OrchestratorError),
    /// The terminal closed during the grace delay.
    Cancelled,
    /// No launch configuration was saved; manual connect only.
    Skipped,
}

pub struct LaunchedSession {
    session: Arc<Mutex<DebugSession>>,
    container: ContainerHandle,
    terminal: TerminalId,
    guard: LifecycleGuard,
    manual: ManualConnect,
    degraded: Vec<OrchestratorError>,
    attach: Option<JoinHandle<AttachOutcome>>,
}

impl LaunchedSession {
    pub fn snapshot(&self) -> DebugSession {
        lock_session(&self.session).clone()
    }

    pub fn state(&self) -> SessionState {
        lock_session(&self.session).state()
    }

    pub fn container(&self) -> &ContainerHandle {
        &self.container
    }

    pub fn terminal(&self) -> TerminalId {
        self.terminal
    }

    pub fn guard(&self) -> &LifecycleGuard {
        &self.guard
    }

    pub fn manual_connect(&self) -> &ManualConnect {
        &self.manual
    }

    /// Non-fatal errors hit while launching.
    pub fn degraded(&self) -> &[OrchestratorError] {
        &self.degraded
    }

    /// Hand the pending attach step to the caller. `None` when there is none
    /// or it was already taken.
    pub fn take_attach(&mut self) -> Option<JoinHandle<AttachOutcome>> {
        self.attach.take()
    }

    /// Wait for the attach step. Later calls return [`AttachOutcome::Skipped`].
    pub async fn attach_outcome(&mut self) -> AttachOutcome {
        match self.attach.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                AttachOutcome::Failed(OrchestratorError::Attach(format!("attach task ended: {e}")))
            }),
            None => AttachOutcome::Skipped,
        }
    }
}

fn lock_session(session: &Mutex<DebugSession>) -> std::sync::MutexGuard<'_, DebugSession> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Move a shared session forward; refused when the terminal already closed.
fn advance_shared(session: &Mutex<DebugSession>, next: SessionState) -> bool {
    match lock_session(session).advance(next) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("{}", e);
            false
        }
    }
}

pub struct Launcher {
    config: OrchestratorConfig,
    workspace: PathBuf,
    runtime: Arc<dyn ContainerRuntime>,
    lookup: Arc<dyn ExecutableLookup>,
    editor: Arc<dyn HostEditor>,
    store: ConfigStore,
}

struct Resolved {
    image: String,
    executable: PathBuf,
    crash_file: PathBuf,
}

impl Launcher {
    pub fn new(
        config: OrchestratorConfig,
        workspace: impl Into<PathBuf>,
        runtime: Arc<dyn ContainerRuntime>,
        lookup: Arc<dyn ExecutableLookup>,
        editor: Arc<dyn HostEditor>,
    ) -> Self {
        let store = ConfigStore::new(config.launch_config.clone());
        Self {
            config,
            workspace: workspace.into(),
            runtime,
            lookup,
            editor,
            store,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    fn image(&self) -> String {
        self.config
            .image
            .clone()
            .unwrap_or_else(|| default_image_name(&self.workspace))
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    pub async fn launch(
        &self,
        request: LaunchRequest,
    ) -> std::result::Result<LaunchedSession, LaunchFailure> {
        let mut session = DebugSession::new(&request, &self.workspace, self.config.container_port);
        tracing::info!(
            "Starting debug session for crash {} of fuzzer {}",
            request.crash_identifier,
            request.fuzzer_name
        );

        let resolved = match self.prepare(&mut session, &request).await {
            Ok(resolved) => resolved,
            Err(error) => return Err(fail(&mut session, error)),
        };
        let host_port = match self.allocate(&mut session).await {
            Ok(port) => port,
            Err(error) => return Err(fail(&mut session, error)),
        };

        let session = Arc::new(Mutex::new(session));
        let (container, terminal, guard) = match self.start_container(&session, &resolved, host_port).await {
            Ok(started) => started,
            Err(error) => return Err(fail(&mut lock_session(&session), error)),
        };

        Ok(self
            .supervise(session, &request, resolved, container, terminal, guard, host_port)
            .await)
    }

    async fn prepare(&self, session: &mut DebugSession, request: &LaunchRequest) -> Result<Resolved> {
        let image = self.validate(request).await?;

        session.advance(SessionState::Resolving)?;
        let executable = resolver::resolve(self.lookup.as_ref(), &self.workspace, &request.fuzzer_name).await?;
        let executable = paths::map_to_container(executable.path(), &self.workspace);
        let crash_file = paths::map_to_container(&self.absolute(&request.crash_file_path), &self.workspace);
        for path in [&executable, &crash_file] {
            if !paths::is_within_workspace(path, &self.workspace) {
                tracing::warn!(
                    "{} is outside {}; it may not exist inside the container",
                    path.display(),
                    self.workspace.display()
                );
            }
        }

        Ok(Resolved {
            image,
            executable,
            crash_file,
        })
    }

    async fn validate(&self, request: &LaunchRequest) -> Result<String> {
        if request.crash_identifier.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "Crash identifier is required to start a debug session".to_string(),
            ));
        }
        resolver::validate_fuzzer_name(&request.fuzzer_name)?;
        if request.crash_file_path.as_os_str().is_empty() {
            return Err(OrchestratorError::Validation(
                "Crash file path is required to start a debug session".to_string(),
            ));
        }

        let crash_file = self.absolute(&request.crash_file_path);
        if !tokio::fs::try_exists(&crash_file).await.unwrap_or(false) {
            return Err(OrchestratorError::Validation(format!(
                "Crash file not found: {}",
                crash_file.display()
            )));
        }

        let project_dir = self.workspace.join(".codeforge");
        let initialized = tokio::fs::metadata(&project_dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !initialized {
            return Err(OrchestratorError::Validation(format!(
                "CodeForge is not initialized in {}. Initialize the project first.",
                self.workspace.display()
            )));
        }

        let image = self.image();
        match self.runtime.image_exists(&image).await {
            Ok(true) => Ok(image),
            Ok(false) => Err(OrchestratorError::Validation(format!(
                "Container image '{image}' not found. Build the project image first."
            ))),
            Err(e) => Err(OrchestratorError::Validation(format!(
                "Could not check container image '{image}': {e}"
            ))),
        }
    }

    async fn allocate(&self, session: &mut DebugSession) -> Result<u16> {
        session.advance(SessionState::Allocating)?;
        let host_port = port::find_available_port().await?;
        session.assign_host_port(host_port)?;
        Ok(host_port)
    }

    async fn start_container(
        &self,
        session: &Arc<Mutex<DebugSession>>,
        resolved: &Resolved,
        host_port: u16,
    ) -> Result<(ContainerHandle, TerminalId, LifecycleGuard)> {
        let container_name = self.runtime.generate_container_name(&self.workspace);
        let fuzzer_name = {
            let mut session = lock_session(session);
            session.advance(SessionState::Launching)?;
            session.assign_container_name(container_name.clone())?;
            session.fuzzer_name.clone()
        };

        let container = ContainerHandle {
            name: container_name.clone(),
            workspace_path: self.workspace.clone(),
            image: resolved.image.clone(),
            kind: CONTAINER_KIND.to_string(),
            tracked: false,
        };
        // Subscribe first so a terminal that dies immediately is still seen.
        let guard = LifecycleGuard::arm(
            self.editor.as_ref(),
            self.runtime.clone(),
            &container,
            session.clone(),
        );

        let options = TerminalOptions {
            name: format!("CodeForge Debug: {fuzzer_name}"),
            shell_path: self.runtime.program().to_string(),
            shell_args: container_run_args(
                &self.config,
                &container_name,
                &resolved.image,
                &self.workspace,
                host_port,
                &resolved.executable,
                &resolved.crash_file,
            ),
        };
        tracing::debug!("Launching {} {}", options.shell_path, options.shell_args.join(" "));

        let terminal = match self.editor.create_terminal(options).await {
            Ok(terminal) => terminal,
            Err(diagnostic) => {
                guard.abandon();
                return Err(OrchestratorError::Launch(diagnostic));
            }
        };
        guard.bind(terminal);
        tracing::info!("Container {} started in {}", container_name, terminal);

        Ok((container, terminal, guard))
    }

    async fn supervise(
        &self,
        session: Arc<Mutex<DebugSession>>,
        request: &LaunchRequest,
        resolved: Resolved,
        mut container: ContainerHandle,
        terminal: TerminalId,
        guard: LifecycleGuard,
        host_port: u16,
    ) -> LaunchedSession {
        let mut degraded = Vec::new();
        let target = crate::store::backend::attach_target(&self.config.attach_host, host_port);
        let mut manual = ManualConnect {
            target: target.clone(),
            host_port,
            configuration_name: None,
        };

        if !advance_shared(&session, SessionState::Tracking) {
            tracing::info!("{} closed before container {} was tracked", terminal, container.name);
            return LaunchedSession {
                session,
                container,
                terminal,
                guard,
                manual,
                degraded,
                attach: None,
            };
        }

        if self.runtime.track(&container).await {
            container.tracked = true;
            if guard.is_closed() {
                // The guard may already have untracked.
                self.runtime.untrack(&container.name).await;
                container.tracked = false;
            }
        } else {
            let error = OrchestratorError::Tracking {
                container: container.name.clone(),
                diagnostic: "container inventory refused the registration".to_string(),
            };
            tracing::warn!("{}", error);
            degraded.push(error);
        }

        let mut launched = LaunchedSession {
            session: session.clone(),
            container,
            terminal,
            guard: guard.clone(),
            manual: manual.clone(),
            degraded: Vec::new(),
            attach: None,
        };

        if !advance_shared(&session, SessionState::ConfiguringDebugger) {
            launched.degraded = degraded;
            return launched;
        }

        let backend = detect_backend(self.editor.installed_extension_ids());
        let name = configuration_name(&request.fuzzer_name);
        let configuration = build_configuration(
            backend,
            &name,
            &self.config.attach_host,
            host_port,
            Some(resolved.executable),
            self.config.debugger_options.to_map(),
        );
        tracing::debug!(
            "Selected debugger backend {:?} (remote attach: {})",
            backend,
            backend.uses_remote_attach_shape()
        );

        match self.store.persist(&self.workspace, &configuration).await {
            Ok(outcome) => {
                tracing::info!(
                    "Launch configuration '{}' {:?} (store existed: {})",
                    name,
                    outcome.action,
                    outcome.existed_before
                );
                manual.configuration_name = Some(name.clone());
                launched.attach = Some(tokio::spawn(await_attach(
                    self.editor.clone(),
                    self.workspace.clone(),
                    name,
                    self.config.attach_delay,
                    guard,
                    session,
                    manual.clone(),
                )));
            }
            Err(error) => {
                tracing::warn!("{}; falling back to manual connect", error);
                self.editor
                    .notify(
                        Notice::warning(format!(
                            "Could not save the debug configuration. {}",
                            manual.instructions()
                        ))
                        .with_copy(target),
                    )
                    .await;
                degraded.push(error);
            }
        }

        launched.manual = manual;
        launched.degraded = degraded;
        launched
    }
}

fn fail(session: &mut DebugSession, error: OrchestratorError) -> LaunchFailure {
    let state = session.state();
    if let Err(e) = session.advance(SessionState::Failed) {
        tracing::debug!("{}", e);
    }
    tracing::warn!("Debug session failed during {:?}: {}", state, error);
    LaunchFailure { state, error }
}

async fn await_attach(
    editor: Arc<dyn HostEditor>,
    workspace: PathBuf,
    configuration_name: String,
    delay: Duration,
    guard: LifecycleGuard,
    session: Arc<Mutex<DebugSession>>,
    manual: ManualConnect,
) -> AttachOutcome {
    if !advance_shared(&session, SessionState::AwaitingAttach) {
        return AttachOutcome::Cancelled;
    }

    // The stub is not polled for readiness; give it time to bind.
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = guard.closed() => {
            tracing::info!("Terminal closed before attach; not starting '{}'", configuration_name);
            return AttachOutcome::Cancelled;
        }
    }

    let result = editor.start_debug_session(&workspace, &configuration_name).await;
    if guard.is_closed() {
        return AttachOutcome::Cancelled;
    }

    let error = match result {
        Ok(true) => {
            advance_shared(&session, SessionState::Attached);
            tracing::info!("Debugger attached using '{}'", configuration_name);
            editor
                .notify(Notice::info(format!(
                    "Debugger attached to {} via '{}'",
                    manual.target, configuration_name
                )))
                .await;
            return AttachOutcome::Attached;
        }
        Ok(false) => OrchestratorError::Attach(format!(
            "editor declined to start '{configuration_name}'"
        )),
        Err(diagnostic) => OrchestratorError::Attach(diagnostic),
    };

    tracing::warn!("{}", error);
    editor
        .notify(
            Notice::warning(format!("{error}. {}", manual.instructions()))
                .with_copy(manual.target.clone()),
        )
        .await;
    AttachOutcome::Failed(error)
}
