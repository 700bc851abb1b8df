use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::process::Command;

use super::{shell_quote, workspace_slug, ContainerInventory, ContainerRuntime, TrackedContainer};
use crate::config::OrchestratorConfig;
use crate::resolver::ExecutableLookup;
use crate::types::{CommandOutput, ContainerHandle, KillOutcome};
use crate::{OrchestratorError, Result};

/// Shell query locating a built fuzz target inside the project image.
pub const DEFAULT_LOOKUP_TEMPLATE: &str =
    "find {workspace}/.codeforge/fuzzing -maxdepth 1 -type f -name {fuzzer} -perm -100 -print -quit";

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Docker (or a CLI-compatible runtime such as podman).
#[derive(Debug)]
pub struct DockerRuntime {
    program: String,
    image: Option<String>,
    lookup_template: String,
    command_timeout: Duration,
    inventory: ContainerInventory,
    name_counter: AtomicU64,
}

impl DockerRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            image: None,
            lookup_template: DEFAULT_LOOKUP_TEMPLATE.to_string(),
            command_timeout: COMMAND_TIMEOUT,
            inventory: ContainerInventory::new(),
            name_counter: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let mut runtime = Self::new(config.runtime.clone());
        runtime.image = config.image.clone();
        runtime
    }

    pub fn with_lookup_template(mut self, template: impl Into<String>) -> Self {
        self.lookup_template = template.into();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn tracked(&self) -> Vec<TrackedContainer> {
        self.inventory.list()
    }

    fn image_for(&self, workspace: &Path) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| super::default_image_name(workspace))
    }

    fn lookup_args(&self, workspace: &Path, fuzzer_name: &str) -> Vec<String> {
        let ws = workspace.to_string_lossy().to_string();
        let query = self
            .lookup_template
            .replace("{workspace}", &shell_quote(&ws))
            .replace("{fuzzer}", &shell_quote(fuzzer_name));
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{ws}:{ws}"),
            "-w".to_string(),
            ws.clone(),
            self.image_for(workspace),
            "sh".to_string(),
            "-c".to_string(),
            query,
        ]
    }

    async fn run_captured(&self, args: &[String]) -> Result<CommandOutput> {
        tracing::debug!("Running {} {}", self.program, args.join(" "));
        let command = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.command_timeout, command)
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "`{} {}` timed out after {:?}",
                        self.program,
                        args.first().map(String::as_str).unwrap_or_default(),
                        self.command_timeout
                    ),
                )
            })??;

        Ok(CommandOutput {
            status_code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn classify_kill(name: &str, output: &CommandOutput) -> Result<KillOutcome> {
    if output.success {
        return Ok(KillOutcome::Killed);
    }
    let diagnostic = output.diagnostic();
    let lower = diagnostic.to_lowercase();
    if lower.contains("no such container") || lower.contains("is not running") {
        return Ok(KillOutcome::AlreadyGone);
    }
    Err(OrchestratorError::Cleanup {
        container: name.to_string(),
        diagnostic,
    })
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn program(&self) -> &str {
        &self.program
    }

    fn generate_container_name(&self, workspace: &Path) -> String {
        let seq = self.name_counter.fetch_add(1, Ordering::Relaxed);
        format!(
            "codeforge-{}-debug-{}-{}",
            workspace_slug(workspace),
            timestamp_millis(),
            seq
        )
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let args = ["image".to_string(), "inspect".to_string(), image.to_string()];
        Ok(self.run_captured(&args).await?.success)
    }

    async fn kill(&self, name: &str, force: bool) -> Result<KillOutcome> {
        let verb = if force { "kill" } else { "stop" };
        let output = self
            .run_captured(&[verb.to_string(), name.to_string()])
            .await
            .map_err(|e| OrchestratorError::Cleanup {
                container: name.to_string(),
                diagnostic: e.to_string(),
            })?;
        classify_kill(name, &output)
    }

    async fn track(&self, handle: &ContainerHandle) -> bool {
        self.inventory.track(handle)
    }

    async fn untrack(&self, name: &str) {
        self.inventory.untrack(name);
    }
}

#[async_trait]
impl ExecutableLookup for DockerRuntime {
    async fn lookup_executable(&self, workspace: &Path, fuzzer_name: &str) -> Result<CommandOutput> {
        self.run_captured(&self.lookup_args(workspace, fuzzer_name)).await
    }
}
