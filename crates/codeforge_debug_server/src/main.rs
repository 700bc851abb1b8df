use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use codeforge_debug_core::{
    types::LaunchRequest, AttachOutcome, DockerRuntime, LaunchedSession, Launcher, OrchestratorConfig,
    OrchestratorError,
};
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters, ServerHandler},
    model::*,
    tool, tool_handler, tool_router, transport, ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};

mod process_editor;

use process_editor::ProcessEditor;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DebugCrashParams {
    /// Identifier of the crash as reported by the fuzzer.
    crash_identifier: String,
    fuzzer_name: String,
    /// Absolute, or relative to the workspace.
    crash_file_path: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct CloseDebugSessionParams {
    container_name: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ListDebugSessionsParams {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ListDebugConfigurationsParams {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct RemoveDebugConfigurationParams {
    name: String,
}

fn to_mcp_error(message: impl Into<String>) -> McpError {
    McpError::internal_error(message.into(), None)
}

fn attach_summary(outcome: &AttachOutcome) -> Value {
    match outcome {
        AttachOutcome::Attached => json!({ "status": "attached" }),
        AttachOutcome::Failed(e) => json!({ "status": "failed", "error": e.to_string() }),
        AttachOutcome::Cancelled => json!({ "status": "cancelled" }),
        AttachOutcome::Skipped => json!({ "status": "skipped" }),
    }
}

/// Publish the attach result once the launcher's attach step finishes.
fn watch_attach(task: Option<JoinHandle<AttachOutcome>>) -> watch::Receiver<Value> {
    let Some(task) = task else {
        return watch::channel(attach_summary(&AttachOutcome::Skipped)).1;
    };

    let (tx, rx) = watch::channel(json!({ "status": "pending" }));
    tokio::spawn(async move {
        let outcome = task.await.unwrap_or_else(|e| {
            AttachOutcome::Failed(OrchestratorError::Attach(format!("attach task ended: {e}")))
        });
        tx.send_replace(attach_summary(&outcome));
    });
    rx
}

struct SessionRecord {
    launched: LaunchedSession,
    attach: watch::Receiver<Value>,
}

fn session_summary(record: &SessionRecord) -> Value {
    let launched = &record.launched;
    let session = launched.snapshot();
    json!({
        "container_name": launched.container().name,
        "fuzzer_name": session.fuzzer_name,
        "crash_identifier": session.crash_identifier,
        "state": session.state(),
        "host_port": session.host_port(),
        "container_port": session.container_port,
        "terminal": launched.terminal().to_string(),
        "tracked": launched.container().tracked,
        "target": launched.manual_connect().target,
        "configuration_name": launched.manual_connect().configuration_name,
        "attach": record.attach.borrow().clone(),
    })
}

#[derive(Clone)]
struct CodeForgeDebugServer {
    tool_router: ToolRouter<Self>,
    workspace: PathBuf,
    launcher: Arc<Launcher>,
    editor: Arc<ProcessEditor>,
    sessions: Arc<Mutex<HashMap<String, SessionRecord>>>,
}

#[tool_router]
impl CodeForgeDebugServer {
    fn new(config: OrchestratorConfig, workspace: PathBuf) -> Self {
        let runtime = Arc::new(DockerRuntime::from_config(&config));
        let editor = Arc::new(ProcessEditor::from_env());
        let launcher = Launcher::new(
            config,
            workspace.clone(),
            runtime.clone(),
            runtime,
            editor.clone(),
        );

        Self {
            tool_router: Self::tool_router(),
            workspace,
            launcher: Arc::new(launcher),
            editor,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[tool(description = "Replay a fuzzer crash under gdbserver in a container and prepare a debugger attach")]
    async fn fuzz_debug_crash(
        &self,
        params: Parameters<DebugCrashParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let request = LaunchRequest::new(
            params.crash_identifier,
            params.fuzzer_name,
            params.crash_file_path,
        );

        let mut launched = self
            .launcher
            .launch(request)
            .await
            .map_err(|failure| {
                if failure.error.is_fatal() {
                    McpError::invalid_request(failure.user_message(), None)
                } else {
                    to_mcp_error(failure.user_message())
                }
            })?;

        let attach = watch_attach(launched.take_attach());
        let record = SessionRecord { launched, attach };

        let degraded: Vec<String> = record
            .launched
            .degraded()
            .iter()
            .map(ToString::to_string)
            .collect();
        let mut summary = session_summary(&record);
        summary["degraded"] = json!(degraded);
        summary["instructions"] = json!(record.launched.manual_connect().instructions());

        self.sessions
            .lock()
            .await
            .insert(record.launched.container().name.clone(), record);

        Ok(CallToolResult::structured(summary))
    }

    #[tool(description = "Close a debug session's terminal, which kills its container")]
    async fn fuzz_close_debug_session(
        &self,
        params: Parameters<CloseDebugSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        let SessionRecord { launched, .. } = self
            .sessions
            .lock()
            .await
            .remove(&params.0.container_name)
            .ok_or_else(|| {
                McpError::invalid_params(
                    format!("No debug session for container '{}'", params.0.container_name),
                    None,
                )
            })?;

        if !self.editor.close_terminal(launched.terminal()) {
            tracing::info!("{} had already closed", launched.terminal());
        }
        tokio::time::timeout(CLOSE_TIMEOUT, launched.guard().settled())
            .await
            .map_err(|_| to_mcp_error("Timed out waiting for the container to be cleaned up"))?;

        Ok(CallToolResult::structured(json!({
            "container_name": launched.container().name,
            "state": launched.state(),
            "kill_attempts": launched.guard().kill_count(),
        })))
    }

    #[tool(description = "List debug sessions whose terminal is still open")]
    async fn fuzz_list_debug_sessions(
        &self,
        _params: Parameters<ListDebugSessionsParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, record| !record.launched.guard().is_closed());

        let mut listed: Vec<Value> = sessions.values().map(session_summary).collect();
        listed.sort_by(|a, b| a["container_name"].as_str().cmp(&b["container_name"].as_str()));

        Ok(CallToolResult::structured(json!({
            "sessions": listed,
            "open_terminals": self.editor.open_terminals().len(),
        })))
    }

    #[tool(description = "List remote-attach launch configurations saved in the workspace")]
    async fn fuzz_list_debug_configurations(
        &self,
        _params: Parameters<ListDebugConfigurationsParams>,
    ) -> Result<CallToolResult, McpError> {
        let store = self.launcher.store();
        let configurations: Vec<Value> = store
            .list_remote_attach(&self.workspace)
            .await
            .into_iter()
            .map(|configuration| {
                json!({
                    "name": configuration.name,
                    "target": configuration.target,
                    "executable": configuration.executable,
                })
            })
            .collect();

        Ok(CallToolResult::structured(json!({
            "path": store.path(&self.workspace),
            "configurations": configurations,
        })))
    }

    #[tool(description = "Remove a launch configuration by name")]
    async fn fuzz_remove_debug_configuration(
        &self,
        params: Parameters<RemoveDebugConfigurationParams>,
    ) -> Result<CallToolResult, McpError> {
        self.launcher
            .store()
            .remove(&self.workspace, &params.0.name)
            .await
            .map_err(|e| match e {
                OrchestratorError::NotFound(_) => McpError::invalid_params(e.to_string(), None),
                other => to_mcp_error(other.to_string()),
            })?;

        Ok(CallToolResult::structured(json!({
            "removed": params.0.name,
        })))
    }
}

#[tool_handler]
impl ServerHandler for CodeForgeDebugServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "CodeForge debug server: replays fuzzer crashes under gdbserver in containers".into(),
            ),
        }
    }
}

fn workspace_from_env() -> std::io::Result<PathBuf> {
    match std::env::var_os("CODEFORGE_WORKSPACE") {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => std::env::current_dir(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the MCP transport.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let mut config = OrchestratorConfig::from_env();
    if std::env::var_os("CODEFORGE_TTY").is_none() {
        // Terminals here are plain child processes.
        config.allocate_tty = false;
    }
    let workspace = workspace_from_env()?;

    let server = CodeForgeDebugServer::new(config, workspace.clone());
    let transport = transport::stdio();

    tracing::info!("Starting CodeForge Debug Server for {} on stdio...", workspace.display());

    server.serve(transport).await?.waiting().await?;

    Ok(())
}
