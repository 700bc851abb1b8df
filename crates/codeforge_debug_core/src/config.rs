use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value};

pub const DEFAULT_CONTAINER_PORT: u16 = 2000;
pub const DEFAULT_ATTACH_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_LAUNCH_CONFIG: &str = ".vscode/launch.json";

/// Free-form options passed through to the remote-attach configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DebuggerOptions {
    pub values_formatting: String,
    pub print_calls: bool,
    pub autorun: Vec<String>,
}

impl Default for DebuggerOptions {
    fn default() -> Self {
        Self {
            values_formatting: "parseText".to_string(),
            print_calls: false,
            autorun: Vec::new(),
        }
    }
}

impl DebuggerOptions {
    pub fn to_map(&self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert(
            "valuesFormatting".to_string(),
            Value::String(self.values_formatting.clone()),
        );
        options.insert("printCalls".to_string(), Value::Bool(self.print_calls));
        options.insert(
            "autorun".to_string(),
            Value::Array(self.autorun.iter().cloned().map(Value::String).collect()),
        );
        options
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Port the stub listens on inside the container network namespace.
    pub container_port: u16,
    /// Grace period between terminal creation and the attach request.
    pub attach_delay: Duration,
    /// Host part of the attach target; empty means the local host.
    pub attach_host: String,
    /// Container runtime executable.
    pub runtime: String,
    /// Image override; derived from the workspace name when unset.
    pub image: Option<String>,
    pub mount_workspace: bool,
    pub allocate_tty: bool,
    /// Launch configuration file, relative to the workspace root.
    pub launch_config: PathBuf,
    pub debugger_options: DebuggerOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            container_port: DEFAULT_CONTAINER_PORT,
            attach_delay: DEFAULT_ATTACH_DELAY,
            attach_host: String::new(),
            runtime: "docker".to_string(),
            image: None,
            mount_workspace: true,
            allocate_tty: true,
            launch_config: PathBuf::from(DEFAULT_LAUNCH_CONFIG),
            debugger_options: DebuggerOptions::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let container_port = std::env::var("CODEFORGE_CONTAINER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .filter(|port| *port != 0)
            .unwrap_or(defaults.container_port);

        let attach_delay = std::env::var("CODEFORGE_ATTACH_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.attach_delay);

        let attach_host =
            std::env::var("CODEFORGE_ATTACH_HOST").unwrap_or(defaults.attach_host);

        let runtime = std::env::var("CODEFORGE_RUNTIME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.runtime);

        let image = std::env::var("CODEFORGE_IMAGE")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let launch_config = std::env::var("CODEFORGE_LAUNCH_CONFIG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.launch_config);

        Self {
            container_port,
            attach_delay,
            attach_host,
            runtime,
            image,
            mount_workspace: env_flag("CODEFORGE_MOUNT_WORKSPACE", defaults.mount_workspace),
            allocate_tty: env_flag("CODEFORGE_TTY", defaults.allocate_tty),
            launch_config,
            debugger_options: defaults.debugger_options,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name).ok().as_deref().map(str::trim) {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}
