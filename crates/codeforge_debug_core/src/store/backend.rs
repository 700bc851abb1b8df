use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

pub const CODELLDB_EXTENSION_ID: &str = "vadimcn.vscode-lldb";
pub const NATIVE_DEBUG_EXTENSION_ID: &str = "webfreak.debug";

/// Debugger tooling available in the host editor, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebuggerBackendCapability {
    /// CodeLLDB: launch request that creates a target and connects it.
    PathBasedLaunch,
    /// Native Debug: gdb attach over the network.
    RemoteAttach,
    /// Nothing recognised is installed; emit the remote-attach shape anyway.
    RemoteAttachFallback,
}

impl DebuggerBackendCapability {
    pub fn uses_remote_attach_shape(self) -> bool {
        !matches!(self, Self::PathBasedLaunch)
    }
}

pub fn detect_backend<I, S>(installed_ids: I) -> DebuggerBackendCapability
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut best = DebuggerBackendCapability::RemoteAttachFallback;
    for id in installed_ids {
        let id = id.as_ref().trim();
        let capability = if id.eq_ignore_ascii_case(CODELLDB_EXTENSION_ID) {
            DebuggerBackendCapability::PathBasedLaunch
        } else if id.eq_ignore_ascii_case(NATIVE_DEBUG_EXTENSION_ID) {
            DebuggerBackendCapability::RemoteAttach
        } else {
            continue;
        };
        best = best.min(capability);
    }
    best
}

pub fn attach_target(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebugConfiguration {
    pub name: String,
    pub backend: DebuggerBackendCapability,
    /// `host:port`; an empty host means the local machine.
    pub target: String,
    /// Local executable used for symbol resolution.
    pub executable: Option<PathBuf>,
    pub options: Map<String, Value>,
}

pub fn build_configuration(
    backend: DebuggerBackendCapability,
    name: &str,
    host: &str,
    port: u16,
    executable: Option<PathBuf>,
    options: Map<String, Value>,
) -> DebugConfiguration {
    DebugConfiguration {
        name: name.to_string(),
        backend,
        target: attach_target(host, port),
        executable,
        options,
    }
}

/// Escape a value for an lldb double-quoted argument.
fn lldb_quote_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

const REMOTE_ATTACH_KEYS: [&str; 7] = ["type", "request", "name", "target", "remote", "cwd", "executable"];

impl DebugConfiguration {
    pub fn to_json(&self) -> Value {
        match self.backend {
            DebuggerBackendCapability::PathBasedLaunch => self.lldb_launch_json(),
            DebuggerBackendCapability::RemoteAttach
            | DebuggerBackendCapability::RemoteAttachFallback => self.gdb_attach_json(),
        }
    }

    /// Parse an entry written in the remote-attach shape.
    pub fn from_remote_attach_json(value: &Value) -> Option<Self> {
        let entry = value.as_object()?;
        if entry.get("type").and_then(Value::as_str) != Some("gdb")
            || entry.get("request").and_then(Value::as_str) != Some("attach")
        {
            return None;
        }

        let options = entry
            .iter()
            .filter(|(key, _)| !REMOTE_ATTACH_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Some(Self {
            name: entry.get("name")?.as_str()?.to_string(),
            backend: DebuggerBackendCapability::RemoteAttach,
            target: entry.get("target")?.as_str()?.to_string(),
            executable: entry
                .get("executable")
                .and_then(Value::as_str)
                .map(PathBuf::from),
            options,
        })
    }

    fn lldb_launch_json(&self) -> Value {
        let mut config = Map::new();
        config.insert("type".to_string(), json!("lldb"));
        config.insert("request".to_string(), json!("launch"));
        config.insert("name".to_string(), json!(self.name));
        if let Some(exe) = &self.executable {
            let exe = exe.to_string_lossy();
            config.insert("program".to_string(), json!(exe));
            config.insert(
                "targetCreateCommands".to_string(),
                json!([format!("target create \"{}\"", lldb_quote_escape(&exe))]),
            );
        }
        // lldb wants a bare port for the local host.
        let remote = self.target.strip_prefix(':').unwrap_or(&self.target);
        config.insert(
            "processCreateCommands".to_string(),
            json!([format!("gdb-remote {remote}")]),
        );
        Value::Object(config)
    }

    fn gdb_attach_json(&self) -> Value {
        let mut config = Map::new();
        config.insert("type".to_string(), json!("gdb"));
        config.insert("request".to_string(), json!("attach"));
        config.insert("name".to_string(), json!(self.name));
        config.insert("target".to_string(), json!(self.target));
        config.insert("remote".to_string(), json!(true));
        config.insert("cwd".to_string(), json!("${workspaceRoot}"));
        if let Some(exe) = &self.executable {
            config.insert("executable".to_string(), json!(exe.to_string_lossy()));
        }
        for (key, value) in &self.options {
            config.insert(key.clone(), value.clone());
        }
        Value::Object(config)
    }
}
