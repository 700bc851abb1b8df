//! Persistence of debugger launch configurations.
//!
//! The store is a single hand-editable JSON document shared with the editor
//! and the user. Reads are tolerant: a missing or unparsable file is treated
//! as empty. Comments are accepted on read and dropped on write.

pub mod backend;
pub mod jsonc;
pub mod locks;

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

use crate::types::{PersistAction, PersistOutcome};
use crate::{OrchestratorError, Result};

pub use backend::{
    build_configuration, detect_backend, DebugConfiguration, DebuggerBackendCapability,
};

pub const LAUNCH_VERSION: &str = "0.2.0";

#[derive(Debug, Clone)]
pub struct ConfigStore {
    relative_path: PathBuf,
}

struct LoadedDocument {
    root: Map<String, Value>,
    existed: bool,
}

impl LoadedDocument {
    fn empty(existed: bool) -> Self {
        let mut root = Map::new();
        root.insert("version".to_string(), json!(LAUNCH_VERSION));
        root.insert("configurations".to_string(), json!([]));
        Self { root, existed }
    }

    fn configurations(&self) -> &[Value] {
        self.root
            .get("configurations")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn configurations_mut(&mut self) -> &mut Vec<Value> {
        let slot = self
            .root
            .entry("configurations")
            .or_insert_with(|| json!([]));
        if !slot.is_array() {
            *slot = json!([]);
        }
        match slot {
            Value::Array(entries) => entries,
            _ => unreachable!("configurations was just normalized to an array"),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.configurations()
            .iter()
            .position(|entry| entry_name(entry) == Some(name))
    }

    /// Put `entry` where the first entry named `name` is and drop any later
    /// duplicates left by hand edits. Returns `false` when nothing matched.
    fn replace_all(&mut self, name: &str, entry: Value) -> bool {
        let Some(first) = self.position(name) else {
            return false;
        };
        let entries = self.configurations_mut();
        entries[first] = entry;

        let before = entries.len();
        let mut index = 0;
        entries.retain(|candidate| {
            let keep = index <= first || entry_name(candidate) != Some(name);
            index += 1;
            keep
        });
        let dropped = before - entries.len();
        if dropped > 0 {
            tracing::warn!("Dropped {} duplicate debug configuration(s) named '{}'", dropped, name);
        }
        true
    }
}

fn entry_name(entry: &Value) -> Option<&str> {
    entry.get("name").and_then(Value::as_str)
}

impl ConfigStore {
    pub fn new(relative_path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
        }
    }

    pub fn path(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.relative_path)
    }

    /// Insert or replace the entry named `configuration.name`.
    pub async fn persist(
        &self,
        workspace: &Path,
        configuration: &DebugConfiguration,
    ) -> Result<PersistOutcome> {
        let path = self.path(workspace);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| OrchestratorError::persist(&path, e))?;
        }

        let _guard = locks::lock_file(&path).await;
        let mut document = load(&path).await;
        let existed_before = document.existed;
        let entry = configuration.to_json();

        let action = if document.replace_all(&configuration.name, entry.clone()) {
            PersistAction::Updated
        } else {
            document.configurations_mut().push(entry);
            PersistAction::Created
        };

        write(&path, &document.root).await?;
        tracing::info!(
            "{:?} debug configuration '{}' in {}",
            action,
            configuration.name,
            path.display()
        );

        Ok(PersistOutcome {
            action,
            existed_before,
        })
    }

    pub async fn list_remote_attach(&self, workspace: &Path) -> Vec<DebugConfiguration> {
        let document = load(&self.path(workspace)).await;
        document
            .configurations()
            .iter()
            .filter_map(DebugConfiguration::from_remote_attach_json)
            .collect()
    }

    pub async fn exists(&self, workspace: &Path, name: &str) -> bool {
        load(&self.path(workspace)).await.position(name).is_some()
    }

    pub async fn get(&self, workspace: &Path, name: &str) -> Option<Value> {
        let document = load(&self.path(workspace)).await;
        document
            .position(name)
            .map(|index| document.configurations()[index].clone())
    }

    pub async fn remove(&self, workspace: &Path, name: &str) -> Result<()> {
        let path = self.path(workspace);
        let _guard = locks::lock_file(&path).await;
        let mut document = load(&path).await;

        let entries = document.configurations_mut();
        let before = entries.len();
        entries.retain(|entry| entry_name(entry) != Some(name));
        if entries.len() == before {
            return Err(OrchestratorError::NotFound(name.to_string()));
        }

        write(&path, &document.root).await?;
        tracing::info!("Removed debug configuration '{}' from {}", name, path.display());
        Ok(())
    }
}

async fn load(path: &Path) -> LoadedDocument {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return LoadedDocument::empty(false);
        }
        Err(e) => {
            tracing::warn!("Could not read {}, starting fresh: {}", path.display(), e);
            return LoadedDocument::empty(true);
        }
    };

    match jsonc::parse_tolerant(&text) {
        Ok(Value::Object(mut root)) => {
            if !root.get("version").map(Value::is_string).unwrap_or(false) {
                root.insert("version".to_string(), json!(LAUNCH_VERSION));
            }
            let mut document = LoadedDocument {
                root,
                existed: true,
            };
            document.configurations_mut();
            document
        }
        Ok(_) => {
            tracing::warn!("{} is not a JSON object, starting fresh", path.display());
            LoadedDocument::empty(true)
        }
        Err(e) => {
            tracing::warn!("Could not parse {}, starting fresh: {}", path.display(), e);
            LoadedDocument::empty(true)
        }
    }
}

async fn write(path: &Path, root: &Map<String, Value>) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    root.serialize(&mut serializer)
        .map_err(|e| OrchestratorError::persist(path, e))?;
    buf.push(b'\n');

    tokio::fs::write(path, buf)
        .await
        .map_err(|e| OrchestratorError::persist(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DebuggerOptions, DEFAULT_LAUNCH_CONFIG};

    fn store() -> ConfigStore {
        ConfigStore::new(DEFAULT_LAUNCH_CONFIG)
    }

    fn remote(name: &str, port: u16) -> DebugConfiguration {
        build_configuration(
            DebuggerBackendCapability::RemoteAttach,
            name,
            "",
            port,
            Some(PathBuf::from("/ws/.codeforge/fuzzing/img_fuzz")),
            DebuggerOptions::default().to_map(),
        )
    }

    async fn read_json(path: &Path) -> Value {
        let text = tokio::fs::read_to_string(path).await.unwrap();
        assert!(text.ends_with('\n'), "store file must end with a newline");
        serde_json::from_str(&text).expect("store file must be plain JSON")
    }

    #[tokio::test]
    async fn test_persist_creates_missing_file() {
        let ws = tempfile::tempdir().unwrap();
        let outcome = store()
            .persist(ws.path(), &remote("CodeForge GDB: img_fuzz", 54321))
            .await
            .unwrap();

        assert_eq!(outcome.action, PersistAction::Created);
        assert!(!outcome.existed_before);

        let doc = read_json(&store().path(ws.path())).await;
        assert_eq!(doc["version"], "0.2.0");
        assert_eq!(doc["configurations"].as_array().unwrap().len(), 1);
        assert_eq!(doc["configurations"][0]["target"], ":54321");
    }

    #[tokio::test]
    async fn test_persist_same_name_updates_in_place() {
        let ws = tempfile::tempdir().unwrap();
        let path = store().path(ws.path());
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(
            &path,
            r#"{
    // user entries
    "version": "0.2.0",
    "configurations": [
        {"type": "cppdbg", "request": "launch", "name": "first", "program": "a.out"},
        {"type": "gdb", "request": "attach", "name": "CodeForge GDB: img_fuzz", "target": ":1"},
        /* keep me */ {"type": "python", "name": "last"},
    ],
    "compounds": []
}"#,
        )
        .await
        .unwrap();

        let outcome = store()
            .persist(ws.path(), &remote("CodeForge GDB: img_fuzz", 54321))
            .await
            .unwrap();
        assert_eq!(outcome.action, PersistAction::Updated);
        assert!(outcome.existed_before);

        let doc = read_json(&path).await;
        let entries = doc["configurations"].as_array().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["name"], "first");
        assert_eq!(entries[0]["program"], "a.out");
        assert_eq!(entries[1]["name"], "CodeForge GDB: img_fuzz");
        assert_eq!(entries[1]["target"], ":54321");
        assert_eq!(entries[2]["name"], "last");
        assert_eq!(doc["compounds"], json!([]));
    }

    #[tokio::test]
    async fn test_persist_twice_keeps_one_entry_with_latest_payload() {
        let ws = tempfile::tempdir().unwrap();
        let first = store().persist(ws.path(), &remote("CodeForge GDB: img_fuzz", 40000)).await.unwrap();
        let second = store().persist(ws.path(), &remote("CodeForge GDB: img_fuzz", 40001)).await.unwrap();
        assert_eq!(first.action, PersistAction::Created);
        assert_eq!(second.action, PersistAction::Updated);
        assert!(second.existed_before);

        let doc = read_json(&store().path(ws.path())).await;
        let entries = doc["configurations"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["target"], ":40001");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_replaced() {
        let ws = tempfile::tempdir().unwrap();
        let path = store().path(ws.path());
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "{ this is not json").await.unwrap();

        let outcome = store().persist(ws.path(), &remote("a", 1)).await.unwrap();
        assert_eq!(outcome.action, PersistAction::Created);
        assert!(outcome.existed_before);

        let doc = read_json(&path).await;
        assert_eq!(doc["configurations"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_array_configurations_is_reset() {
        let ws = tempfile::tempdir().unwrap();
        let path = store().path(ws.path());
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, r#"{"version": 2, "configurations": {}}"#).await.unwrap();

        store().persist(ws.path(), &remote("a", 1)).await.unwrap();
        let doc = read_json(&path).await;
        assert_eq!(doc["version"], "0.2.0");
        assert_eq!(doc["configurations"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers_lose_nothing() {
        let ws = tempfile::tempdir().unwrap();
        let root = ws.path().to_path_buf();
        let mut tasks = Vec::new();
        for i in 0..10u16 {
            let root = root.clone();
            tasks.push(tokio::spawn(async move {
                store()
                    .persist(&root, &remote(&format!("CodeForge GDB: fuzz_{i}"), 3000 + i))
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let doc = read_json(&store().path(&root)).await;
        assert_eq!(doc["configurations"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_concurrent_writers_same_name_leave_one_entry() {
        let ws = tempfile::tempdir().unwrap();
        let root = ws.path().to_path_buf();
        let mut tasks = Vec::new();
        for i in 0..10u16 {
            let root = root.clone();
            tasks.push(tokio::spawn(async move {
                store()
                    .persist(&root, &remote("CodeForge GDB: img_fuzz", 5000 + i))
                    .await
                    .unwrap()
            }));
        }
        let mut created = 0;
        for task in tasks {
            if task.await.unwrap().action == PersistAction::Created {
                created += 1;
            }
        }
        assert_eq!(created, 1);

        let doc = read_json(&store().path(&root)).await;
        let entries = doc["configurations"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        let target = entries[0]["target"].as_str().unwrap();
        let written: Vec<String> = (0..10u16).map(|i| format!(":{}", 5000 + i)).collect();
        assert!(written.iter().any(|t| t == target), "unexpected target {target}");
    }

    #[tokio::test]
    async fn test_hand_edited_duplicates_collapse_to_one() {
        let ws = tempfile::tempdir().unwrap();
        let path = store().path(ws.path());
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(
            &path,
            r#"{
    "version": "0.2.0",
    "configurations": [
        {"type": "gdb", "request": "attach", "name": "CodeForge GDB: img_fuzz", "target": ":1"},
        {"type": "node", "request": "launch", "name": "web"},
        {"type": "gdb", "request": "attach", "name": "CodeForge GDB: img_fuzz", "target": ":2"}
    ]
}"#,
        )
        .await
        .unwrap();

        let outcome = store()
            .persist(ws.path(), &remote("CodeForge GDB: img_fuzz", 54321))
            .await
            .unwrap();
        assert_eq!(outcome.action, PersistAction::Updated);

        let doc = read_json(&path).await;
        let entries = doc["configurations"].as_array().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["CodeForge GDB: img_fuzz", "web"]);
        assert_eq!(entries[0]["target"], ":54321");

        tokio::fs::write(
            &path,
            r#"{"configurations": [{"name": "dup"}, {"name": "dup"}, {"name": "keep"}]}"#,
        )
        .await
        .unwrap();
        store().remove(ws.path(), "dup").await.unwrap();
        assert!(!store().exists(ws.path(), "dup").await);
        assert!(store().exists(ws.path(), "keep").await);
    }

    #[tokio::test]
    async fn test_queries_and_remove() {
        let ws = tempfile::tempdir().unwrap();
        let lldb = build_configuration(
            DebuggerBackendCapability::PathBasedLaunch,
            "CodeForge GDB: other",
            "",
            2,
            None,
            Map::new(),
        );
        store().persist(ws.path(), &remote("CodeForge GDB: img_fuzz", 1)).await.unwrap();
        store().persist(ws.path(), &lldb).await.unwrap();

        let remotes = store().list_remote_attach(ws.path()).await;
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].name, "CodeForge GDB: img_fuzz");

        assert!(store().exists(ws.path(), "CodeForge GDB: other").await);
        assert_eq!(
            store().get(ws.path(), "CodeForge GDB: other").await.unwrap()["type"],
            "lldb"
        );

        store().remove(ws.path(), "CodeForge GDB: other").await.unwrap();
        assert!(!store().exists(ws.path(), "CodeForge GDB: other").await);

        let err = store().remove(ws.path(), "CodeForge GDB: other").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(name) if name == "CodeForge GDB: other"));
    }

    #[tokio::test]
    async fn test_queries_on_missing_file() {
        let ws = tempfile::tempdir().unwrap();
        assert!(store().list_remote_attach(ws.path()).await.is_empty());
        assert!(!store().exists(ws.path(), "anything").await);
        assert!(matches!(
            store().remove(ws.path(), "anything").await,
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_directory_is_a_persist_error() {
        let ws = tempfile::tempdir().unwrap();
        // A regular file where the configuration directory should be.
        tokio::fs::write(ws.path().join(".vscode"), b"").await.unwrap();

        let err = store().persist(ws.path(), &remote("a", 1)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Persist { .. }), "{err:?}");
    }
}
