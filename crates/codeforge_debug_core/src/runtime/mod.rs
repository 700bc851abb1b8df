//! Container runtime client: naming, killing and tracking ephemeral
//! containers.

mod docker;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::types::{ContainerHandle, KillOutcome};
use crate::Result;

pub use docker::{DockerRuntime, DEFAULT_LOOKUP_TEMPLATE};

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Executable that terminals run to start containers.
    fn program(&self) -> &str;

    /// A name no other live container of this process uses.
    fn generate_container_name(&self, workspace: &Path) -> String;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    async fn kill(&self, name: &str, force: bool) -> Result<KillOutcome>;

    /// Register a container with the inventory; `false` if it was refused.
    async fn track(&self, handle: &ContainerHandle) -> bool;

    async fn untrack(&self, name: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedContainer {
    pub name: String,
    pub workspace: PathBuf,
    pub image: String,
    pub kind: String,
}

/// In-memory list of containers started by this process.
#[derive(Debug, Default)]
pub struct ContainerInventory {
    containers: Mutex<HashMap<String, TrackedContainer>>,
}

impl ContainerInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, handle: &ContainerHandle) -> bool {
        let mut containers = self
            .containers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if containers.contains_key(&handle.name) {
            return false;
        }
        containers.insert(
            handle.name.clone(),
            TrackedContainer {
                name: handle.name.clone(),
                workspace: handle.workspace_path.clone(),
                image: handle.image.clone(),
                kind: handle.kind.clone(),
            },
        );
        true
    }

    pub fn untrack(&self, name: &str) -> Option<TrackedContainer> {
        self.containers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name)
    }

    pub fn list(&self) -> Vec<TrackedContainer> {
        let mut list: Vec<_> = self
            .containers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

/// Lowercase workspace directory name restricted to characters container
/// and image names accept.
pub fn workspace_slug(workspace: &Path) -> String {
    let base = workspace
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let mut slug = String::with_capacity(base.len());
    for c in base.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "workspace".to_string()
    } else {
        slug.to_string()
    }
}

/// Image the project's build pipeline produces for a workspace.
pub fn default_image_name(workspace: &Path) -> String {
    format!("codeforge-{}", workspace_slug(workspace))
}

/// Quote a string for POSIX `sh`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str) -> ContainerHandle {
        ContainerHandle {
            name: name.to_string(),
            workspace_path: PathBuf::from("/ws"),
            image: "codeforge-ws".to_string(),
            kind: "debug".to_string(),
            tracked: false,
        }
    }

    #[test]
    fn test_workspace_slug() {
        assert_eq!(workspace_slug(Path::new("/home/me/My Project")), "my-project");
        assert_eq!(workspace_slug(Path::new("/src/libpng_1.6")), "libpng-1-6");
        assert_eq!(workspace_slug(Path::new("/")), "workspace");
        assert_eq!(workspace_slug(Path::new("/tmp/__")), "workspace");
    }

    #[test]
    fn test_default_image_name() {
        assert_eq!(default_image_name(Path::new("/ws")), "codeforge-ws");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/ws/a b"), "'/ws/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_inventory_refuses_duplicates() {
        let inventory = ContainerInventory::new();
        assert!(inventory.track(&handle("b")));
        assert!(inventory.track(&handle("a")));
        assert!(!inventory.track(&handle("a")));

        let names: Vec<_> = inventory.list().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b"]);

        assert!(inventory.untrack("a").is_some());
        assert!(inventory.untrack("a").is_none());
        assert_eq!(inventory.list().len(), 1);
    }
}
