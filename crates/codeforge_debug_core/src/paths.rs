//! Host to container path translation.
//!
//! The workspace is bind-mounted into the container at the same absolute
//! path, so a host path under the workspace is also its container path.

use std::path::{Component, Path, PathBuf};

/// Map a host path to the path the container sees.
///
/// Containment is not checked here; use [`is_within_workspace`] when the
/// caller needs to know.
pub fn map_to_container(host_path: &Path, _workspace_root: &Path) -> PathBuf {
    host_path.to_path_buf()
}

/// Component-wise containment check, after lexically folding `.` and `..`.
pub fn is_within_workspace(path: &Path, workspace_root: &Path) -> bool {
    if !path.is_absolute() || !workspace_root.is_absolute() {
        return false;
    }
    normalize(path).starts_with(normalize(workspace_root))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
