//! Workspace confinement for note paths

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Path {path} is outside workspace {workspace}")]
pub struct PathValidationError {
    pub path: String,
    pub workspace: String,
}

/// Resolve a note path against the workspace root.
///
/// Note paths are workspace-relative; a leading `/` is treated as the
/// workspace root rather than the filesystem root. An absolute path that
/// already lies under the root is accepted as is. `..` is resolved lexically
/// and symlinks are followed for the part of the path that exists, so the
/// result can be compared against the canonical root.
pub async fn validate_workspace_path(
    path: &str,
    workspace_root: &Path,
) -> Result<PathBuf, PathValidationError> {
    let root = tokio::fs::canonicalize(workspace_root)
        .await
        .unwrap_or_else(|_| normalize(workspace_root));

    let candidate = Path::new(path.trim());
    let joined = if candidate.is_absolute() && candidate.starts_with(&root) {
        candidate.to_path_buf()
    } else {
        let relative = path.trim().trim_start_matches(['/', '\\']);
        root.join(relative)
    };

    let resolved = resolve_existing_prefix(&normalize(&joined)).await;
    if is_path_within_workspace(&resolved, &root) {
        Ok(resolved)
    } else {
        Err(PathValidationError {
            path: path.to_string(),
            workspace: root.display().to_string(),
        })
    }
}

/// Lexical containment check; both paths should already be normalized
pub fn is_path_within_workspace(path: &Path, workspace_root: &Path) -> bool {
    path.starts_with(workspace_root)
}

/// Path of `path` relative to the workspace, with `/` separators
pub fn display_relative(path: &Path, workspace_root: &Path) -> String {
    let relative = path.strip_prefix(workspace_root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
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

async fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut missing: Vec<OsString> = Vec::new();

    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }

    let mut resolved = tokio::fs::canonicalize(&existing)
        .await
        .unwrap_or(existing);
    for name in missing.into_iter().rev() {
        resolved.push(name);
    }
    resolved
}
