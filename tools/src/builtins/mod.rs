//! Built-in tools.

mod edit;
mod ls;
mod shell;
mod web_fetch;
mod write_file;

pub use edit::EditTool;
pub use ls::ListDirectoryTool;
pub use shell::ShellTool;
pub use web_fetch::{WebFetchTool, github_raw_url};
pub use write_file::WriteFileTool;

use std::path::{Component, Path, PathBuf};

use crate::config::{RuntimeConfig, ShellConfig};
use crate::registry::ToolRegistry;
use crate::shell::detect_shell;
use crate::ToolError;

/// Register every built-in tool. Names listed in the registry's exclude list
/// are skipped.
pub fn register_builtins(
    registry: &ToolRegistry,
    runtime: &RuntimeConfig,
    shell_config: &ShellConfig,
) -> Result<(), ToolError> {
    let root = runtime.target_dir.clone();
    registry.register_tool(ShellTool::new(
        detect_shell(Some(shell_config)),
        root.clone(),
        shell_config,
    ))?;
    registry.register_tool(EditTool::new(root.clone()))?;
    registry.register_tool(WriteFileTool::new(root.clone()))?;
    registry.register_tool(ListDirectoryTool::new(root))?;
    registry.register_tool(WebFetchTool::new()?)?;
    Ok(())
}

/// Resolve `path` (absolute or relative to `root`) to an absolute path inside
/// `root`. The target does not need to exist; its nearest existing ancestor
/// is canonicalized so symlinks cannot escape the root.
pub(crate) fn resolve_in_root(root: &Path, path: &str) -> Result<PathBuf, ToolError> {
    if path.trim().is_empty() {
        return Err(ToolError::BadArgs {
            message: "path must not be empty".to_string(),
        });
    }
    if path.chars().any(|c| c.is_control()) {
        return Err(ToolError::BadArgs {
            message: "path contains control characters".to_string(),
        });
    }
    let input = Path::new(path);
    if input.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ToolError::BadArgs {
            message: format!("path must not contain '..': {path}"),
        });
    }

    let root = root.canonicalize().map_err(|e| ToolError::BadArgs {
        message: format!("target directory {} is not accessible: {e}", root.display()),
    })?;
    let joined = if input.is_absolute() {
        input.to_path_buf()
    } else {
        root.join(input)
    };
    let resolved = canonicalize_for_create(&joined);
    if !resolved.starts_with(&root) {
        return Err(ToolError::BadArgs {
            message: format!(
                "path is outside the target directory ({}): {path}",
                root.display()
            ),
        });
    }
    Ok(resolved)
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest.
fn canonicalize_for_create(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut rest: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return rest.iter().rev().fold(canonical, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name);
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// `path` relative to `root` for display, falling back to the full path.
pub(crate) fn display_relative(path: &Path, root: &Path) -> String {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    path.strip_prefix(&root)
        .map(|rel| rel.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::{display_relative, resolve_in_root};

    #[test]
    fn resolves_relative_and_new_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let resolved = resolve_in_root(dir.path(), "new/dir/file.txt").unwrap();
        assert_eq!(resolved, root.join("new/dir/file.txt"));
        assert_eq!(display_relative(&resolved, dir.path()), "new/dir/file.txt");
    }

    #[test]
    fn accepts_absolute_paths_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let inside = root.join("a.txt");
        let resolved = resolve_in_root(dir.path(), inside.to_str().unwrap()).unwrap();
        assert_eq!(resolved, inside);
    }

    #[test]
    fn rejects_escapes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_in_root(dir.path(), "../etc/passwd").is_err());
        assert!(resolve_in_root(dir.path(), "/etc/passwd").is_err());
        assert!(resolve_in_root(dir.path(), "").is_err());
        assert!(resolve_in_root(dir.path(), "a\u{0}b").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        assert!(resolve_in_root(dir.path(), "link/secret.txt").is_err());
    }
}
