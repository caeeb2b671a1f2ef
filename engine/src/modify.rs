//! Modify-with-editor: let the user rewrite a tool's proposed file content
//! before approving it.

use std::io;
use std::path::Path;

use anvil_tools::{ModifiableTool, ToolError};
use anvil_utils::unified_patch;
use serde_json::Value;
use tempfile::{Builder, NamedTempFile};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::editor::{DiffEditor, EditorType};

#[derive(Debug, thiserror::Error)]
pub enum ModifyError {
    #[error("tool '{tool}' does not support modification")]
    NotModifiable { tool: String },
    #[error("no preferred editor is configured")]
    NoEditor,
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to launch editor '{editor}': {source}")]
    EditorLaunch {
        editor: String,
        #[source]
        source: io::Error,
    },
    #[error("editor '{editor}' exited with {status}")]
    EditorFailed { editor: String, status: String },
    #[error("modification cancelled")]
    Cancelled,
}

/// Arguments and diff after a modification.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyOutcome {
    pub updated_params: Value,
    pub file_diff: String,
    pub old_content: String,
    pub new_content: String,
}

/// Temp file holding one side of the diff. Deleted on drop.
fn write_side(label: &str, file_name: &str, content: &str) -> Result<NamedTempFile, ModifyError> {
    let file = Builder::new()
        .prefix(&format!("anvil-{label}-"))
        .suffix(&format!("-{file_name}"))
        .tempfile()
        .map_err(|source| ModifyError::Io {
            context: format!("failed to create {label} temp file"),
            source,
        })?;
    std::fs::write(file.path(), content).map_err(|source| ModifyError::Io {
        context: format!("failed to write {}", file.path().display()),
        source,
    })?;
    Ok(file)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

/// Open the current and proposed content in `editor`, wait for the user to
/// finish, and rebuild the tool arguments from the edited proposal.
pub async fn modify_with_editor(
    tool: &dyn ModifiableTool,
    args: &Value,
    editor: &EditorType,
    diff_editor: &dyn DiffEditor,
    signal: &CancellationToken,
) -> Result<ModifyOutcome, ModifyError> {
    let path = tool.file_path(args)?;
    let name = file_name(&path);
    let current = tool.current_content(args).await?;
    let proposed = tool.proposed_content(args).await?;

    let old_file = write_side("old", &name, &current)?;
    let new_file = write_side("new", &name, &proposed)?;
    debug!(
        %editor,
        old = %old_file.path().display(),
        new = %new_file.path().display(),
        "modify session started"
    );

    tokio::select! {
        result = diff_editor.open_diff(editor, old_file.path(), new_file.path()) => result?,
        () = signal.cancelled() => return Err(ModifyError::Cancelled),
    }

    let modified = tokio::fs::read_to_string(new_file.path())
        .await
        .map_err(|source| ModifyError::Io {
            context: format!("failed to read {}", new_file.path().display()),
            source,
        })?;

    Ok(ModifyOutcome {
        updated_params: tool.create_updated_params(&current, &modified, args),
        file_diff: unified_patch(&name, &current, &modified),
        old_content: current,
        new_content: modified,
    })
}

/// Rebuild the arguments from content the client edited inline.
pub async fn apply_inline_modification(
    tool: &dyn ModifiableTool,
    args: &Value,
    new_content: &str,
) -> Result<ModifyOutcome, ModifyError> {
    let path = tool.file_path(args)?;
    let current = tool.current_content(args).await?;
    Ok(ModifyOutcome {
        updated_params: tool.create_updated_params(&current, new_content, args),
        file_diff: unified_patch(&file_name(&path), &current, new_content),
        old_content: current,
        new_content: new_content.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{ModifyError, apply_inline_modification, modify_with_editor};
    use crate::editor::{DiffEditor, EditorFut, EditorType};
    use anvil_tools::Tool;
    use anvil_tools::builtins::WriteFileTool;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Overwrites the right-hand file and records the left-hand content.
    struct ScriptedEditor {
        replacement: String,
        seen_old: Mutex<Option<String>>,
    }

    impl DiffEditor for ScriptedEditor {
        fn open_diff<'a>(
            &'a self,
            _editor: &'a EditorType,
            old: &'a Path,
            new: &'a Path,
        ) -> EditorFut<'a> {
            Box::pin(async move {
                *self.seen_old.lock().unwrap() = Some(std::fs::read_to_string(old).unwrap());
                std::fs::write(new, &self.replacement).unwrap();
                Ok(())
            })
        }
    }

    struct NeverClosingEditor;

    impl DiffEditor for NeverClosingEditor {
        fn open_diff<'a>(
            &'a self,
            _editor: &'a EditorType,
            _old: &'a Path,
            _new: &'a Path,
        ) -> EditorFut<'a> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn edited_proposal_rewrites_params_and_diff() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "old\n").unwrap();
        let tool = WriteFileTool::new(dir.path().to_path_buf());
        let args = json!({"file_path": "notes.txt", "content": "proposed\n"});
        let editor = ScriptedEditor {
            replacement: "edited\n".into(),
            seen_old: Mutex::new(None),
        };

        let outcome = modify_with_editor(
            tool.as_modifiable().unwrap(),
            &args,
            &EditorType::Vim,
            &editor,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(editor.seen_old.lock().unwrap().as_deref(), Some("old\n"));
        assert_eq!(outcome.updated_params["content"], "edited\n");
        assert_eq!(outcome.updated_params["modified_by_user"], true);
        assert!(outcome.file_diff.contains("-old"));
        assert!(outcome.file_diff.contains("+edited"));
        // The target file is untouched until the call runs.
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
            "old\n"
        );
    }

    #[tokio::test]
    async fn cancellation_ends_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(dir.path().to_path_buf());
        let args = json!({"file_path": "a.txt", "content": "x"});
        let signal = CancellationToken::new();
        signal.cancel();
        let err = modify_with_editor(
            tool.as_modifiable().unwrap(),
            &args,
            &EditorType::Vim,
            &NeverClosingEditor,
            &signal,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ModifyError::Cancelled));
    }

    #[tokio::test]
    async fn inline_content_rebuilds_params() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(dir.path().to_path_buf());
        let args = json!({"file_path": "new.txt", "content": "x"});
        let outcome = apply_inline_modification(tool.as_modifiable().unwrap(), &args, "inline\n")
            .await
            .unwrap();
        assert_eq!(outcome.updated_params["content"], "inline\n");
        assert_eq!(outcome.old_content, "");
        assert!(outcome.file_diff.contains("+inline"));
    }
}
