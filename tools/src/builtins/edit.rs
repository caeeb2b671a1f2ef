//! `replace`: exact string replacement inside one file.

use std::path::{Path, PathBuf};

use anvil_types::{ToolResult, ToolResultDisplay};
use anvil_utils::{atomic_write, unified_patch};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::{display_relative, resolve_in_root};
use crate::confirm::{ConfirmationDetails, ConfirmationKind};
use crate::{
    ConfirmFut, ContentFut, ModifiableTool, Tool, ToolCtx, ToolError, ToolFut, parse_args,
    validate_args,
};

const NAME: &str = "replace";

#[derive(Debug, Deserialize)]
struct EditArgs {
    file_path: String,
    old_string: String,
    new_string: String,
    #[serde(default = "one")]
    expected_replacements: usize,
    /// Set when the user rewrote the proposal in an external editor.
    #[serde(default)]
    modified_by_user: bool,
}

fn one() -> usize {
    1
}

/// Result of applying an edit in memory.
#[derive(Debug)]
struct EditPlan {
    path: PathBuf,
    display: String,
    /// `None` when the edit creates the file.
    current: Option<String>,
    proposed: String,
    occurrences: usize,
}

impl EditPlan {
    fn diff(&self) -> String {
        unified_patch(
            &self.display,
            self.current.as_deref().unwrap_or_default(),
            &self.proposed,
        )
    }
}

#[derive(Debug)]
pub struct EditTool {
    root: PathBuf,
}

impl EditTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    async fn plan(&self, args: &Value) -> Result<EditPlan, ToolError> {
        let typed: EditArgs = parse_args(args)?;
        let path = resolve_in_root(&self.root, &typed.file_path)?;
        let display = display_relative(&path, &self.root);
        let current = read_optional(NAME, &path).await?;

        let (proposed, occurrences) = match (&current, typed.old_string.is_empty()) {
            (None, true) => (typed.new_string.clone(), 0),
            (None, false) => {
                return Err(ToolError::execution(
                    NAME,
                    format!(
                        "File not found: {display}. Use an empty old_string to create a new file."
                    ),
                ));
            }
            (Some(_), true) => {
                return Err(ToolError::execution(
                    NAME,
                    format!("File already exists, cannot create: {display}"),
                ));
            }
            (Some(content), false) => {
                let occurrences = content.matches(typed.old_string.as_str()).count();
                if occurrences == 0 {
                    return Err(ToolError::execution(
                        NAME,
                        format!("Could not find the string to replace in {display}"),
                    ));
                }
                if occurrences != typed.expected_replacements {
                    return Err(ToolError::execution(
                        NAME,
                        format!(
                            "Expected {} occurrence(s) but found {occurrences} in {display}",
                            typed.expected_replacements
                        ),
                    ));
                }
                if typed.old_string == typed.new_string {
                    return Err(ToolError::execution(
                        NAME,
                        format!("No changes to apply: old_string and new_string are identical in {display}"),
                    ));
                }
                (content.replace(&typed.old_string, &typed.new_string), occurrences)
            }
        };

        Ok(EditPlan {
            path,
            display,
            current,
            proposed,
            occurrences,
        })
    }
}

pub(super) async fn read_optional(tool: &str, path: &Path) -> Result<Option<String>, ToolError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ToolError::ExecutionFailed {
            tool: tool.to_string(),
            message: format!("failed to read {}: {e}", path.display()),
        }),
    }
}

pub(super) async fn write_file(tool: &str, path: &Path, content: String) -> Result<(), ToolError> {
    let target = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || atomic_write(&target, content.as_bytes())).await;
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ToolError::execution(
            tool,
            format!("failed to write {}: {e}", path.display()),
        )),
        Err(e) => Err(ToolError::execution(
            tool,
            format!("write task failed for {}: {e}", path.display()),
        )),
    }
}

impl Tool for EditTool {
    fn name(&self) -> &str {
        NAME
    }

    fn display_name(&self) -> &str {
        "Edit"
    }

    fn description(&self) -> &str {
        "Replaces text within a file. `old_string` must match the file content exactly, \
         including whitespace, and occur `expected_replacements` times (default 1). \
         An empty `old_string` creates a new file."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path of the file to modify."},
                "old_string": {"type": "string", "description": "Exact text to replace."},
                "new_string": {"type": "string", "description": "Replacement text."},
                "expected_replacements": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Number of occurrences to replace. Defaults to 1."
                }
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    fn validate_params(&self, args: &Value) -> Result<(), ToolError> {
        validate_args(&self.schema(), args)?;
        let typed: EditArgs = parse_args(args)?;
        resolve_in_root(&self.root, &typed.file_path)?;
        Ok(())
    }

    fn describe(&self, args: &Value) -> String {
        match parse_args::<EditArgs>(args) {
            Ok(typed) => format!("Edit {}", typed.file_path),
            Err(_) => args.to_string(),
        }
    }

    fn should_confirm_execute<'a>(
        &'a self,
        args: &'a Value,
        _signal: &'a CancellationToken,
    ) -> ConfirmFut<'a> {
        Box::pin(async move {
            let plan = self.plan(args).await?;
            let file_diff = plan.diff();
            Ok(Some(ConfirmationDetails::new(
                format!("Confirm Edit: {}", plan.display),
                ConfirmationKind::Edit {
                    file_name: plan.display,
                    file_path: plan.path,
                    file_diff,
                    original_content: plan.current,
                    new_content: plan.proposed,
                },
            )))
        })
    }

    fn execute<'a>(&'a self, args: Value, _ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let plan = self.plan(&args).await?;
            let file_diff = plan.diff();
            write_file(NAME, &plan.path, plan.proposed.clone()).await?;

            let mut message = if plan.current.is_none() {
                format!("Created new file: {} with provided content.", plan.display)
            } else {
                format!(
                    "Successfully modified file: {} ({} replacement(s)).",
                    plan.display, plan.occurrences
                )
            };
            let typed: EditArgs = parse_args(&args)?;
            if typed.modified_by_user {
                message.push_str(&format!(
                    " User modified the `new_string` content to be: {}.",
                    typed.new_string
                ));
            }
            Ok(ToolResult::new(
                message,
                ToolResultDisplay::FileDiff {
                    file_name: plan.display,
                    file_diff,
                },
            ))
        })
    }

    fn as_modifiable(&self) -> Option<&dyn ModifiableTool> {
        Some(self)
    }
}

impl ModifiableTool for EditTool {
    fn file_path(&self, args: &Value) -> Result<PathBuf, ToolError> {
        let typed: EditArgs = parse_args(args)?;
        resolve_in_root(&self.root, &typed.file_path)
    }

    fn current_content<'a>(&'a self, args: &'a Value) -> ContentFut<'a> {
        Box::pin(async move {
            let path = self.file_path(args)?;
            Ok(read_optional(NAME, &path).await?.unwrap_or_default())
        })
    }

    fn proposed_content<'a>(&'a self, args: &'a Value) -> ContentFut<'a> {
        Box::pin(async move { Ok(self.plan(args).await?.proposed) })
    }

    fn create_updated_params(&self, old_content: &str, modified_content: &str, original: &Value) -> Value {
        let mut params = original.clone();
        if let Some(map) = params.as_object_mut() {
            map.insert("old_string".into(), Value::String(old_content.to_string()));
            map.insert("new_string".into(), Value::String(modified_content.to_string()));
            map.remove("expected_replacements");
            map.insert("modified_by_user".into(), Value::Bool(true));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::EditTool;
    use crate::{ModifiableTool, Tool, ToolCtx, ToolError};
    use anvil_types::ToolResultDisplay;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn setup(content: &str) -> (tempfile::TempDir, EditTool) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), content).unwrap();
        let tool = EditTool::new(dir.path().to_path_buf());
        (dir, tool)
    }

    #[tokio::test]
    async fn replaces_single_occurrence() {
        let (dir, tool) = setup("hello world\n");
        let args = json!({"file_path": "a.txt", "old_string": "world", "new_string": "there"});
        let mut ctx = ToolCtx::new("c1", CancellationToken::new());
        let result = tool.execute(args, &mut ctx).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "hello there\n"
        );
        match result.return_display {
            ToolResultDisplay::FileDiff { file_name, file_diff } => {
                assert_eq!(file_name, "a.txt");
                assert!(file_diff.contains("-hello world"));
                assert!(file_diff.contains("+hello there"));
            }
            ToolResultDisplay::Text(text) => panic!("expected diff, got {text}"),
        }
    }

    #[tokio::test]
    async fn occurrence_mismatch_is_an_error() {
        let (_dir, tool) = setup("x x x");
        let args = json!({"file_path": "a.txt", "old_string": "x", "new_string": "y"});
        let signal = CancellationToken::new();
        let err = tool.should_confirm_execute(&args, &signal).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
        assert!(err.to_string().contains("found 3"));

        let args = json!({
            "file_path": "a.txt", "old_string": "x", "new_string": "y", "expected_replacements": 3
        });
        assert!(tool.should_confirm_execute(&args, &signal).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_old_string_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = EditTool::new(dir.path().to_path_buf());
        let args = json!({"file_path": "new.txt", "old_string": "", "new_string": "fresh\n"});
        let details = tool
            .should_confirm_execute(&args, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(details.is_edit());
        let mut ctx = ToolCtx::new("c1", CancellationToken::new());
        tool.execute(args, &mut ctx).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("new.txt")).unwrap(),
            "fresh\n"
        );
    }

    #[tokio::test]
    async fn modify_flow_round_trips_through_params() {
        let (dir, tool) = setup("one\ntwo\n");
        let args = json!({"file_path": "a.txt", "old_string": "two", "new_string": "2"});
        let modifiable = tool.as_modifiable().unwrap();
        let current = modifiable.current_content(&args).await.unwrap();
        let proposed = modifiable.proposed_content(&args).await.unwrap();
        assert_eq!(current, "one\ntwo\n");
        assert_eq!(proposed, "one\n2\n");

        let updated = modifiable.create_updated_params(&current, "one\nTWO!\n", &args);
        assert_eq!(updated["modified_by_user"], true);
        let mut ctx = ToolCtx::new("c1", CancellationToken::new());
        let result = tool.execute(updated, &mut ctx).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "one\nTWO!\n"
        );
        assert!(
            result
                .llm_content
                .as_text()
                .unwrap()
                .contains("User modified")
        );
    }
}
