//! `write_file`: create or overwrite a whole file.

use std::path::PathBuf;

use anvil_types::{ToolResult, ToolResultDisplay};
use anvil_utils::unified_patch;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::edit::{read_optional, write_file};
use super::{display_relative, resolve_in_root};
use crate::confirm::{ConfirmationDetails, ConfirmationKind};
use crate::{
    ConfirmFut, ContentFut, ModifiableTool, Tool, ToolCtx, ToolError, ToolFut, parse_args,
    validate_args,
};

const NAME: &str = "write_file";

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    file_path: String,
    content: String,
    #[serde(default)]
    modified_by_user: bool,
}

#[derive(Debug)]
pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        NAME
    }

    fn display_name(&self) -> &str {
        "WriteFile"
    }

    fn description(&self) -> &str {
        "Writes content to a file, creating it and any parent directories if needed \
         and replacing it entirely otherwise."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path of the file to write."},
                "content": {"type": "string", "description": "Full file content."}
            },
            "required": ["file_path", "content"]
        })
    }

    fn validate_params(&self, args: &Value) -> Result<(), ToolError> {
        validate_args(&self.schema(), args)?;
        let typed: WriteFileArgs = parse_args(args)?;
        let path = resolve_in_root(&self.root, &typed.file_path)?;
        if path.is_dir() {
            return Err(ToolError::BadArgs {
                message: format!("path is a directory: {}", typed.file_path),
            });
        }
        Ok(())
    }

    fn describe(&self, args: &Value) -> String {
        match parse_args::<WriteFileArgs>(args) {
            Ok(typed) => format!("Write {} ({} bytes)", typed.file_path, typed.content.len()),
            Err(_) => args.to_string(),
        }
    }

    fn should_confirm_execute<'a>(
        &'a self,
        args: &'a Value,
        _signal: &'a CancellationToken,
    ) -> ConfirmFut<'a> {
        Box::pin(async move {
            let typed: WriteFileArgs = parse_args(args)?;
            let path = resolve_in_root(&self.root, &typed.file_path)?;
            let display = display_relative(&path, &self.root);
            let current = read_optional(NAME, &path).await?;
            let file_diff = unified_patch(
                &display,
                current.as_deref().unwrap_or_default(),
                &typed.content,
            );
            Ok(Some(ConfirmationDetails::new(
                format!("Confirm Write: {display}"),
                ConfirmationKind::Edit {
                    file_name: display,
                    file_path: path,
                    file_diff,
                    original_content: current,
                    new_content: typed.content,
                },
            )))
        })
    }

    fn execute<'a>(&'a self, args: Value, _ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: WriteFileArgs = parse_args(&args)?;
            let path = resolve_in_root(&self.root, &typed.file_path)?;
            let display = display_relative(&path, &self.root);
            let current = read_optional(NAME, &path).await?;
            let file_diff = unified_patch(
                &display,
                current.as_deref().unwrap_or_default(),
                &typed.content,
            );
            write_file(NAME, &path, typed.content.clone()).await?;

            let mut message = if current.is_some() {
                format!("Successfully overwrote file: {display}.")
            } else {
                format!("Successfully created and wrote to new file: {display}.")
            };
            if typed.modified_by_user {
                message.push_str(&format!(
                    " User modified the `content` to be: {}",
                    typed.content
                ));
            }
            Ok(ToolResult::new(
                message,
                ToolResultDisplay::FileDiff {
                    file_name: display,
                    file_diff,
                },
            ))
        })
    }

    fn as_modifiable(&self) -> Option<&dyn ModifiableTool> {
        Some(self)
    }
}

impl ModifiableTool for WriteFileTool {
    fn file_path(&self, args: &Value) -> Result<PathBuf, ToolError> {
        let typed: WriteFileArgs = parse_args(args)?;
        resolve_in_root(&self.root, &typed.file_path)
    }

    fn current_content<'a>(&'a self, args: &'a Value) -> ContentFut<'a> {
        Box::pin(async move {
            let path = self.file_path(args)?;
            Ok(read_optional(NAME, &path).await?.unwrap_or_default())
        })
    }

    fn proposed_content<'a>(&'a self, args: &'a Value) -> ContentFut<'a> {
        Box::pin(async move {
            let typed: WriteFileArgs = parse_args(args)?;
            Ok(typed.content)
        })
    }

    fn create_updated_params(&self, _old_content: &str, modified_content: &str, original: &Value) -> Value {
        let mut params = original.clone();
        if let Some(map) = params.as_object_mut() {
            map.insert("content".into(), Value::String(modified_content.to_string()));
            map.insert("modified_by_user".into(), Value::Bool(true));
        }
        params
    }
}
