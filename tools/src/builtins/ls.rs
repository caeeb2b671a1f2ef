//! `list_directory`: one level of a directory, directories first.

use std::path::PathBuf;

use anvil_types::{ToolResult, ToolResultDisplay};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{display_relative, resolve_in_root};
use crate::{Tool, ToolCtx, ToolError, ToolFut, parse_args, validate_args};

const NAME: &str = "list_directory";

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    path: String,
    #[serde(default)]
    ignore: Vec<String>,
    #[serde(default = "default_true")]
    respect_git_ignore: bool,
}

#[derive(Debug)]
pub struct ListDirectoryTool {
    root: PathBuf,
}

impl ListDirectoryTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

fn build_ignore_set(patterns: &[String]) -> Result<GlobSet, ToolError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| ToolError::BadArgs {
            message: format!("invalid ignore pattern '{pattern}': {e}"),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ToolError::BadArgs {
        message: format!("failed to compile ignore patterns: {e}"),
    })
}

impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        NAME
    }

    fn display_name(&self) -> &str {
        "ReadFolder"
    }

    fn description(&self) -> &str {
        "Lists the files and subdirectories directly inside a directory. Hidden \
         entries are included; git-ignored entries are skipped unless \
         `respect_git_ignore` is false."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list."},
                "ignore": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Glob patterns of entry names to leave out."
                },
                "respect_git_ignore": {
                    "type": "boolean",
                    "description": "Skip entries matched by .gitignore. Defaults to true."
                }
            },
            "required": ["path"]
        })
    }

    fn validate_params(&self, args: &Value) -> Result<(), ToolError> {
        validate_args(&self.schema(), args)?;
        let typed: ListArgs = parse_args(args)?;
        resolve_in_root(&self.root, &typed.path)?;
        build_ignore_set(&typed.ignore)?;
        Ok(())
    }

    fn describe(&self, args: &Value) -> String {
        match parse_args::<ListArgs>(args) {
            Ok(typed) => format!("List {}", typed.path),
            Err(_) => args.to_string(),
        }
    }

    fn execute<'a>(&'a self, args: Value, _ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ListArgs = parse_args(&args)?;
            let dir = resolve_in_root(&self.root, &typed.path)?;
            if !dir.is_dir() {
                return Err(ToolError::execution(
                    NAME,
                    format!("not a directory: {}", typed.path),
                ));
            }
            let ignore_set = build_ignore_set(&typed.ignore)?;
            let respect_git_ignore = typed.respect_git_ignore;
            let walk_dir = dir.clone();

            let entries = tokio::task::spawn_blocking(move || {
                let walker = WalkBuilder::new(&walk_dir)
                    .max_depth(Some(1))
                    .hidden(false)
                    .parents(respect_git_ignore)
                    .git_ignore(respect_git_ignore)
                    .git_global(respect_git_ignore)
                    .git_exclude(respect_git_ignore)
                    .require_git(false)
                    .filter_entry(|entry| entry.file_name() != ".git")
                    .build();

                let mut entries: Vec<(bool, String)> = Vec::new();
                for entry in walker.flatten() {
                    if entry.depth() == 0 {
                        continue;
                    }
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if ignore_set.is_match(&name) {
                        continue;
                    }
                    let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
                    entries.push((is_dir, name));
                }
                entries
            })
            .await
            .map_err(|e| ToolError::execution(NAME, format!("listing task failed: {e}")))?;

            let mut entries = entries;
            // Directories first, then by name.
            entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

            let shown = display_relative(&dir, &self.root);
            let shown = if shown.is_empty() { ".".to_string() } else { shown };
            if entries.is_empty() {
                let message = format!("Directory {shown} is empty.");
                return Ok(ToolResult::new(
                    message.clone(),
                    ToolResultDisplay::Text(message),
                ));
            }

            let listing: Vec<String> = entries
                .iter()
                .map(|(is_dir, name)| {
                    if *is_dir {
                        format!("[DIR] {name}")
                    } else {
                        name.clone()
                    }
                })
                .collect();
            let llm = format!("Directory listing for {shown}:\n{}", listing.join("\n"));
            let display = format!("Listed {} item(s).", entries.len());
            Ok(ToolResult::new(llm, ToolResultDisplay::Text(display)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ListDirectoryTool;
    use crate::{Tool, ToolCtx};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.log"), "").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();
        std::fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
        dir
    }

    async fn list(tool: &ListDirectoryTool, args: serde_json::Value) -> String {
        let mut ctx = ToolCtx::new("c1", CancellationToken::new());
        let result = tool.execute(args, &mut ctx).await.unwrap();
        result.llm_content.as_text().unwrap().to_string()
    }

    #[tokio::test]
    async fn lists_directories_first_and_honors_gitignore() {
        let dir = fixture();
        let tool = ListDirectoryTool::new(dir.path().to_path_buf());
        let text = list(&tool, json!({"path": "."})).await;
        assert_eq!(
            text,
            "Directory listing for .:\n[DIR] src\n.gitignore\n.hidden\nb.txt"
        );
    }

    #[tokio::test]
    async fn ignore_patterns_and_gitignore_toggle() {
        let dir = fixture();
        let tool = ListDirectoryTool::new(dir.path().to_path_buf());
        let text = list(
            &tool,
            json!({"path": ".", "ignore": [".*"], "respect_git_ignore": false}),
        )
        .await;
        assert_eq!(text, "Directory listing for .:\n[DIR] src\na.log\nb.txt");
    }

    #[tokio::test]
    async fn empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        let tool = ListDirectoryTool::new(dir.path().to_path_buf());
        let text = list(&tool, json!({"path": "empty"})).await;
        assert_eq!(text, "Directory empty is empty.");
    }
}
