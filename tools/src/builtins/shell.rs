//! `run_shell_command`: runs a command through the shell execution engine.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anvil_types::{ConfirmationOutcome, ToolResult};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::resolve_in_root;
use crate::config::{DEFAULT_MAX_OUTPUT_CHARS, ShellConfig};
use crate::confirm::{ConfirmationDetails, ConfirmationKind};
use crate::shell::DetectedShell;
use crate::shell_exec::{ShellExecutor, ShellOutcome};
use crate::{ConfirmFut, Tool, ToolCtx, ToolError, ToolFut, parse_args, validate_args};

const NAME: &str = "run_shell_command";

#[derive(Debug, Deserialize)]
struct ShellArgs {
    command: String,
    #[serde(default)]
    description: Option<String>,
    /// Relative to the target directory.
    #[serde(default)]
    directory: Option<String>,
}

#[derive(Debug)]
pub struct ShellTool {
    executor: ShellExecutor,
    root: PathBuf,
    allowed_prefixes: Vec<String>,
    blocked_prefixes: Vec<String>,
    max_output_chars: usize,
    /// Root commands approved with "always allow" during this session.
    session_allowlist: Arc<Mutex<HashSet<String>>>,
}

impl ShellTool {
    pub fn new(shell: DetectedShell, root: PathBuf, config: &ShellConfig) -> Self {
        Self {
            executor: ShellExecutor::new(shell),
            root,
            allowed_prefixes: config.allowed_commands.clone(),
            blocked_prefixes: config.blocked_commands.clone(),
            max_output_chars: config.max_output_chars.unwrap_or(DEFAULT_MAX_OUTPUT_CHARS),
            session_allowlist: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    #[must_use]
    pub fn with_executor(mut self, executor: ShellExecutor) -> Self {
        self.executor = executor;
        self
    }

    fn is_allowed(&self, segment: &str) -> bool {
        if self
            .allowed_prefixes
            .iter()
            .any(|prefix| has_command_prefix(segment, prefix))
        {
            return true;
        }
        root_command(segment).is_some_and(|root| {
            self.session_allowlist
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&root)
        })
    }
}

/// Split a command line into its simple commands at `;`, `&&`, `||`, `|`,
/// `&` and newlines, ignoring separators inside quotes and redirections such
/// as `2>&1`.
fn split_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                '\\' => {
                    current.push(c);
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                '&' if current.ends_with('>') || chars.peek() == Some(&'>') => current.push(c),
                ';' | '\n' | '|' | '&' => {
                    if chars.peek() == Some(&c) {
                        chars.next();
                    }
                    push_segment(&mut segments, &current);
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }
    push_segment(&mut segments, &current);
    segments
}

fn push_segment(segments: &mut Vec<String>, segment: &str) {
    let trimmed = segment.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
}

/// The program a simple command runs: first word after leading `VAR=value`
/// assignments, without its directory.
fn root_command(segment: &str) -> Option<String> {
    let word = segment
        .split_whitespace()
        .find(|word| !(word.contains('=') && !word.starts_with('=')))?;
    let word = word.trim_matches(|c| c == '(' || c == ')' || c == '{' || c == '}');
    let name = word.rsplit('/').next().unwrap_or(word);
    (!name.is_empty()).then(|| name.to_string())
}

fn has_command_prefix(segment: &str, prefix: &str) -> bool {
    let prefix = prefix.trim();
    !prefix.is_empty()
        && (segment == prefix
            || segment
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with(char::is_whitespace)))
}

impl Tool for ShellTool {
    fn name(&self) -> &str {
        NAME
    }

    fn display_name(&self) -> &str {
        "Shell"
    }

    fn description(&self) -> &str {
        "Executes a shell command in the project and returns its output, exit code \
         and signal. Commands run in a fresh shell, so `cd` does not persist between \
         calls; use `directory` instead. Long output is truncated."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Exact command line to execute."
                },
                "description": {
                    "type": "string",
                    "description": "Brief description of the command for the user."
                },
                "directory": {
                    "type": "string",
                    "description": "Directory to run in, relative to the project root. Must exist."
                }
            },
            "required": ["command"]
        })
    }

    fn can_update_output(&self) -> bool {
        true
    }

    fn validate_params(&self, args: &Value) -> Result<(), ToolError> {
        validate_args(&self.schema(), args)?;
        let typed: ShellArgs = parse_args(args)?;
        if typed.command.trim().is_empty() {
            return Err(ToolError::BadArgs {
                message: "command must not be empty".to_string(),
            });
        }
        for segment in split_segments(&typed.command) {
            if let Some(prefix) = self
                .blocked_prefixes
                .iter()
                .find(|prefix| has_command_prefix(&segment, prefix))
            {
                return Err(ToolError::BadArgs {
                    message: format!("command '{segment}' is blocked by configuration ({prefix})"),
                });
            }
        }
        if let Some(directory) = &typed.directory {
            let dir = resolve_in_root(&self.root, directory)?;
            if !dir.is_dir() {
                return Err(ToolError::BadArgs {
                    message: format!("directory does not exist: {directory}"),
                });
            }
        }
        Ok(())
    }

    fn describe(&self, args: &Value) -> String {
        let Ok(typed) = parse_args::<ShellArgs>(args) else {
            return args.to_string();
        };
        let mut text = typed.command;
        if let Some(directory) = typed.directory {
            text.push_str(&format!(" [in {directory}]"));
        }
        if let Some(description) = typed.description {
            text.push_str(&format!(" ({})", description.replace('\n', " ")));
        }
        text
    }

    fn should_confirm_execute<'a>(
        &'a self,
        args: &'a Value,
        _signal: &'a CancellationToken,
    ) -> ConfirmFut<'a> {
        Box::pin(async move {
            let typed: ShellArgs = parse_args(args)?;
            let segments = split_segments(&typed.command);
            if segments.iter().all(|segment| self.is_allowed(segment)) {
                return Ok(None);
            }

            let mut roots: Vec<String> = Vec::new();
            for root in segments.iter().filter_map(|s| root_command(s)) {
                if !roots.contains(&root) {
                    roots.push(root);
                }
            }
            let allowlist = Arc::clone(&self.session_allowlist);
            let approved = roots.clone();
            let details = ConfirmationDetails::new(
                "Confirm Shell Command",
                ConfirmationKind::Exec {
                    command: typed.command,
                    root_command: roots.join(", "),
                },
            )
            .with_on_confirm(move |outcome| {
                if matches!(
                    outcome,
                    ConfirmationOutcome::ProceedAlways | ConfirmationOutcome::ProceedAlwaysTool
                ) {
                    allowlist
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend(approved);
                }
            });
            Ok(Some(details))
        })
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ShellArgs = parse_args(&args)?;
            let cwd = match &typed.directory {
                Some(directory) => resolve_in_root(&self.root, directory)?,
                None => self.root.clone(),
            };
            let ctx: &ToolCtx = ctx;

            let result = self
                .executor
                .execute_observed(
                    &typed.command,
                    &cwd,
                    &ctx.signal,
                    |output| ctx.update_output(output),
                    |msg| debug!(tool = NAME, call_id = %ctx.tool_call_id, "{msg}"),
                    |pid| ctx.process_spawned(pid),
                )
                .await;

            let summary =
                result.summary(&typed.command, typed.directory.as_deref(), self.max_output_chars);
            match result.outcome() {
                ShellOutcome::Success => Ok(ToolResult::text(summary)),
                ShellOutcome::Aborted => Err(ToolError::cancelled(summary)),
                ShellOutcome::Error | ShellOutcome::Signalled | ShellOutcome::ExitCode(_) => {
                    Err(ToolError::Process {
                        message: summary,
                        exit_code: result.exit_code,
                        signal: result.signal.clone(),
                    })
                }
            }
        })
    }
}
