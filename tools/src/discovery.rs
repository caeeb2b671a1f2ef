//! Command-based tool discovery.
//!
//! A project can publish tools by configuring two commands: a discovery
//! command that prints function declarations as JSON, and a call command that
//! receives the tool name as its argument and the call parameters on stdin.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anvil_types::{ToolDefinition, ToolResult};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::process::{self, ChildGuard, DEFAULT_KILL_GRACE};
use crate::schema::sanitize_schema;
use crate::shell::{DetectedShell, shell_quote};
use crate::shell_exec::{ShellExecutor, ShellOutcome};
use crate::{Tool, ToolCtx, ToolError, ToolFut, ToolSource};

/// Longest tool name accepted by model function-calling APIs.
const MAX_TOOL_NAME_LEN: usize = 63;

/// How long to keep draining pipes after a cancelled call command is killed.
const CANCEL_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct RawDeclaration {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "parametersJsonSchema")]
    parameters: Option<Value>,
}

/// Parse discovery command output.
///
/// The output is a JSON array; each item is a function declaration or a
/// wrapper holding `functionDeclarations` / `function_declarations`.
pub fn parse_declarations(stdout: &str) -> Result<Vec<ToolDefinition>, ToolError> {
    let items: Vec<Value> =
        serde_json::from_str(stdout.trim()).map_err(|e| ToolError::Discovery {
            message: format!("discovery output is not a JSON array: {e}"),
        })?;

    let mut raw = Vec::new();
    for item in items {
        let wrapped = item
            .get("functionDeclarations")
            .or_else(|| item.get("function_declarations"))
            .and_then(Value::as_array)
            .cloned();
        match wrapped {
            Some(list) => raw.extend(list),
            None if item.get("name").is_some() => raw.push(item),
            None => debug!("skipping discovery item without a name"),
        }
    }

    raw.into_iter()
        .map(|value| {
            let decl: RawDeclaration =
                serde_json::from_value(value).map_err(|e| ToolError::Discovery {
                    message: format!("invalid function declaration: {e}"),
                })?;
            let mut parameters = decl
                .parameters
                .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}}));
            sanitize_schema(&mut parameters);
            Ok(ToolDefinition::new(
                decl.name,
                decl.description.unwrap_or_default(),
                parameters,
            ))
        })
        .collect()
}

/// Replace characters model APIs reject and cap the length, keeping both
/// ends of an over-long name.
#[must_use]
pub fn sanitize_tool_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.len() <= MAX_TOOL_NAME_LEN {
        return cleaned;
    }
    format!("{}___{}", &cleaned[..28], &cleaned[cleaned.len() - 32..])
}

/// Run the discovery command in `cwd` and build one tool per declaration.
pub async fn discover_command_tools(
    discovery_command: &str,
    call_command: &str,
    shell: &DetectedShell,
    cwd: &Path,
) -> Result<Vec<DiscoveredTool>, ToolError> {
    let executor = ShellExecutor::new(shell.clone());
    let result = executor
        .execute(
            discovery_command,
            cwd,
            &CancellationToken::new(),
            |_| {},
            |msg| debug!(command = discovery_command, "{msg}"),
        )
        .await;
    if result.outcome() != ShellOutcome::Success {
        return Err(ToolError::Discovery {
            message: format!(
                "`{discovery_command}` failed: {}",
                result.summary(discovery_command, None, 2_000)
            ),
        });
    }

    let declarations = parse_declarations(&result.stdout)?;
    Ok(declarations
        .into_iter()
        .map(|decl| DiscoveredTool {
            name: sanitize_tool_name(&decl.name),
            description: discovered_description(&decl.description, discovery_command, call_command, &decl.name),
            parameters: decl.parameters,
            call_command: call_command.to_string(),
            shell: shell.clone(),
            cwd: cwd.to_path_buf(),
        })
        .collect())
}

fn discovered_description(base: &str, discovery: &str, call: &str, name: &str) -> String {
    let mut text = base.trim().to_string();
    if !text.is_empty() {
        text.push_str("\n\n");
    }
    let _ = write!(
        text,
        "This tool was discovered by running `{discovery}` in the project root. \
         Calling it runs `{call} {name}` with the arguments as JSON on stdin."
    );
    text
}

/// Tool backed by the configured call command.
#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    name: String,
    description: String,
    parameters: Value,
    call_command: String,
    shell: DetectedShell,
    cwd: PathBuf,
}

#[derive(Debug, Default)]
struct CallOutput {
    stdout: String,
    stderr: String,
    error: Option<io::Error>,
    exit_code: Option<i32>,
    signal: Option<String>,
    aborted: bool,
}

impl CallOutput {
    fn failed(&self) -> bool {
        self.error.is_some()
            || self.signal.is_some()
            || self.exit_code.is_some_and(|code| code != 0)
    }

    fn failure_block(&self) -> String {
        fn or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
            if value.is_empty() { fallback } else { value }
        }
        let error = self.error.as_ref().map(ToString::to_string).unwrap_or_default();
        let exit_code = self.exit_code.map(|c| c.to_string()).unwrap_or_default();
        format!(
            "Stdout: {}\nStderr: {}\nError: {}\nExit Code: {}\nSignal: {}",
            or(self.stdout.trim_end(), "(empty)"),
            or(self.stderr.trim_end(), "(empty)"),
            or(&error, "(none)"),
            or(&exit_code, "(none)"),
            self.signal.as_deref().unwrap_or("(none)"),
        )
    }
}

impl DiscoveredTool {
    async fn run(&self, args: &Value, signal: &CancellationToken) -> CallOutput {
        let script = format!("{} {}", self.call_command, shell_quote(&self.name));
        let mut cmd = Command::new(&self.shell.binary);
        cmd.args(self.shell.command_args(&script))
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        process::set_new_session(&mut cmd);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CallOutput {
                    error: Some(e),
                    ..CallOutput::default()
                };
            }
        };
        let mut guard = ChildGuard::new(child);
        let payload = serde_json::to_vec(args).unwrap_or_default();
        let stdin = guard.child_mut().stdin.take();
        let stdout = guard.child_mut().stdout.take();
        let stderr = guard.child_mut().stderr.take();

        let io = async move {
            let write = async move {
                if let Some(mut stdin) = stdin {
                    // A tool that ignores stdin closes the pipe early; that is fine.
                    let _ = stdin.write_all(&payload).await;
                }
            };
            let ((), out, err) = tokio::join!(write, read_all(stdout), read_all(stderr));
            (out, err)
        };
        tokio::pin!(io);

        let mut log = |msg: &str| debug!(tool = %self.name, "{msg}");
        let finished = tokio::select! {
            res = &mut io => Some(res),
            () = signal.cancelled() => None,
        };
        let (out, err, aborted) = match finished {
            Some((out, err)) => (out, err, false),
            None => {
                if let Err(e) =
                    process::terminate(guard.child_mut(), DEFAULT_KILL_GRACE, &mut log).await
                {
                    warn!(tool = %self.name, "failed to stop call command: {e}");
                }
                let (out, err) = tokio::time::timeout(CANCEL_DRAIN, &mut io)
                    .await
                    .unwrap_or_default();
                (out, err, true)
            }
        };

        let status = tokio::select! {
            status = guard.child_mut().wait() => status,
            () = signal.cancelled(), if !aborted => {
                if let Err(e) =
                    process::terminate(guard.child_mut(), DEFAULT_KILL_GRACE, &mut log).await
                {
                    warn!(tool = %self.name, "failed to stop call command: {e}");
                }
                return CallOutput {
                    stdout: String::from_utf8_lossy(&out).into_owned(),
                    stderr: String::from_utf8_lossy(&err).into_owned(),
                    aborted: true,
                    ..CallOutput::default()
                };
            }
        };

        let mut output = CallOutput {
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
            aborted,
            ..CallOutput::default()
        };
        match status {
            Ok(status) => {
                guard.disarm();
                output.exit_code = status.code();
                output.signal = process::exit_signal(&status);
            }
            Err(e) => output.error = Some(e),
        }
        output
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}

impl Tool for DiscoveredTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> Value {
        self.parameters.clone()
    }

    fn source(&self) -> ToolSource {
        ToolSource::Discovered
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let output = self.run(&args, &ctx.signal).await;
            if output.aborted {
                return Err(ToolError::cancelled(format!(
                    "Tool '{}' was cancelled by user.",
                    self.name
                )));
            }
            if output.failed() {
                return Err(ToolError::Process {
                    message: output.failure_block(),
                    exit_code: output.exit_code,
                    signal: output.signal.clone(),
                });
            }
            Ok(ToolResult::text(output.stdout))
        })
    }
}
