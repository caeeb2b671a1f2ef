//! Tool framework - the tool contract, registry, discovery, shell execution and
//! built-in tool implementations.

pub mod builtins;
pub mod config;
pub mod confirm;
pub mod discovery;
pub mod mcp;
pub mod process;
pub mod registry;
pub mod schema;
pub mod shell;
pub mod shell_exec;
pub mod stream;

pub use config::{DiscoveryConfig, McpServerConfig, RuntimeConfig, ShellConfig};
pub use confirm::{ConfirmHook, ConfirmationDetails, ConfirmationKind};
pub use registry::{DiscoveryReport, ToolRegistry};
pub use shell::{DetectedShell, detect_shell};
pub use shell_exec::{ShellExecutionResult, ShellExecutionSettings, ShellExecutor, ShellOutcome};

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use anvil_types::{ToolDefinition, ToolResult};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<ToolResult, ToolError>> + Send + 'a>>;

/// Confirmation check future: `None` means the call may run without asking.
pub type ConfirmFut<'a> =
    Pin<Box<dyn Future<Output = Result<Option<ConfirmationDetails>, ToolError>> + Send + 'a>>;

/// Future yielding file content for the modify flow.
pub type ContentFut<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

/// Where a registered tool came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSource {
    Builtin,
    /// Produced by the configured discovery command.
    Discovered,
    /// Proxied from an MCP server.
    Mcp { server: String },
}

impl ToolSource {
    #[must_use]
    pub fn is_discovered(&self) -> bool {
        !matches!(self, Self::Builtin)
    }
}

/// Events a running tool reports back to the scheduler.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    /// Cumulative live output for display.
    OutputUpdate {
        tool_call_id: String,
        output: String,
    },
    /// A subprocess-backed tool spawned an OS process.
    ProcessSpawned { tool_call_id: String, pid: u32 },
}

/// Error categories that decide how a failed call is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown tool, malformed arguments or duplicate call id. The tool never ran.
    Validation,
    /// The tool's own logic failed.
    Execution,
    /// A subprocess failed to spawn, was killed by a signal or exited non-zero.
    Process,
    /// The call was cancelled. Not an error from the model's point of view.
    Cancelled,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Execution => "execution",
            Self::Process => "process",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Error types for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Bad tool args: {message}")]
    BadArgs { message: String },
    #[error("Tool \"{name}\" not found in registry.")]
    UnknownTool { name: String },
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: String },
    #[error("Duplicate tool call id: {id}")]
    DuplicateToolCallId { id: String },
    #[error("Tool execution failed: {tool}: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("{message}")]
    Process {
        message: String,
        exit_code: Option<i32>,
        signal: Option<String>,
    },
    #[error("{message}")]
    Cancelled { message: String },
    #[error("Tool discovery failed: {message}")]
    Discovery { message: String },
    #[error("MCP server '{server}': {message}")]
    Mcp { server: String, message: String },
}

impl ToolError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadArgs { .. }
            | Self::UnknownTool { .. }
            | Self::DuplicateTool { .. }
            | Self::DuplicateToolCallId { .. } => ErrorKind::Validation,
            Self::ExecutionFailed { .. } | Self::Discovery { .. } | Self::Mcp { .. } => {
                ErrorKind::Execution
            }
            Self::Process { .. } => ErrorKind::Process,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    pub fn execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Per-call tool context.
#[derive(Debug)]
pub struct ToolCtx {
    pub tool_call_id: String,
    /// Cancelled when the batch is aborted.
    pub signal: CancellationToken,
    output_tx: Option<mpsc::Sender<ToolEvent>>,
}

impl ToolCtx {
    pub fn new(tool_call_id: impl Into<String>, signal: CancellationToken) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            signal,
            output_tx: None,
        }
    }

    #[must_use]
    pub fn with_output(mut self, output_tx: mpsc::Sender<ToolEvent>) -> Self {
        self.output_tx = Some(output_tx);
        self
    }

    /// Publish cumulative live output. Dropped when nobody listens or the
    /// channel is full; the next update supersedes it anyway.
    pub fn update_output(&self, output: impl Into<String>) {
        if let Some(tx) = &self.output_tx {
            let _ = tx.try_send(ToolEvent::OutputUpdate {
                tool_call_id: self.tool_call_id.clone(),
                output: output.into(),
            });
        }
    }

    pub fn process_spawned(&self, pid: u32) {
        if let Some(tx) = &self.output_tx {
            let _ = tx.try_send(ToolEvent::ProcessSpawned {
                tool_call_id: self.tool_call_id.clone(),
                pid,
            });
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }
}

/// A named capability the model can call.
///
/// Implementations must be safe for dynamic dispatch; the scheduler only ever
/// sees `Arc<dyn Tool>`.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn display_name(&self) -> &str {
        self.name()
    }

    fn description(&self) -> &str;

    /// JSON schema of the parameters.
    fn schema(&self) -> Value;

    fn source(&self) -> ToolSource {
        ToolSource::Builtin
    }

    /// Whether `execute` streams live output through [`ToolCtx::update_output`].
    fn can_update_output(&self) -> bool {
        false
    }

    /// Synchronous parameter validation. Runs before any confirmation check.
    fn validate_params(&self, args: &Value) -> Result<(), ToolError> {
        validate_args(&self.schema(), args)
    }

    /// One-line human description of what a call with `args` will do.
    fn describe(&self, args: &Value) -> String {
        args.to_string()
    }

    fn should_confirm_execute<'a>(
        &'a self,
        _args: &'a Value,
        _signal: &'a CancellationToken,
    ) -> ConfirmFut<'a> {
        Box::pin(async { Ok(None) })
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a>;

    /// Present when the tool's proposed change can be edited externally.
    fn as_modifiable(&self) -> Option<&dyn ModifiableTool> {
        None
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.schema())
    }
}

/// Capability of tools whose effect is "replace file content with X".
///
/// The scheduler's modify flow writes the current and proposed content to
/// temp files, lets the user edit the proposal, then asks the tool to rebuild
/// its arguments from the edited text.
pub trait ModifiableTool: Send + Sync {
    fn file_path(&self, args: &Value) -> Result<PathBuf, ToolError>;

    fn current_content<'a>(&'a self, args: &'a Value) -> ContentFut<'a>;

    fn proposed_content<'a>(&'a self, args: &'a Value) -> ContentFut<'a>;

    fn create_updated_params(&self, old_content: &str, modified_content: &str, original: &Value)
    -> Value;
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

/// Validate arguments against a JSON schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ToolError::BadArgs {
        message: format!("Invalid tool schema: {e}"),
    })?;
    let result = validator.validate(args);
    if let Err(err) = result {
        return Err(ToolError::BadArgs {
            message: err.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, ToolCtx, ToolError, ToolEvent, validate_args};
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn error_kinds_follow_taxonomy() {
        assert_eq!(
            ToolError::UnknownTool { name: "x".into() }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(ToolError::execution("t", "boom").kind(), ErrorKind::Execution);
        assert_eq!(
            ToolError::Process {
                message: "exit 1".into(),
                exit_code: Some(1),
                signal: None
            }
            .kind(),
            ErrorKind::Process
        );
        assert_eq!(ToolError::cancelled("stop").kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn unknown_tool_message() {
        let err = ToolError::UnknownTool {
            name: "frobnicate".into(),
        };
        assert_eq!(err.to_string(), "Tool \"frobnicate\" not found in registry.");
    }

    #[test]
    fn validate_args_reports_missing_required() {
        let schema = json!({
            "type": "object",
            "properties": {"command": {"type": "string"}},
            "required": ["command"]
        });
        assert!(validate_args(&schema, &json!({"command": "ls"})).is_ok());
        let err = validate_args(&schema, &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::BadArgs { .. }));
    }

    #[test]
    fn ctx_without_listener_drops_updates() {
        let ctx = ToolCtx::new("c1", CancellationToken::new());
        ctx.update_output("ignored");
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn ctx_forwards_output_updates() {
        let (tx, mut rx) = mpsc::channel(4);
        let ctx = ToolCtx::new("c1", CancellationToken::new()).with_output(tx);
        ctx.update_output("partial");
        match rx.try_recv().unwrap() {
            ToolEvent::OutputUpdate {
                tool_call_id,
                output,
            } => {
                assert_eq!(tool_call_id, "c1");
                assert_eq!(output, "partial");
            }
            other @ ToolEvent::ProcessSpawned { .. } => panic!("unexpected event {other:?}"),
        }
    }
}
