//! Core domain types for Anvil.
//!
//! This crate contains the data exchanged between the model-facing layer, the
//! scheduler, and tools. No IO, no async: everything here can be used from any
//! layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod part;

pub use part::{Blob, FileData, FunctionResponse, Part};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// Tool Call Requests
// ============================================================================

/// A function call emitted by the model, immutable once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    #[serde(default = "empty_object")]
    pub args: Value,
    /// Identifier of the user prompt that produced this call.
    #[serde(default)]
    pub prompt_id: String,
    /// Set when the user (not the model) asked for this call directly.
    #[serde(default)]
    pub client_initiated: bool,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ToolCallRequest {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            args,
            prompt_id: String::new(),
            client_initiated: false,
        }
    }

    #[must_use]
    pub fn with_prompt_id(mut self, prompt_id: impl Into<String>) -> Self {
        self.prompt_id = prompt_id.into();
        self
    }
}

/// Function declaration advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

// ============================================================================
// Confirmation
// ============================================================================

/// The user's answer to a confirmation prompt.
///
/// The `ProceedAlways*` variants behave like `ProceedOnce` for the current call;
/// they are hints that tools use to widen their own allowlists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    ProceedOnce,
    ProceedAlways,
    ProceedAlwaysServer,
    ProceedAlwaysTool,
    ModifyWithEditor,
    Cancel,
}

impl ConfirmationOutcome {
    /// Whether this outcome lets the call move on to execution.
    #[must_use]
    pub const fn is_proceed(self) -> bool {
        matches!(
            self,
            Self::ProceedOnce
                | Self::ProceedAlways
                | Self::ProceedAlwaysServer
                | Self::ProceedAlwaysTool
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProceedOnce => "proceed_once",
            Self::ProceedAlways => "proceed_always",
            Self::ProceedAlwaysServer => "proceed_always_server",
            Self::ProceedAlwaysTool => "proceed_always_tool",
            Self::ModifyWithEditor => "modify_with_editor",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for ConfirmationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra data that may accompany a confirmation answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationPayload {
    /// Replacement content edited inline by the client (for modifiable tools).
    pub new_content: Option<String>,
}

/// How eagerly tool calls are confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Each tool decides whether it needs confirmation.
    #[default]
    Default,
    /// File edits are applied without confirmation.
    AutoEdit,
    /// Nothing is confirmed.
    Yolo,
}

#[derive(Debug, Error)]
#[error("unknown approval mode '{0}' (expected default, auto_edit or yolo)")]
pub struct ParseApprovalModeError(String);

impl FromStr for ApprovalMode {
    type Err = ParseApprovalModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "default" => Ok(Self::Default),
            "auto_edit" | "autoedit" => Ok(Self::AutoEdit),
            "yolo" => Ok(Self::Yolo),
            _ => Err(ParseApprovalModeError(s.to_string())),
        }
    }
}

// ============================================================================
// Tool Results
// ============================================================================

/// Model-facing content produced by a tool: plain text or a list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Parts(Vec<Part>),
}

impl ToolResultContent {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Parts(_) => None,
        }
    }
}

impl Default for ToolResultContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<String> for ToolResultContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for ToolResultContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<Part>> for ToolResultContent {
    fn from(value: Vec<Part>) -> Self {
        Self::Parts(value)
    }
}

/// User-facing rendering of a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultDisplay {
    Text(String),
    #[serde(rename_all = "camelCase")]
    FileDiff { file_name: String, file_diff: String },
}

impl ToolResultDisplay {
    #[must_use]
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::FileDiff { file_diff, .. } => file_diff,
        }
    }
}

impl From<String> for ToolResultDisplay {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// What a tool hands back after a successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub llm_content: ToolResultContent,
    pub return_display: ToolResultDisplay,
}

impl ToolResult {
    pub fn new(llm_content: impl Into<ToolResultContent>, return_display: ToolResultDisplay) -> Self {
        Self {
            llm_content: llm_content.into(),
            return_display,
        }
    }

    /// A result whose model content and display are the same text.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            llm_content: ToolResultContent::Text(text.clone()),
            return_display: ToolResultDisplay::Text(text),
        }
    }
}
