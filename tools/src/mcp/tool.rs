//! Proxy tool forwarding calls to an MCP server.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use anvil_types::{Blob, ConfirmationOutcome, FileData, Part, ToolResult, ToolResultDisplay};
use rmcp::model::{Content, RawContent, ResourceContents};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::client::McpClient;
use crate::confirm::{ConfirmationDetails, ConfirmationKind};
use crate::{ConfirmFut, Tool, ToolCtx, ToolError, ToolFut, ToolSource};

/// Servers and `server.tool` pairs the user approved for the whole session.
pub type McpAllowlist = Arc<Mutex<HashSet<String>>>;

pub struct McpTool {
    client: Arc<McpClient>,
    /// Name the server knows the tool by.
    remote_name: String,
    /// Name registered with the model; `server__tool` after a clash.
    name: String,
    description: String,
    parameters: Value,
    trust: bool,
    allowlist: McpAllowlist,
}

impl McpTool {
    pub fn new(
        client: Arc<McpClient>,
        remote_name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        trust: bool,
        allowlist: McpAllowlist,
    ) -> Self {
        let remote_name = remote_name.into();
        Self {
            client,
            name: remote_name.clone(),
            remote_name,
            description: description.into(),
            parameters,
            trust,
            allowlist,
        }
    }

    /// Register under `{server}__{tool}` instead of the bare tool name.
    #[must_use]
    pub fn fully_qualified(mut self) -> Self {
        self.name = format!("{}__{}", self.client.server(), self.remote_name);
        self
    }

    #[must_use]
    pub fn server(&self) -> &str {
        self.client.server()
    }

    #[must_use]
    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    fn tool_key(&self) -> String {
        format!("{}.{}", self.server(), self.remote_name)
    }

    fn is_allowed(&self) -> bool {
        let allowlist = self.allowlist.lock().unwrap_or_else(PoisonError::into_inner);
        allowlist.contains(self.server()) || allowlist.contains(&self.tool_key())
    }
}

impl std::fmt::Debug for McpTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpTool")
            .field("name", &self.name)
            .field("server", &self.server())
            .finish_non_exhaustive()
    }
}

impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.remote_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> Value {
        self.parameters.clone()
    }

    fn source(&self) -> ToolSource {
        ToolSource::Mcp {
            server: self.server().to_string(),
        }
    }

    fn should_confirm_execute<'a>(
        &'a self,
        _args: &'a Value,
        _signal: &'a CancellationToken,
    ) -> ConfirmFut<'a> {
        Box::pin(async move {
            if self.trust || self.is_allowed() {
                return Ok(None);
            }
            let allowlist = Arc::clone(&self.allowlist);
            let server = self.server().to_string();
            let tool_key = self.tool_key();
            let details = ConfirmationDetails::new(
                format!("Confirm MCP Tool Execution: {}", self.remote_name),
                ConfirmationKind::Mcp {
                    server_name: server.clone(),
                    tool_name: self.remote_name.clone(),
                    tool_display_name: self.remote_name.clone(),
                },
            )
            .with_on_confirm(move |outcome| {
                let entry = match outcome {
                    ConfirmationOutcome::ProceedAlwaysServer => server,
                    ConfirmationOutcome::ProceedAlways | ConfirmationOutcome::ProceedAlwaysTool => {
                        tool_key
                    }
                    _ => return,
                };
                allowlist
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(entry);
            });
            Ok(Some(details))
        })
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let arguments = match args {
                Value::Object(map) => Some(map),
                Value::Null => None,
                other => {
                    return Err(ToolError::BadArgs {
                        message: format!("MCP arguments must be an object, got {other}"),
                    });
                }
            };

            let result = tokio::select! {
                result = self.client.call_tool(&self.remote_name, arguments) => result?,
                () = ctx.signal.cancelled() => {
                    return Err(ToolError::cancelled(format!(
                        "Tool '{}' was cancelled by user.",
                        self.name
                    )));
                }
            };

            let parts = content_to_parts(&result.content);
            let display = display_text(&parts);
            if result.is_error.unwrap_or(false) {
                return Err(ToolError::execution(&self.name, display));
            }
            Ok(ToolResult::new(parts, ToolResultDisplay::Text(display)))
        })
    }
}

/// Convert MCP content blocks into response parts.
#[must_use]
pub fn content_to_parts(content: &[Content]) -> Vec<Part> {
    content
        .iter()
        .map(|block| match &block.raw {
            RawContent::Text(text) => Part::Text(text.text.clone()),
            RawContent::Image(image) => Part::InlineData(Blob {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            }),
            RawContent::Audio(audio) => Part::InlineData(Blob {
                mime_type: audio.mime_type.clone(),
                data: audio.data.clone(),
            }),
            RawContent::Resource(resource) => match &resource.resource {
                ResourceContents::TextResourceContents { text, .. } => Part::Text(text.clone()),
                ResourceContents::BlobResourceContents {
                    blob, mime_type, ..
                } => Part::InlineData(Blob {
                    mime_type: mime_type
                        .clone()
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                    data: blob.clone(),
                }),
            },
            RawContent::ResourceLink(link) => Part::FileData(FileData {
                mime_type: link
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                file_uri: link.uri.clone(),
            }),
        })
        .collect()
}

fn display_text(parts: &[Part]) -> String {
    let lines: Vec<String> = parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => text.clone(),
            other => format!("[{}]", other.mime_type().unwrap_or("content")),
        })
        .collect();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{content_to_parts, display_text};
    use anvil_types::{Blob, Part};
    use rmcp::model::Content;

    #[test]
    fn converts_text_and_images() {
        let content = vec![Content::text("hello"), Content::image("aGk=", "image/png")];
        let parts = content_to_parts(&content);
        assert_eq!(
            parts,
            vec![
                Part::Text("hello".into()),
                Part::InlineData(Blob {
                    mime_type: "image/png".into(),
                    data: "aGk=".into(),
                }),
            ]
        );
        assert_eq!(display_text(&parts), "hello\n[image/png]");
    }

    #[test]
    fn empty_content_has_no_parts() {
        assert!(content_to_parts(&[]).is_empty());
    }
}
