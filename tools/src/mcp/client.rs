//! Thin wrapper over an rmcp client session.

use std::process::Stdio;
use std::time::Duration;

use rmcp::ClientHandler;
use rmcp::model::{CallToolRequestParams, CallToolResult, Tool as RemoteTool};
use rmcp::service::{Peer, RoleClient, RunningService, ServiceExt};
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::ToolError;
use crate::config::McpServerConfig;

/// We only list and call tools, so server requests and notifications get the
/// default handling.
#[derive(Debug, Clone, Copy, Default)]
struct MinimalClientHandler;

impl ClientHandler for MinimalClientHandler {}

/// Connection to one MCP server.
pub struct McpClient {
    server: String,
    /// Cloned per call so concurrent calls do not serialize on a lock.
    peer: Peer<RoleClient>,
    /// Kept only to shut the session down.
    service: Mutex<Option<RunningService<RoleClient, MinimalClientHandler>>>,
    timeout: Duration,
}

impl McpClient {
    /// Launch the server process and complete the MCP handshake.
    pub async fn connect(server: &str, config: &McpServerConfig) -> Result<Self, ToolError> {
        let args = config.args.clone();
        let env = config.env.clone();
        let cwd = config.cwd.clone();
        let transport = TokioChildProcess::new(Command::new(&config.command).configure(
            move |cmd| {
                cmd.args(&args).stderr(Stdio::null());
                for (key, value) in &env {
                    cmd.env(key, value);
                }
                if let Some(cwd) = &cwd {
                    cmd.current_dir(cwd);
                }
            },
        ))
        .map_err(|e| ToolError::Mcp {
            server: server.to_string(),
            message: format!("failed to launch `{}`: {e}", config.command),
        })?;

        let service = MinimalClientHandler
            .serve(transport)
            .await
            .map_err(|e| ToolError::Mcp {
                server: server.to_string(),
                message: format!("handshake failed: {e}"),
            })?;
        debug!(server, "MCP server connected");

        Ok(Self {
            server: server.to_string(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            timeout: config.timeout(),
        })
    }

    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    pub async fn list_tools(&self) -> Result<Vec<RemoteTool>, ToolError> {
        self.peer.list_all_tools().await.map_err(|e| ToolError::Mcp {
            server: self.server.clone(),
            message: format!("tools/list failed: {e}"),
        })
    }

    /// Call `name`, bounded by the server's configured timeout.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, ToolError> {
        let mut params = CallToolRequestParams::new(name.to_string());
        params.arguments = arguments;
        match tokio::time::timeout(self.timeout, self.peer.call_tool(params)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(ToolError::Mcp {
                server: self.server.clone(),
                message: format!("call to '{name}' failed: {e}"),
            }),
            Err(_) => Err(ToolError::Mcp {
                server: self.server.clone(),
                message: format!(
                    "call to '{name}' timed out after {}ms",
                    self.timeout.as_millis()
                ),
            }),
        }
    }

    /// Shut the session down; the child process exits with it.
    pub async fn disconnect(&self) {
        if let Some(service) = self.service.lock().await.take()
            && let Err(e) = service.cancel().await
        {
            debug!(server = %self.server, "MCP shutdown error: {e}");
        }
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server", &self.server)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
