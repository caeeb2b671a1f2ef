//! Configuration types used by tools and the registry.
//!
//! These live here rather than in `anvil-config` so the registry can consume
//! them without a dependency cycle; `anvil-config` embeds them in its file
//! format.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Default cap on text handed back to the model from one shell command.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 30_000;

/// Default per-call timeout for MCP tools (10 minutes).
pub const DEFAULT_MCP_TIMEOUT: Duration = Duration::from_secs(600);

/// Shell configuration for command execution.
///
/// ```toml
/// [tools.shell]
/// binary = "bash"
/// args = ["-c"]
/// allowed_commands = ["git status", "ls"]
/// blocked_commands = ["rm"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShellConfig {
    /// Override shell binary (e.g., "bash", "/usr/local/bin/bash").
    pub binary: Option<String>,
    /// Override shell args (e.g., `["-c"]` or `["/C"]`).
    pub args: Option<Vec<String>>,
    /// Command prefixes that run without confirmation.
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    /// Command prefixes that are always rejected.
    #[serde(default)]
    pub blocked_commands: Vec<String>,
    /// Cap on the summary text returned to the model.
    pub max_output_chars: Option<usize>,
}

/// One MCP server launched over stdio.
///
/// ```toml
/// [mcp_servers.github]
/// command = "npx"
/// args = ["-y", "@modelcontextprotocol/server-github"]
/// env = { GITHUB_TOKEN = "${GITHUB_TOKEN}" }
/// trust = false
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    /// Trusted servers skip confirmation entirely.
    #[serde(default)]
    pub trust: bool,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl McpServerConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_MCP_TIMEOUT)
    }
}

/// Sources of discovered tools.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryConfig {
    /// Shell command whose stdout is a JSON array of function declarations.
    pub discovery_command: Option<String>,
    /// Program invoked with the tool name to execute a discovered tool.
    pub call_command: Option<String>,
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    /// Tool names that are never registered.
    pub exclude: Vec<String>,
}

/// Session-wide settings every tool may consult.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub session_id: String,
    pub debug_mode: bool,
    /// Root directory tools operate in; paths outside it are rejected.
    pub target_dir: PathBuf,
}

impl RuntimeConfig {
    pub fn new(session_id: impl Into<String>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            debug_mode: false,
            target_dir: target_dir.into(),
        }
    }

    #[must_use]
    pub fn with_debug(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }
}
