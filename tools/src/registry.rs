//! Tool registry: name -> tool resolution plus discovery.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anvil_types::ToolDefinition;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::discovery::{discover_command_tools, sanitize_tool_name};
use crate::mcp::{McpAllowlist, McpClient, McpTool};
use crate::schema::sanitize_schema;
use crate::shell::{DetectedShell, detect_shell};
use crate::{Tool, ToolError, ToolSource};

/// What one [`ToolRegistry::discover`] run registered.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub command_tools: Vec<String>,
    pub mcp_tools: Vec<String>,
    /// Human-readable description of every source or tool that was skipped.
    pub failures: Vec<String>,
}

impl DiscoveryReport {
    #[must_use]
    pub fn registered(&self) -> usize {
        self.command_tools.len() + self.mcp_tools.len()
    }
}

/// Registry of available tools.
///
/// Lookups take a read lock; only registration and discovery write.
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
    discovery: DiscoveryConfig,
    shell: DetectedShell,
    target_dir: PathBuf,
    mcp_clients: tokio::sync::Mutex<Vec<Arc<McpClient>>>,
    mcp_allowlist: McpAllowlist,
}

impl ToolRegistry {
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
            discovery: DiscoveryConfig::default(),
            shell: detect_shell(None),
            target_dir: target_dir.into(),
            mcp_clients: tokio::sync::Mutex::new(Vec::new()),
            mcp_allowlist: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    #[must_use]
    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    #[must_use]
    pub fn with_shell(mut self, shell: DetectedShell) -> Self {
        self.shell = shell;
        self
    }

    #[must_use]
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    #[must_use]
    pub fn shell(&self) -> &DetectedShell {
        &self.shell
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.discovery.exclude.iter().any(|excluded| excluded == name)
    }

    /// Register a tool. Excluded names are skipped silently.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.is_excluded(&name) {
            debug!(tool = %name, "tool excluded by configuration");
            return Ok(());
        }
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        tools.insert(name, tool);
        Ok(())
    }

    pub fn register_tool<T: Tool + 'static>(&self, tool: T) -> Result<(), ToolError> {
        self.register(Arc::new(tool))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// All tools, ordered by name.
    #[must_use]
    pub fn all_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Declarations for the model, ordered by name.
    #[must_use]
    pub fn function_declarations(&self) -> Vec<ToolDefinition> {
        self.all_tools().iter().map(|tool| tool.definition()).collect()
    }

    /// Tools proxied from MCP server `server`.
    #[must_use]
    pub fn tools_by_server(&self, server: &str) -> Vec<Arc<dyn Tool>> {
        self.all_tools()
            .into_iter()
            .filter(|tool| matches!(tool.source(), ToolSource::Mcp { server: s } if s == server))
            .collect()
    }

    /// Allowlist shared by every MCP tool; grows with "always allow" answers.
    #[must_use]
    pub fn mcp_allowlist(&self) -> McpAllowlist {
        Arc::clone(&self.mcp_allowlist)
    }

    /// Drop every discovered tool and disconnect MCP servers.
    async fn clear_discovered(&self) {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, tool| !tool.source().is_discovered());

        let clients = std::mem::take(&mut *self.mcp_clients.lock().await);
        for client in clients {
            client.disconnect().await;
        }
    }

    /// (Re)discover tools from the discovery command and MCP servers.
    ///
    /// Previously discovered tools are removed first, so repeated calls are
    /// idempotent. A failing source is logged and skipped.
    pub async fn discover(&self) -> DiscoveryReport {
        self.clear_discovered().await;
        let mut report = DiscoveryReport::default();

        if let Some(command) = &self.discovery.discovery_command {
            self.discover_from_command(command, &mut report).await;
        }
        for server in self.discovery.mcp_servers.keys() {
            self.discover_from_mcp(server, &mut report).await;
        }

        info!(
            command_tools = report.command_tools.len(),
            mcp_tools = report.mcp_tools.len(),
            failures = report.failures.len(),
            "tool discovery finished"
        );
        report
    }

    async fn discover_from_command(&self, command: &str, report: &mut DiscoveryReport) {
        let Some(call_command) = &self.discovery.call_command else {
            warn!("discovery_command is set but call_command is not; skipping");
            report
                .failures
                .push("discovery command: call_command is not configured".to_string());
            return;
        };

        match discover_command_tools(command, call_command, &self.shell, &self.target_dir).await {
            Ok(tools) => {
                for tool in tools {
                    let name = tool.name().to_string();
                    if self.is_excluded(&name) {
                        continue;
                    }
                    match self.register_tool(tool) {
                        Ok(()) => report.command_tools.push(name),
                        Err(e) => {
                            warn!(tool = %name, "skipping discovered tool: {e}");
                            report.failures.push(format!("{name}: {e}"));
                        }
                    }
                }
            }
            Err(e) => {
                warn!("tool discovery command failed: {e}");
                report.failures.push(format!("discovery command: {e}"));
            }
        }
    }

    async fn discover_from_mcp(&self, server: &str, report: &mut DiscoveryReport) {
        let Some(config) = self.discovery.mcp_servers.get(server) else {
            return;
        };
        let client = match McpClient::connect(server, config).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!(server, "skipping MCP server: {e}");
                report.failures.push(e.to_string());
                return;
            }
        };

        let remote_tools = match client.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(server, "skipping MCP server: {e}");
                report.failures.push(e.to_string());
                client.disconnect().await;
                return;
            }
        };

        for remote in remote_tools {
            let remote_name = remote.name.to_string();
            let mut parameters = Value::Object((*remote.input_schema).clone());
            sanitize_schema(&mut parameters);
            let mut tool = McpTool::new(
                Arc::clone(&client),
                remote_name.clone(),
                remote.description.as_deref().unwrap_or_default(),
                parameters,
                config.trust,
                self.mcp_allowlist(),
            );
            let bare = sanitize_tool_name(&remote_name);
            if bare != remote_name || self.contains(&remote_name) {
                tool = tool.fully_qualified();
            }
            let name = tool.name().to_string();
            if self.is_excluded(&name) || self.is_excluded(&remote_name) {
                continue;
            }
            match self.register_tool(tool) {
                Ok(()) => report.mcp_tools.push(name),
                Err(e) => {
                    warn!(server, tool = %name, "skipping MCP tool: {e}");
                    report.failures.push(format!("{server}: {e}"));
                }
            }
        }

        self.mcp_clients.lock().await.push(client);
    }

    /// Disconnect every MCP server.
    pub async fn shutdown(&self) {
        self.clear_discovered().await;
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("ToolRegistry")
            .field("tools", &names)
            .field("target_dir", &self.target_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::ToolRegistry;
    use crate::config::DiscoveryConfig;
    use crate::{Tool, ToolCtx, ToolError, ToolFut};
    use anvil_types::ToolResult;
    use serde_json::{Value, json};

    struct Named(&'static str);

    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test tool"
        }

        fn schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn execute<'a>(&'a self, _args: Value, _ctx: &'a mut ToolCtx) -> ToolFut<'a> {
            Box::pin(async { Ok(ToolResult::text("ok")) })
        }
    }

    #[test]
    fn rejects_duplicate_names() {
        let registry = ToolRegistry::new(".");
        registry.register_tool(Named("a")).unwrap();
        let err = registry.register_tool(Named("a")).unwrap_err();
        assert!(matches!(err, ToolError::DuplicateTool { name } if name == "a"));
    }

    #[test]
    fn declarations_are_sorted() {
        let registry = ToolRegistry::new(".");
        registry.register_tool(Named("zeta")).unwrap();
        registry.register_tool(Named("alpha")).unwrap();
        let names: Vec<_> = registry
            .function_declarations()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["alpha", "zeta"]);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn excluded_tools_are_not_registered() {
        let registry = ToolRegistry::new(".").with_discovery(DiscoveryConfig {
            exclude: vec!["hidden".into()],
            ..Default::default()
        });
        registry.register_tool(Named("hidden")).unwrap();
        assert!(registry.get("hidden").is_none());
    }

    #[test]
    fn builtins_have_no_server() {
        let registry = ToolRegistry::new(".");
        registry.register_tool(Named("a")).unwrap();
        assert!(registry.tools_by_server("github").is_empty());
    }
}
