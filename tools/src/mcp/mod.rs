//! MCP (Model Context Protocol) integration.
//!
//! Each configured server is launched as a stdio child process; every tool it
//! advertises is registered as an [`McpTool`] proxy.
//!
//! ```text
//! ToolRegistry
//!     └── McpTool (implements Tool)
//!             └── McpClient (wraps the rmcp service)
//!                     └── MCP server (stdio child process)
//! ```

mod client;
mod tool;

pub use client::McpClient;
pub use tool::{McpAllowlist, McpTool, content_to_parts};
