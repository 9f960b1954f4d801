//! `tb-mcp-client` — MCP (Model Context Protocol) client for ToolBridge.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types, classified once into a tagged union at
//!   the transport boundary.
//! - An SSE transport: streaming read channel, endpoint discovery, and
//!   HTTP POST writes, with an optional relay rewrite.
//! - An `McpClient` that correlates concurrent requests by id over one
//!   transport.
//! - An `McpManager` that reconciles clients against configuration and
//!   aggregates every catalog into one agent-facing tool surface.
//! - A `LocalToolsClient` answering clock/date queries in-process behind
//!   the same seam.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tb_mcp_client::McpManager;
//! use tb_domain::config::McpConfig;
//!
//! let config: McpConfig = /* from TOML */;
//! let manager = McpManager::from_config(&config).await;
//!
//! // Expose the aggregated tools to the agent.
//! for tool in manager.all_tools().await {
//!     println!("{}: {}", tool.name, tool.description);
//! }
//!
//! // Route an invocation picked by the agent.
//! let result = manager.execute_tool("get_current_datetime", json!({})).await?;
//! ```

pub mod client;
pub mod local;
pub mod manager;
pub mod protocol;
pub mod schema;
pub mod transport;

// Re-exports for convenience.
pub use client::{ClientOptions, ConnectionState, McpClient, McpError, ToolClient};
pub use local::LocalToolsClient;
pub use manager::McpManager;
pub use protocol::{McpToolDef, ToolCallContent, ToolCallResult};
pub use schema::sanitize_schema;
pub use transport::{SseTransport, TransportError, TransportEvent};
pub use tb_domain::config::{McpConfig, McpServerConfig};
