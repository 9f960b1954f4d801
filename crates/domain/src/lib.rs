//! `tb-domain` — shared domain types for ToolBridge.
//!
//! This crate holds the types that cross crate boundaries: the shared
//! error type, the agent-facing tool definition, and the configuration
//! structs deserialized from the host application's config file. The
//! MCP client logic itself lives in `tb-mcp-client`; keeping the config
//! deserializers here lets a host parse its config without linking the
//! protocol machinery.

pub mod config;
pub mod error;
pub mod tool;
