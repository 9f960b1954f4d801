//! MCP (Model Context Protocol) configuration types for the domain layer.
//!
//! These are lightweight config structs used to deserialize the `[mcp]`
//! section of the host config. The actual MCP client logic lives in the
//! `tb-mcp-client` crate.

use serde::{Deserialize, Serialize};

use super::{ConfigError, ConfigSeverity};

/// Top-level MCP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// List of MCP server definitions.
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,

    /// Optional relay prefix routed through an intermediary. A server
    /// with `use_relay = true` has every outbound URL rewritten to
    /// `{relay_url}?{target}`.
    #[serde(default)]
    pub relay_url: Option<String>,

    /// Whether to register the in-process local tools provider
    /// (clock/date tools answered without any network call).
    #[serde(default = "d_local_tools")]
    pub local_tools: bool,

    /// Seconds to wait for the `initialize` handshake to complete.
    #[serde(default = "d_initialize_timeout_secs")]
    pub initialize_timeout_secs: u64,

    /// Default per-request timeout in seconds.
    #[serde(default = "d_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            relay_url: None,
            local_tools: d_local_tools(),
            initialize_timeout_secs: d_initialize_timeout_secs(),
            request_timeout_secs: d_request_timeout_secs(),
        }
    }
}

fn d_local_tools() -> bool {
    true
}

fn d_initialize_timeout_secs() -> u64 {
    10
}

fn d_request_timeout_secs() -> u64 {
    10
}

/// Configuration for a single MCP server connection.
///
/// The URL is the server's identity: reconciliation keys on it, and a
/// changed `use_relay` flag replaces the whole connection rather than
/// patching it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// SSE endpoint URL of the server (e.g. `https://host/sse`).
    pub url: String,

    /// Route this server's traffic through the configured relay.
    #[serde(default)]
    pub use_relay: bool,
}

impl McpConfig {
    pub(super) fn validate_into(&self, issues: &mut Vec<ConfigError>) {
        for server in &self.servers {
            if !server.url.starts_with("http://") && !server.url.starts_with("https://") {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "mcp.servers.url".into(),
                    message: format!("not an http(s) URL: {}", server.url),
                });
            }
            if server.use_relay && self.relay_url.is_none() {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "mcp.relay_url".into(),
                    message: format!(
                        "server {} sets use_relay but no relay_url is configured",
                        server.url
                    ),
                });
            }
        }
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.url.as_str()) {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: "mcp.servers".into(),
                    message: format!("duplicate server URL: {}", server.url),
                });
            }
        }
    }
}
