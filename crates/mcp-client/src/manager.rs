//! MCP manager — reconciles the set of client connections against the
//! desired configuration and presents one aggregated tool surface to the
//! calling agent.
//!
//! The manager is constructed and owned by the host application and
//! passed by reference (`Arc`) wherever tools are needed; there is no
//! global instance. Clients are kept in declaration order (the local
//! provider first, then configured servers in order), which makes
//! first-match-wins tool dispatch deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use tb_domain::config::{McpConfig, McpServerConfig};
use tb_domain::tool::ToolDefinition;

use crate::client::{ClientOptions, ConnectionState, McpClient, McpError, ToolClient};
use crate::local::LocalToolsClient;
use crate::protocol::ToolCallResult;
use crate::schema::sanitize_schema;

/// One managed connection: the descriptor it was built from (absent for
/// the local provider) and the client behind the uniform seam.
struct ManagedClient {
    descriptor: Option<McpServerConfig>,
    client: Arc<dyn ToolClient>,
}

/// Manager that owns all MCP client connections.
pub struct McpManager {
    clients: RwLock<Vec<ManagedClient>>,
    options: ClientOptions,
}

impl McpManager {
    /// Create a manager with no remote servers connected yet. The local
    /// tools provider is registered immediately when enabled.
    pub fn new(config: &McpConfig) -> Self {
        let mut clients = Vec::new();
        if config.local_tools {
            clients.push(ManagedClient {
                descriptor: None,
                client: Arc::new(LocalToolsClient::new()),
            });
        }
        Self {
            clients: RwLock::new(clients),
            options: ClientOptions::from_config(config),
        }
    }

    /// Create a manager and start connecting every configured server.
    ///
    /// Connections proceed in the background; servers that fail are
    /// logged and skipped, never failing the others.
    pub async fn from_config(config: &McpConfig) -> Self {
        let manager = Self::new(config);
        manager.reconcile(&config.servers).await;
        manager
    }

    /// Bring the client set into agreement with `desired`.
    ///
    /// A current client whose URL is absent from the desired set, or
    /// whose relay flag differs, is disconnected and removed — a changed
    /// transport policy is a different server, never patched in place.
    /// New entries are connected in spawned tasks. The local provider is
    /// exempt and always retained. Idempotent: reconciling the same set
    /// twice performs no second connect or disconnect.
    pub async fn reconcile(&self, desired: &[McpServerConfig]) {
        let mut removed: Vec<Arc<dyn ToolClient>> = Vec::new();
        {
            let mut clients = self.clients.write().await;

            let mut locals = Vec::new();
            let mut kept: HashMap<String, ManagedClient> = HashMap::new();
            for entry in clients.drain(..) {
                match &entry.descriptor {
                    None => locals.push(entry),
                    Some(descriptor) => {
                        if desired.contains(descriptor) {
                            kept.insert(descriptor.url.clone(), entry);
                        } else {
                            tracing::info!(
                                server = %descriptor.url,
                                "removing MCP server (config changed or removed)"
                            );
                            removed.push(entry.client);
                        }
                    }
                }
            }

            let mut next = locals;
            for descriptor in desired {
                if let Some(entry) = kept.remove(&descriptor.url) {
                    next.push(entry);
                    continue;
                }
                tracing::info!(
                    server = %descriptor.url,
                    use_relay = descriptor.use_relay,
                    "adding MCP server"
                );
                match McpClient::new(descriptor.clone(), &self.options) {
                    Ok(client) => {
                        let client = Arc::new(client);
                        next.push(ManagedClient {
                            descriptor: Some(descriptor.clone()),
                            client: client.clone(),
                        });
                        // Fire-and-forget: one failing server must never
                        // block or fail the others.
                        tokio::spawn(async move {
                            if let Err(e) = client.connect().await {
                                tracing::warn!(
                                    server = %client.server_config().url,
                                    error = %e,
                                    "failed to connect MCP server"
                                );
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(
                            server = %descriptor.url,
                            error = %e,
                            "failed to create MCP client"
                        );
                    }
                }
            }
            *clients = next;
        }

        for client in removed {
            client.disconnect().await;
        }
    }

    /// All tools of every connected client, schemas sanitized for the
    /// agent. Disconnected or erroring clients contribute nothing.
    pub async fn all_tools(&self) -> Vec<ToolDefinition> {
        let clients = self.clients.read().await;
        let mut tools = Vec::new();
        for entry in clients.iter() {
            if entry.client.state().await != ConnectionState::Connected {
                continue;
            }
            for tool in entry.client.tools().await {
                tools.push(ToolDefinition {
                    name: tool.name,
                    description: tool.description,
                    parameters: sanitize_schema(&tool.input_schema),
                });
            }
        }
        tools
    }

    /// Route a tool invocation to the first connected client whose
    /// catalog contains `name`.
    pub async fn execute_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, McpError> {
        let owner = {
            let clients = self.clients.read().await;
            let mut owner = None;
            for entry in clients.iter() {
                if entry.client.state().await != ConnectionState::Connected {
                    continue;
                }
                if entry.client.tools().await.iter().any(|t| t.name == name) {
                    owner = Some(entry.client.clone());
                    break;
                }
            }
            owner
        };

        match owner {
            Some(client) => {
                tracing::debug!(tool = name, server = %client.key(), "executing tool");
                client.call_tool(name, arguments).await
            }
            None => Err(McpError::ToolNotFound(name.to_string())),
        }
    }

    /// Snapshot of `(key, state)` per client, in precedence order.
    pub async fn server_states(&self) -> Vec<(String, ConnectionState)> {
        let clients = self.clients.read().await;
        let mut states = Vec::with_capacity(clients.len());
        for entry in clients.iter() {
            states.push((entry.client.key().to_string(), entry.client.state().await));
        }
        states
    }

    /// Number of managed clients (local provider included).
    pub async fn server_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Total tools across connected clients.
    pub async fn tool_count(&self) -> usize {
        let clients = self.clients.read().await;
        let mut count = 0;
        for entry in clients.iter() {
            if entry.client.state().await == ConnectionState::Connected {
                count += entry.client.tools().await.len();
            }
        }
        count
    }

    /// Disconnect every client concurrently, the local provider included.
    pub async fn shutdown(&self) {
        let clients = self.clients.read().await;
        let futs: Vec<_> = clients.iter().map(|e| e.client.disconnect()).collect();
        futures_util::future::join_all(futs).await;
        tracing::info!(count = clients.len(), "MCP manager shut down");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LOCAL_TOOLS_KEY;
    use serde_json::json;

    fn local_only_config() -> McpConfig {
        McpConfig::default()
    }

    fn bare_config() -> McpConfig {
        McpConfig {
            local_tools: false,
            ..McpConfig::default()
        }
    }

    #[tokio::test]
    async fn empty_manager_has_no_tools() {
        let manager = McpManager::new(&bare_config());
        assert_eq!(manager.server_count().await, 0);
        assert_eq!(manager.tool_count().await, 0);
        assert!(manager.all_tools().await.is_empty());
    }

    #[tokio::test]
    async fn missing_tool_is_rejected() {
        let manager = McpManager::new(&local_only_config());
        let err = manager
            .execute_tool("missing_tool", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolNotFound(name) if name == "missing_tool"));
    }

    #[tokio::test]
    async fn local_provider_is_registered_and_callable() {
        let manager = McpManager::new(&local_only_config());
        assert_eq!(manager.server_count().await, 1);

        let tools = manager.all_tools().await;
        assert_eq!(tools.len(), 4);
        assert!(tools.iter().any(|t| t.name == "get_current_datetime"));

        let result = manager
            .execute_tool("get_current_datetime", json!({}))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content[0].content_type, "text");
    }

    #[tokio::test]
    async fn reconcile_with_empty_set_keeps_local_provider() {
        let manager = McpManager::new(&local_only_config());
        manager.reconcile(&[]).await;
        let states = manager.server_states().await;
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].0, LOCAL_TOOLS_KEY);
        assert_eq!(states[0].1, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn shutdown_is_safe_with_local_only() {
        let manager = McpManager::new(&local_only_config());
        manager.shutdown().await;
        // The local provider ignores disconnect and stays usable.
        assert_eq!(manager.tool_count().await, 4);
    }
}
