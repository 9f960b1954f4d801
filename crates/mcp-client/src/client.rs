//! MCP RPC client — turns a transport into a request/response JSON-RPC
//! 2.0 peer.
//!
//! Every request is correlated by an integer id: a oneshot sender is
//! parked in the pending map, the envelope goes out over the transport,
//! and the call settles on whichever comes first, the matching response
//! on the event channel or the per-request deadline. Responses whose id
//! has no pending entry are discarded, so a reply arriving after its
//! timeout can never double-resolve.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use tb_domain::config::{McpConfig, McpServerConfig};

use crate::protocol::{
    self, InitializeResult, McpToolDef, RpcErrorObject, RpcMessage, RpcNotification, RpcRequest,
    ServerInfo, ToolCallResult, ToolsListResult,
};
use crate::transport::{SseTransport, TransportError, TransportEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Errors specific to MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("initialize timed out after {0:?}")]
    InitializeTimeout(Duration),

    #[error("request {method} timed out after {timeout:?}")]
    RequestTimeout { method: String, timeout: Duration },

    #[error("transport closed with request in flight")]
    TransportClosed,

    #[error(transparent)]
    Rpc(#[from] RpcErrorObject),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool {name} failed: {error}")]
    ToolExecution { name: String, error: RpcErrorObject },

    #[error("MCP protocol error: {0}")]
    Protocol(String),
}

impl From<McpError> for tb_domain::error::Error {
    fn from(e: McpError) -> Self {
        match e {
            McpError::InitializeTimeout(_) | McpError::RequestTimeout { .. } => {
                tb_domain::error::Error::Timeout(e.to_string())
            }
            McpError::ToolNotFound(name) => tb_domain::error::Error::ToolNotFound(name),
            other => tb_domain::error::Error::Other(other.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of one client.
///
/// Transitions run one way: `Disconnected → Connecting → Connected`,
/// with `Error` reachable from the two active states. A client in
/// `Error` is never resurrected in place; reconnecting means building a
/// new client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolClient seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The capability set shared by remote MCP clients and the in-process
/// local tools provider. The manager only ever talks through this trait.
#[async_trait]
pub trait ToolClient: Send + Sync {
    /// Stable identity key (endpoint URL, or a `local://` scheme).
    fn key(&self) -> &str;

    async fn state(&self) -> ConnectionState;

    /// Snapshot of the cached tool catalog.
    async fn tools(&self) -> Vec<McpToolDef>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError>;

    async fn disconnect(&self);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpClient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type PendingOutcome = Result<Value, RpcErrorObject>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<PendingOutcome>>>>;

/// Shared client construction options, derived from the `[mcp]` config
/// section. One instance (with its pooled HTTP client) serves every
/// client the manager creates.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub http: reqwest::Client,
    pub relay_url: Option<String>,
    pub initialize_timeout: Duration,
    pub request_timeout: Duration,
}

impl ClientOptions {
    pub fn from_config(config: &McpConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.initialize_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            relay_url: config.relay_url.clone(),
            initialize_timeout: Duration::from_secs(config.initialize_timeout_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

/// MCP client for a single remote server.
pub struct McpClient {
    config: McpServerConfig,
    transport: SseTransport,
    state: Arc<RwLock<ConnectionState>>,
    next_id: AtomicU64,
    pending: PendingMap,
    tools: RwLock<Vec<McpToolDef>>,
    server_info: RwLock<Option<ServerInfo>>,
    initialize_timeout: Duration,
    request_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    /// Build a client for the given server descriptor. No network
    /// activity happens until [`connect`](Self::connect).
    pub fn new(config: McpServerConfig, options: &ClientOptions) -> Result<Self, McpError> {
        let relay = config
            .use_relay
            .then(|| options.relay_url.clone())
            .flatten();
        let transport = SseTransport::new(&config.url, options.http.clone(), relay)?;
        Ok(Self {
            config,
            transport,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            tools: RwLock::new(Vec::new()),
            server_info: RwLock::new(None),
            initialize_timeout: options.initialize_timeout,
            request_timeout: options.request_timeout,
            reader: Mutex::new(None),
        })
    }

    /// The descriptor this client was built from.
    pub fn server_config(&self) -> &McpServerConfig {
        &self.config
    }

    /// Server identity reported during `initialize`, if any.
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().await.clone()
    }

    async fn fail(&self) {
        *self.state.write().await = ConnectionState::Error;
    }

    /// Connect: open the transport with the `initialize` handshake riding
    /// the request, wait for the matching response, send
    /// `notifications/initialized`, then refresh the tool catalog.
    ///
    /// A catalog-refresh failure degrades the client to connected with an
    /// empty catalog; everything before that is fatal and leaves the
    /// client in [`ConnectionState::Error`].
    pub async fn connect(&self) -> Result<(), McpError> {
        {
            let mut state = self.state.write().await;
            if *state != ConnectionState::Disconnected {
                return Err(McpError::Protocol(format!(
                    "connect called in {state} state"
                )));
            }
            *state = ConnectionState::Connecting;
        }
        tracing::info!(server = %self.config.url, "connecting to MCP server");

        let events = self.transport.take_events().ok_or_else(|| {
            McpError::Protocol("transport event channel already consumed".into())
        })?;
        let handle = tokio::spawn(reader_loop(
            events,
            Arc::clone(&self.pending),
            Arc::clone(&self.state),
        ));
        *self.reader.lock().await = Some(handle);

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let params = serde_json::to_value(protocol::initialize_params())
            .map_err(|e| McpError::Protocol(format!("failed to serialize initialize params: {e}")))?;
        let request = RpcRequest::new(id, "initialize", Some(params));

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.transport.open(Some(request.to_value())).await {
            self.pending.lock().await.remove(&id);
            self.fail().await;
            return Err(McpError::Transport(e));
        }

        let outcome = match tokio::time::timeout(self.initialize_timeout, rx).await {
            Err(_) => {
                self.pending.lock().await.remove(&id);
                self.fail().await;
                return Err(McpError::InitializeTimeout(self.initialize_timeout));
            }
            Ok(Err(_)) => {
                self.fail().await;
                return Err(McpError::TransportClosed);
            }
            Ok(Ok(outcome)) => outcome,
        };

        let result = match outcome {
            Ok(value) => value,
            Err(error) => {
                self.fail().await;
                return Err(McpError::Rpc(error));
            }
        };

        match serde_json::from_value::<InitializeResult>(result) {
            Ok(init) => {
                if let Some(info) = &init.server_info {
                    tracing::debug!(
                        server = %self.config.url,
                        name = %info.name,
                        version = %info.version,
                        "MCP initialize response received"
                    );
                }
                *self.server_info.write().await = init.server_info;
            }
            Err(e) => {
                tracing::warn!(server = %self.config.url, error = %e, "unparseable initialize result");
            }
        }

        *self.state.write().await = ConnectionState::Connected;

        if let Err(e) = self
            .notification("notifications/initialized", Some(serde_json::json!({})))
            .await
        {
            self.fail().await;
            return Err(e);
        }

        if let Err(e) = self.list_tools().await {
            tracing::warn!(
                server = %self.config.url,
                error = %e,
                "tools/list failed, continuing with empty catalog"
            );
        }

        let tool_count = self.tools.read().await.len();
        tracing::info!(
            server = %self.config.url,
            tools = tool_count,
            "MCP server connected"
        );
        Ok(())
    }

    /// Send a request and await the correlated response, using the
    /// configured default timeout.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        self.request_with_timeout(method, params, self.request_timeout)
            .await
    }

    /// Send a request with a caller-chosen timeout. On expiry the pending
    /// entry is removed, so a late response is discarded rather than
    /// resolved.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = RpcRequest::new(id, method, params);
        tracing::debug!(id, method, "sending MCP request");
        if let Err(e) = self.transport.send(&request.to_value()).await {
            self.pending.lock().await.remove(&id);
            return Err(McpError::Transport(e));
        }

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::RequestTimeout {
                    method: method.to_string(),
                    timeout,
                })
            }
            Ok(Err(_)) => Err(McpError::TransportClosed),
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(error))) => Err(McpError::Rpc(error)),
        }
    }

    /// Send a notification (no id, no reply awaited).
    pub async fn notification(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        tracing::debug!(method, "sending MCP notification");
        let notification = RpcNotification::new(method, params);
        self.transport
            .send(&notification.to_value())
            .await
            .map_err(McpError::Transport)
    }

    /// Fetch the tool catalog and replace the cache wholesale on success.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        let result = self
            .request("tools/list", Some(serde_json::json!({})))
            .await?;
        let parsed: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools/list result: {e}")))?;
        *self.tools.write().await = parsed.tools.clone();
        Ok(parsed.tools)
    }

    /// Invoke a tool on this server.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, McpError> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let result = match self.request("tools/call", Some(params)).await {
            Ok(value) => value,
            Err(McpError::Rpc(error)) => {
                return Err(McpError::ToolExecution {
                    name: name.to_string(),
                    error,
                })
            }
            Err(e) => return Err(e),
        };
        serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools/call result: {e}")))
    }

    /// Tear the connection down: reject all pending requests, cancel the
    /// transport, stop the reader. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        tracing::info!(server = %self.config.url, "disconnecting MCP client");
        {
            let mut state = self.state.write().await;
            if *state != ConnectionState::Error {
                *state = ConnectionState::Disconnected;
            }
        }
        self.transport.close();
        reject_all(&self.pending).await;
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl ToolClient for McpClient {
    fn key(&self) -> &str {
        &self.config.url
    }

    async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn tools(&self) -> Vec<McpToolDef> {
        self.tools.read().await.clone()
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        McpClient::call_tool(self, name, arguments).await
    }

    async fn disconnect(&self) {
        McpClient::disconnect(self).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drain the transport event channel, resolving pending requests as
/// their responses arrive. Ends when the channel closes or the primary
/// stream reports closure.
async fn reader_loop(
    mut events: mpsc::Receiver<TransportEvent>,
    pending: PendingMap,
    state: Arc<RwLock<ConnectionState>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Opened => {
                tracing::debug!("MCP stream opened");
            }
            TransportEvent::Message(message) => dispatch_message(message, &pending).await,
            TransportEvent::Closed(cause) => {
                {
                    let mut state = state.write().await;
                    match *state {
                        ConnectionState::Connected | ConnectionState::Connecting => {
                            *state = if cause.is_some() {
                                ConnectionState::Error
                            } else {
                                ConnectionState::Disconnected
                            };
                        }
                        _ => {}
                    }
                }
                reject_all(&pending).await;
                break;
            }
        }
    }
}

async fn dispatch_message(message: RpcMessage, pending: &PendingMap) {
    match message {
        RpcMessage::Success(success) => resolve(pending, success.id, Ok(success.result)).await,
        RpcMessage::Error(failure) => resolve(pending, failure.id, Err(failure.error)).await,
        RpcMessage::Notification(n) => {
            tracing::debug!(method = %n.method, "server notification");
        }
        RpcMessage::Request(r) => {
            tracing::warn!(
                method = %r.method,
                id = r.id,
                "server-to-client requests are not supported, ignoring"
            );
        }
    }
}

/// Settle the pending request with this id, if it is still pending. A
/// response with no entry (already resolved, timed out, or never issued)
/// is discarded.
async fn resolve(pending: &PendingMap, id: u64, outcome: PendingOutcome) {
    let tx = pending.lock().await.remove(&id);
    match tx {
        Some(tx) => {
            let _ = tx.send(outcome);
        }
        None => tracing::debug!(id, "discarding response with no pending request"),
    }
}

/// Reject every outstanding request by dropping its sender; receivers
/// observe the closed channel as [`McpError::TransportClosed`].
async fn reject_all(pending: &PendingMap) {
    let mut pending = pending.lock().await;
    if !pending.is_empty() {
        tracing::debug!(count = pending.len(), "rejecting pending requests on close");
    }
    pending.clear();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
