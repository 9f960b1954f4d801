//! JSON-RPC 2.0 types for the MCP protocol.
//!
//! Incoming messages are classified exactly once, at the transport
//! boundary, into the [`RpcMessage`] union — the rest of the crate never
//! inspects raw envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope union
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A classified JSON-RPC 2.0 message.
///
/// Discrimination rules (applied in this order):
/// - `method` present, `id` present → [`RpcMessage::Request`]
/// - `method` present, no `id` → [`RpcMessage::Notification`]
/// - `error` present, `id` present → [`RpcMessage::Error`]
/// - `result` present, `id` present → [`RpcMessage::Success`]
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request(RpcRequest),
    Notification(RpcNotification),
    Success(RpcSuccess),
    Error(RpcFailure),
}

impl RpcMessage {
    /// Classify a parsed JSON value into an envelope variant.
    ///
    /// Returns `None` for values that are not JSON-RPC 2.0 envelopes
    /// (wrong or missing `jsonrpc`, no recognizable shape). The caller
    /// decides whether that is worth a log line.
    pub fn classify(value: Value) -> Option<RpcMessage> {
        let obj = value.as_object()?;
        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return None;
        }

        let id = obj.get("id").and_then(Value::as_u64);
        let method = obj.get("method").and_then(Value::as_str);

        match (method, id) {
            (Some(method), Some(id)) => Some(RpcMessage::Request(RpcRequest {
                id,
                method: method.to_string(),
                params: obj.get("params").cloned(),
            })),
            (Some(method), None) => Some(RpcMessage::Notification(RpcNotification {
                method: method.to_string(),
                params: obj.get("params").cloned(),
            })),
            (None, Some(id)) => {
                if let Some(error) = obj.get("error") {
                    let error = serde_json::from_value(error.clone()).ok()?;
                    Some(RpcMessage::Error(RpcFailure { id, error }))
                } else if let Some(result) = obj.get("result") {
                    Some(RpcMessage::Success(RpcSuccess {
                        id,
                        result: result.clone(),
                    }))
                } else {
                    None
                }
            }
            (None, None) => None,
        }
    }

    /// Parse and classify a raw JSON payload.
    pub fn parse(raw: &str) -> Result<Option<RpcMessage>, serde_json::Error> {
        Ok(Self::classify(serde_json::from_str(raw)?))
    }
}

/// A JSON-RPC 2.0 request (has an `id` — expects a response).
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize to the wire envelope.
    pub fn to_value(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("jsonrpc".into(), JSONRPC_VERSION.into());
        obj.insert("id".into(), self.id.into());
        obj.insert("method".into(), self.method.clone().into());
        if let Some(params) = &self.params {
            obj.insert("params".into(), params.clone());
        }
        Value::Object(obj)
    }
}

/// A JSON-RPC 2.0 notification (no `id` — fire-and-forget).
#[derive(Debug, Clone, PartialEq)]
pub struct RpcNotification {
    pub method: String,
    pub params: Option<Value>,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("jsonrpc".into(), JSONRPC_VERSION.into());
        obj.insert("method".into(), self.method.clone().into());
        if let Some(params) = &self.params {
            obj.insert("params".into(), params.clone());
        }
        Value::Object(obj)
    }
}

/// A successful JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcSuccess {
    pub id: u64,
    pub result: Value,
}

/// An error JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcFailure {
    pub id: u64,
    pub error: RpcErrorObject,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcErrorObject {}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP-specific payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client info sent during `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Parameters for the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

/// Server identity returned by `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// The result payload from `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

/// A single tool definition returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// The result payload from `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<McpToolDef>,
}

/// A single content item in a `tools/call` response.
///
/// Only text content is interpreted today; other types round-trip
/// through the `content_type` tag untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

impl ToolCallContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: "text".into(),
            text: text.into(),
        }
    }
}

/// The result payload from `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolCallContent>,
    #[serde(default)]
    #[serde(rename = "isError")]
    pub is_error: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helper constructors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the `initialize` request parameters.
pub fn initialize_params() -> InitializeParams {
    InitializeParams {
        protocol_version: PROTOCOL_VERSION.into(),
        capabilities: serde_json::json!({}),
        client_info: ClientInfo {
            name: "toolbridge".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_request() {
        let req = RpcRequest::new(
            1,
            "initialize",
            Some(serde_json::json!({ "protocolVersion": PROTOCOL_VERSION })),
        );
        let json = serde_json::to_string(&req.to_value()).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"initialize\""));
    }

    #[test]
    fn serialize_request_without_params() {
        let req = RpcRequest::new(2, "tools/list", None);
        let json = serde_json::to_string(&req.to_value()).unwrap();
        assert!(!json.contains("params"));
    }

    #[test]
    fn serialize_notification_has_no_id() {
        let notif = RpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_string(&notif.to_value()).unwrap();
        assert!(json.contains("\"method\":\"notifications/initialized\""));
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn classify_success_response() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"result":{"capabilities":{}}}"#;
        let msg = RpcMessage::parse(raw).unwrap().unwrap();
        match msg {
            RpcMessage::Success(s) => {
                assert_eq!(s.id, 1);
                assert!(s.result.get("capabilities").is_some());
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[test]
    fn classify_error_response() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid request"}}"#;
        let msg = RpcMessage::parse(raw).unwrap().unwrap();
        match msg {
            RpcMessage::Error(f) => {
                assert_eq!(f.id, 1);
                assert_eq!(f.error.code, -32600);
                assert_eq!(f.error.message, "Invalid request");
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn classify_server_request_and_notification() {
        let req = RpcMessage::parse(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(req, RpcMessage::Request(r) if r.method == "ping"));

        let notif =
            RpcMessage::parse(r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#)
                .unwrap()
                .unwrap();
        assert!(matches!(
            notif,
            RpcMessage::Notification(n) if n.method == "notifications/progress"
        ));
    }

    #[test]
    fn classify_rejects_non_jsonrpc() {
        assert!(RpcMessage::parse(r#"{"hello":"world"}"#).unwrap().is_none());
        assert!(RpcMessage::parse(r#"{"jsonrpc":"1.0","id":1,"result":{}}"#)
            .unwrap()
            .is_none());
        assert!(RpcMessage::parse(r#"{"jsonrpc":"2.0","id":1}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn classify_request_wins_over_result() {
        // A message with both method and id is a request even if a stray
        // result field is present.
        let raw = r#"{"jsonrpc":"2.0","id":3,"method":"tools/list","result":{}}"#;
        let msg = RpcMessage::parse(raw).unwrap().unwrap();
        assert!(matches!(msg, RpcMessage::Request(_)));
    }

    #[test]
    fn deserialize_tools_list_result() {
        let raw = r#"{
            "tools": [
                {
                    "name": "read_file",
                    "description": "Read a file",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "path": { "type": "string" }
                        }
                    }
                }
            ]
        }"#;
        let result: ToolsListResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.tools.len(), 1);
        assert_eq!(result.tools[0].name, "read_file");
        assert_eq!(result.tools[0].description, "Read a file");
    }

    #[test]
    fn tools_list_missing_schema_defaults_to_empty_object() {
        let raw = r#"{ "tools": [{ "name": "ping" }] }"#;
        let result: ToolsListResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.tools[0].description, "");
        assert_eq!(result.tools[0].input_schema["type"], "object");
    }

    #[test]
    fn deserialize_tool_call_result() {
        let raw = r#"{
            "content": [{ "type": "text", "text": "file contents here" }]
        }"#;
        let result: ToolCallResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.content[0].content_type, "text");
        assert_eq!(result.content[0].text, "file contents here");
        assert!(!result.is_error);
    }

    #[test]
    fn deserialize_tool_call_result_with_error() {
        let raw = r#"{
            "content": [{ "type": "text", "text": "not found" }],
            "isError": true
        }"#;
        let result: ToolCallResult = serde_json::from_str(raw).unwrap();
        assert!(result.is_error);
    }

    #[test]
    fn initialize_params_uses_current_protocol_version() {
        let params = initialize_params();
        assert_eq!(params.protocol_version, PROTOCOL_VERSION);
        assert_eq!(params.client_info.name, "toolbridge");
    }

    #[test]
    fn initialize_result_tolerates_missing_fields() {
        let result: InitializeResult = serde_json::from_str("{}").unwrap();
        assert!(result.server_info.is_none());
    }

    #[test]
    fn rpc_error_display() {
        let err = RpcErrorObject {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(format!("{err}"), "JSON-RPC error -32601: Method not found");
    }
}
