//! MCP transport layer: one streaming read channel plus a discovered
//! write channel to the same logical server.
//!
//! The transport opens an SSE stream (GET for a pure subscribe, POST when
//! the handshake rides the opening request), parses event-stream framing
//! incrementally, discovers the write endpoint from `endpoint` frames,
//! and POSTs outgoing messages. Servers are free to answer a POST either
//! inline in the response body or asynchronously over the open stream;
//! both paths deliver through the same event channel, so the client above
//! correlates purely by request id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::Url;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::protocol::RpcMessage;

/// Response/request header carrying the server-assigned session identifier.
pub const SESSION_HEADER: &str = "mcp-session-id";

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("no write endpoint discovered yet")]
    NotConnected,

    #[error("send failed: {0}")]
    Send(String),

    #[error("transport closed")]
    Closed,

    #[error("timed out waiting for endpoint discovery")]
    EndpointTimeout,

    #[error("invalid URL: {0}")]
    Url(String),
}

/// Events observable on a transport, delivered on a single typed channel
/// consumed by the owning client.
#[derive(Debug)]
pub enum TransportEvent {
    /// The streaming connection was accepted.
    Opened,
    /// A JSON-RPC envelope arrived (on the primary stream, a streamed
    /// POST reply, or inline in a POST response body).
    Message(RpcMessage),
    /// The primary stream ended; `Some` carries the error cause.
    Closed(Option<String>),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event-stream framing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One parsed SSE frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental event-stream decoder.
///
/// Buffered text is split on line boundaries (`\n`, tolerating `\r\n`);
/// a blank line terminates one frame. `event:` sets the frame type
/// (default `message`); `data:` lines are newline-joined into the frame
/// payload. Frame state persists across chunk boundaries, so a frame
/// split mid-line between two network reads parses correctly.
#[derive(Debug, Default)]
pub(crate) struct FrameParser {
    buffer: String,
    event_type: Option<String>,
    data_lines: Vec<String>,
}

impl FrameParser {
    /// Feed a chunk of decoded text, draining every frame it completes.
    pub fn push_chunk(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    frames.push(SseFrame {
                        event: self
                            .event_type
                            .take()
                            .unwrap_or_else(|| "message".to_string()),
                        data: self.data_lines.join("\n"),
                    });
                }
                self.event_type = None;
                self.data_lines.clear();
            } else if let Some(rest) = line.strip_prefix("event:") {
                self.event_type = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines.push(rest.trim().to_string());
            }
            // id:, retry: and comment lines are not meaningful here.
        }

        frames
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SseTransport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Transport-local session state: the discovered write endpoint and the
/// optional server-assigned session identifier. Lives and dies with the
/// transport.
#[derive(Debug, Default)]
struct SessionContext {
    write_endpoint: RwLock<Option<Url>>,
    session_id: RwLock<Option<String>>,
}

/// SSE transport for a single MCP server.
pub struct SseTransport {
    /// Original (non-relayed) connection URL. Relative `endpoint` frame
    /// payloads resolve against this, never against a relay-rewritten URL.
    url: Url,
    relay: Option<String>,
    http: reqwest::Client,
    session: Arc<SessionContext>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    endpoint_tx: Arc<Mutex<Option<oneshot::Sender<Url>>>>,
    endpoint_rx: Mutex<Option<oneshot::Receiver<Url>>>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl SseTransport {
    /// Create a transport for `url`, optionally routing every outbound
    /// request through a relay prefix.
    pub fn new(url: &str, http: reqwest::Client, relay: Option<String>) -> Result<Self, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::Url(format!("{url}: {e}")))?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        Ok(Self {
            url,
            relay,
            http,
            session: Arc::new(SessionContext::default()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            endpoint_tx: Arc::new(Mutex::new(Some(endpoint_tx))),
            endpoint_rx: Mutex::new(Some(endpoint_rx)),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Take the event receiver. Yields `Some` exactly once; the transport
    /// is designed for a single owning consumer.
    pub fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.lock().take()
    }

    /// The write endpoint, once discovered.
    pub fn write_endpoint(&self) -> Option<Url> {
        self.session.write_endpoint.read().clone()
    }

    /// The session identifier captured from the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session.session_id.read().clone()
    }

    /// Wait until the server announces the write endpoint.
    ///
    /// Resolved exactly once by the frame parser when the `endpoint`
    /// frame arrives; `deadline` bounds the wait. Returns immediately if
    /// the endpoint is already known (e.g. the handshake rode the opening
    /// POST and the connection URL is the default write endpoint).
    pub async fn await_endpoint(&self, deadline: Duration) -> Result<Url, TransportError> {
        if let Some(url) = self.write_endpoint() {
            return Ok(url);
        }
        let rx = self
            .endpoint_rx
            .lock()
            .take()
            .ok_or(TransportError::Closed)?;
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(url)) => Ok(url),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::EndpointTimeout),
        }
    }

    /// Apply the relay rewrite, if configured.
    fn effective_url(&self, target: &Url) -> String {
        match &self.relay {
            Some(prefix) => format!("{prefix}?{target}"),
            None => target.to_string(),
        }
    }

    fn consumer(&self) -> StreamConsumer {
        StreamConsumer {
            base_url: self.url.clone(),
            session: Arc::clone(&self.session),
            events_tx: self.events_tx.clone(),
            endpoint_tx: Arc::clone(&self.endpoint_tx),
            cancel: self.cancel.clone(),
        }
    }

    /// Open the streaming connection.
    ///
    /// With an `initial_message` the open is a POST carrying that message
    /// as its body (the handshake rides the opening request, and the
    /// connection URL becomes the default write endpoint); without one it
    /// is a pure GET subscribe and writes stay unavailable until an
    /// `endpoint` frame arrives.
    ///
    /// Frame consumption runs in a spawned task; `open` returns as soon
    /// as the response status is known.
    pub async fn open(&self, initial_message: Option<Value>) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Connect("transport already started".into()));
        }

        let connection_url = self.effective_url(&self.url);
        tracing::debug!(
            url = %connection_url,
            handshake = initial_message.is_some(),
            "opening MCP stream"
        );

        let request = match &initial_message {
            Some(message) => self.http.post(&connection_url).json(message),
            None => self.http.get(&connection_url),
        };
        let response = request
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Connect(format!("HTTP {status}")));
        }

        if let Some(sid) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            tracing::debug!(session_id = %sid, "captured session identifier");
            *self.session.session_id.write() = Some(sid.to_string());
        }

        if initial_message.is_some() {
            let mut endpoint = self.session.write_endpoint.write();
            if endpoint.is_none() {
                *endpoint = Some(self.url.clone());
            }
        }

        let _ = self.events_tx.send(TransportEvent::Opened).await;

        tokio::spawn(self.consumer().run(response, true));
        Ok(())
    }

    /// POST a message to the discovered write endpoint.
    ///
    /// A reply with a streaming content type is fed through a fresh frame
    /// parser onto the event channel; an inline JSON-RPC body is delivered
    /// exactly as if it had arrived on the primary stream.
    pub async fn send(&self, message: &Value) -> Result<(), TransportError> {
        let endpoint = self.write_endpoint().ok_or(TransportError::NotConnected)?;
        let target = self.effective_url(&endpoint);

        let mut request = self.http.post(&target).json(message);
        if let Some(sid) = self.session_id() {
            request = request.header(SESSION_HEADER, sid);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Send(format!("HTTP {status}")));
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        if is_stream {
            tracing::debug!("POST reply is a stream, consuming frames");
            tokio::spawn(self.consumer().run(response, false));
        } else {
            let text = response
                .text()
                .await
                .map_err(|e| TransportError::Send(e.to_string()))?;
            if !text.trim().is_empty() {
                self.consumer().deliver_json(&text).await;
            }
        }
        Ok(())
    }

    /// Cancel all in-flight reads and writes. Idempotent; safe on a
    /// never-opened transport.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream consumption
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Frame consumption shared by the primary stream and streamed POST
/// replies. Only the primary stream reports closure.
struct StreamConsumer {
    base_url: Url,
    session: Arc<SessionContext>,
    events_tx: mpsc::Sender<TransportEvent>,
    endpoint_tx: Arc<Mutex<Option<oneshot::Sender<Url>>>>,
    cancel: CancellationToken,
}

impl StreamConsumer {
    async fn run(self, mut response: reqwest::Response, primary: bool) {
        let mut parser = FrameParser::default();
        let cause = loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => break None,
                chunk = response.chunk() => chunk,
            };
            match chunk {
                Ok(Some(bytes)) => {
                    for frame in parser.push_chunk(&String::from_utf8_lossy(&bytes)) {
                        self.handle_frame(frame).await;
                    }
                }
                Ok(None) => break None,
                Err(e) => break Some(e.to_string()),
            }
        };

        if primary {
            if let Some(cause) = &cause {
                tracing::warn!(error = %cause, "MCP stream failed");
            } else {
                tracing::debug!("MCP stream ended");
            }
            let _ = self.events_tx.send(TransportEvent::Closed(cause)).await;
        }
    }

    async fn handle_frame(&self, frame: SseFrame) {
        match frame.event.as_str() {
            "endpoint" => {
                let raw = frame.data.trim();
                match self.base_url.join(raw) {
                    Ok(url) => {
                        tracing::debug!(endpoint = %url, "write endpoint discovered");
                        *self.session.write_endpoint.write() = Some(url.clone());
                        if let Some(tx) = self.endpoint_tx.lock().take() {
                            let _ = tx.send(url);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(payload = %raw, error = %e, "invalid endpoint URI");
                    }
                }
            }
            "message" => self.deliver_json(&frame.data).await,
            other => {
                tracing::debug!(event = %other, "ignoring unrecognized frame type");
            }
        }
    }

    /// Parse a JSON payload and deliver it if it is a JSON-RPC envelope.
    /// Malformed JSON is logged and dropped, never fatal.
    async fn deliver_json(&self, raw: &str) {
        match RpcMessage::parse(raw) {
            Ok(Some(message)) => {
                let _ = self.events_tx.send(TransportEvent::Message(message)).await;
            }
            Ok(None) => {
                tracing::debug!(payload = %raw, "ignoring non-JSON-RPC payload");
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse streamed message");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_complete_frame() {
        let mut parser = FrameParser::default();
        let frames = parser.push_chunk("event: message\ndata: {\"hello\":\"world\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "{\"hello\":\"world\"}");
    }

    #[test]
    fn event_type_defaults_to_message() {
        let mut parser = FrameParser::default();
        let frames = parser.push_chunk("data: payload\n\n");
        assert_eq!(frames[0].event, "message");
    }

    #[test]
    fn endpoint_frame_parses() {
        let mut parser = FrameParser::default();
        let frames = parser.push_chunk("event: endpoint\ndata: /rpc?sid=42\n\n");
        assert_eq!(frames[0].event, "endpoint");
        assert_eq!(frames[0].data, "/rpc?sid=42");
    }

    #[test]
    fn multiple_data_lines_are_newline_joined() {
        let mut parser = FrameParser::default();
        let frames = parser.push_chunk("data: line one\ndata: line two\n\n");
        assert_eq!(frames[0].data, "line one\nline two");
    }

    #[test]
    fn partial_frame_stays_buffered_across_chunks() {
        let mut parser = FrameParser::default();
        assert!(parser.push_chunk("event: endp").is_empty());
        assert!(parser.push_chunk("oint\ndata: /rpc").is_empty());
        let frames = parser.push_chunk("\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "endpoint");
        assert_eq!(frames[0].data, "/rpc");
    }

    #[test]
    fn crlf_line_endings_accepted() {
        let mut parser = FrameParser::default();
        let frames = parser.push_chunk("event: message\r\ndata: hi\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "hi");
    }

    #[test]
    fn frame_type_resets_between_frames() {
        let mut parser = FrameParser::default();
        let frames = parser.push_chunk("event: endpoint\ndata: /rpc\n\ndata: {}\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "endpoint");
        assert_eq!(frames[1].event, "message");
    }

    #[test]
    fn blank_line_without_data_produces_no_frame() {
        let mut parser = FrameParser::default();
        assert!(parser.push_chunk("\n\n\n").is_empty());
    }

    #[test]
    fn id_and_retry_lines_ignored() {
        let mut parser = FrameParser::default();
        let frames = parser.push_chunk("id: 9\nretry: 5000\ndata: payload\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "payload");
    }

    #[test]
    fn relative_endpoint_resolves_against_original_url() {
        let base = Url::parse("https://host.example.com/sse").unwrap();
        let resolved = base.join("/rpc").unwrap();
        assert_eq!(resolved.as_str(), "https://host.example.com/rpc");
    }

    #[test]
    fn absolute_endpoint_payload_wins() {
        let base = Url::parse("https://host.example.com/sse").unwrap();
        let resolved = base.join("https://other.example.com/messages").unwrap();
        assert_eq!(resolved.as_str(), "https://other.example.com/messages");
    }

    #[test]
    fn relay_rewrite_prefixes_target() {
        let transport = SseTransport::new(
            "https://host.example.com/sse",
            reqwest::Client::new(),
            Some("https://relay.example.com/".into()),
        )
        .unwrap();
        let target = Url::parse("https://host.example.com/rpc").unwrap();
        assert_eq!(
            transport.effective_url(&target),
            "https://relay.example.com/?https://host.example.com/rpc"
        );
    }

    #[test]
    fn no_relay_leaves_url_untouched() {
        let transport =
            SseTransport::new("https://host.example.com/sse", reqwest::Client::new(), None)
                .unwrap();
        let target = Url::parse("https://host.example.com/rpc").unwrap();
        assert_eq!(transport.effective_url(&target), "https://host.example.com/rpc");
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(matches!(
            SseTransport::new("not a url", reqwest::Client::new(), None),
            Err(TransportError::Url(_))
        ));
    }

    #[tokio::test]
    async fn send_before_discovery_is_not_connected() {
        let transport =
            SseTransport::new("https://host.example.com/sse", reqwest::Client::new(), None)
                .unwrap();
        let err = transport
            .send(&serde_json::json!({"jsonrpc":"2.0","method":"x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[test]
    fn close_is_idempotent_on_unopened_transport() {
        let transport =
            SseTransport::new("https://host.example.com/sse", reqwest::Client::new(), None)
                .unwrap();
        transport.close();
        transport.close();
    }

    #[test]
    fn events_taken_only_once() {
        let transport =
            SseTransport::new("https://host.example.com/sse", reqwest::Client::new(), None)
                .unwrap();
        assert!(transport.take_events().is_some());
        assert!(transport.take_events().is_none());
    }
}
