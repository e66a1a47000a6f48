//! Shared MCP transport abstractions.
//!
//! Every channel (streamable HTTP, legacy SSE, cross-frame messaging) moves
//! pre-serialized JSON-RPC bodies through the same [`McpTransport`] contract
//! so the canonical client and the decorators never branch on the channel.

use crate::core::config::data::HttpSettings;
use crate::mcp::error::{McpError, McpResult};
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::RequestId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

pub mod post_message;
pub mod signed;
pub mod sse;
pub mod streamable_http;

pub use post_message::{
    FrameChannel, FrameEnvelope, FrameHandle, OriginPolicy, PostMessageTransport,
};
pub use signed::SignedTransport;
pub use sse::SseTransport;
pub use streamable_http::StreamableHttpTransport;

/// JSON-RPC code used by servers to indicate unsupported list methods.
pub const MCP_METHOD_NOT_FOUND: i64 = -32601;
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";
const MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const MCP_HTTP_POOL_MAX_IDLE_PER_HOST: usize = 8;

/// Supported MCP transport backends.
///
/// - [`McpTransportKind::HttpStream`] for streamable HTTP servers.
/// - [`McpTransportKind::Sse`] for servers that only speak the older
///   GET-stream plus POST-endpoint protocol.
/// - [`McpTransportKind::PostMessage`] for servers embedded in a UI frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum McpTransportKind {
    #[serde(alias = "streamable-http", alias = "http")]
    HttpStream,
    Sse,
    #[serde(alias = "postmessage", alias = "frame")]
    PostMessage,
}

impl McpTransportKind {
    pub fn parse(hint: &str) -> McpResult<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "http-stream" | "streamable-http" | "streamable_http" | "http" => {
                Ok(McpTransportKind::HttpStream)
            }
            "sse" => Ok(McpTransportKind::Sse),
            "post-message" | "postmessage" | "frame" => Ok(McpTransportKind::PostMessage),
            other => Err(McpError::transport(format!(
                "Unsupported MCP transport: {other}"
            ))),
        }
    }

    /// Picks a transport from the target's shape when no hint is given.
    pub fn infer(target: &TransportTarget) -> Self {
        match target {
            TransportTarget::Frame(_) => McpTransportKind::PostMessage,
            TransportTarget::Url(url) => {
                let path = reqwest::Url::parse(url)
                    .map(|parsed| parsed.path().to_string())
                    .unwrap_or_else(|_| url.clone());
                if path.trim_end_matches('/').ends_with("/sse") {
                    McpTransportKind::Sse
                } else {
                    McpTransportKind::HttpStream
                }
            }
        }
    }
}

/// What a client connects to: a remote URL or an in-page frame.
#[derive(Clone)]
pub enum TransportTarget {
    Url(String),
    Frame(FrameHandle),
}

impl TransportTarget {
    pub fn describe(&self) -> String {
        match self {
            TransportTarget::Url(url) => url.clone(),
            TransportTarget::Frame(frame) => format!("frame:{}", frame.label()),
        }
    }
}

impl std::fmt::Debug for TransportTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A serialized JSON-RPC message plus the transport headers it should carry.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub body: String,
    pub request_id: Option<RequestId>,
    headers: Vec<(String, String)>,
}

impl OutgoingMessage {
    pub fn request(request_id: RequestId, body: String) -> Self {
        Self {
            body,
            request_id: Some(request_id),
            headers: Vec::new(),
        }
    }

    pub fn notification(body: String) -> Self {
        Self {
            body,
            request_id: None,
            headers: Vec::new(),
        }
    }

    /// Adds a header, replacing any previous value with the same name.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn expects_response(&self) -> bool {
        self.request_id.is_some()
    }
}

/// Transport contract shared by every channel.
#[async_trait]
pub trait McpTransport: Send + Sync {
    fn kind(&self) -> McpTransportKind;

    /// URL that outgoing messages are posted to, when the channel has one.
    fn endpoint(&self) -> Option<&str>;

    /// Sends one message. Requests resolve to the matching server response;
    /// notifications resolve to `None`.
    async fn send(&self, message: OutgoingMessage) -> McpResult<Option<ServerMessage>>;

    async fn close(&self) -> McpResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    pub http: HttpSettings,
    pub origin_policy: OriginPolicy,
}

pub fn build_http_client(settings: &HttpSettings) -> McpResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .timeout(Duration::from_secs(settings.request_timeout_secs))
        .pool_idle_timeout(Duration::from_secs(MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS))
        .pool_max_idle_per_host(MCP_HTTP_POOL_MAX_IDLE_PER_HOST)
        .build()
        .map_err(|err| McpError::transport(format!("Failed to build HTTP client: {err}")))
}

/// Opens the transport selected by `hint`, or inferred from `target`.
/// No retry is attempted here.
pub async fn open(
    target: TransportTarget,
    hint: Option<McpTransportKind>,
    options: &TransportOptions,
) -> McpResult<Box<dyn McpTransport>> {
    let kind = hint.unwrap_or_else(|| McpTransportKind::infer(&target));
    debug!(target = %target.describe(), kind = ?kind, "Opening MCP transport");
    match (kind, target) {
        (McpTransportKind::PostMessage, TransportTarget::Frame(frame)) => Ok(Box::new(
            PostMessageTransport::connect(frame, options.origin_policy.clone())?,
        )),
        (McpTransportKind::PostMessage, TransportTarget::Url(url)) => Err(McpError::transport(
            format!("The post-message transport needs an embedded frame target, got {url}."),
        )),
        (_, TransportTarget::Frame(frame)) => Err(McpError::transport(format!(
            "HTTP transports need a URL target, got frame '{}'.",
            frame.label()
        ))),
        (McpTransportKind::HttpStream, TransportTarget::Url(url)) => Ok(Box::new(
            StreamableHttpTransport::new(build_http_client(&options.http)?, url),
        )),
        (McpTransportKind::Sse, TransportTarget::Url(url)) => Ok(Box::new(
            SseTransport::connect(build_http_client(&options.http)?, url).await?,
        )),
    }
}

/// In-flight requests awaiting a reply from a push-style channel.
pub(crate) type PendingReplies = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;

/// Routes a response or error to the request waiting on its id.
pub(crate) async fn dispatch_reply(pending: &PendingReplies, message: ServerMessage) {
    let request_id = match &message {
        ServerMessage::Response(response) => Some(response.id.clone()),
        ServerMessage::Error(error) => error.id.clone(),
        ServerMessage::Request(_) | ServerMessage::Notification(_) => None,
    };
    let Some(request_id) = request_id else {
        debug!("Ignoring MCP server message without a reply id");
        return;
    };
    match pending.lock().await.remove(&request_id) {
        Some(tx) => {
            let _ = tx.send(message);
        }
        None => debug!(request_id = ?request_id, "Dropping unmatched MCP reply"),
    }
}

pub(crate) async fn await_reply(
    pending: &PendingReplies,
    request_id: &RequestId,
    rx: oneshot::Receiver<ServerMessage>,
    wait: Duration,
) -> McpResult<ServerMessage> {
    match tokio::time::timeout(wait, rx).await {
        Ok(Ok(message)) => Ok(message),
        Ok(Err(_)) => Err(McpError::transport(
            "Connection closed before the server replied.",
        )),
        Err(_) => {
            pending.lock().await.remove(request_id);
            debug!(request_id = ?request_id, timeout_secs = wait.as_secs(), "MCP request timed out");
            Err(McpError::transport("MCP request timed out."))
        }
    }
}

/// Returns true when a server reports the JSON-RPC method-not-found code.
pub fn is_method_not_found(message: &ServerMessage) -> bool {
    matches!(
        message,
        ServerMessage::Error(error) if error.error.code == MCP_METHOD_NOT_FOUND
    )
}
