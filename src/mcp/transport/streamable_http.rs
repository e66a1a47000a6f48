use super::{
    McpTransport, McpTransportKind, OutgoingMessage, MCP_PROTOCOL_VERSION_HEADER,
    MCP_SESSION_ID_HEADER,
};
use crate::mcp::error::{McpError, McpResult};
use async_trait::async_trait;
use futures_util::StreamExt;
use rust_mcp_schema::schema_utils::ServerMessage;
use tokio::sync::RwLock;
use tracing::debug;

const MCP_JSON_CONTENT_TYPE: &str = "application/json";
const MCP_JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn is_named(&self, name: &str) -> bool {
        self.event.as_deref() == Some(name)
    }
}

/// Incremental event-stream decoder. Lines are split on `\n` (tolerating
/// `\r\n`), and a blank line dispatches the event collected so far.
#[derive(Default)]
pub struct SseEventBuffer {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseEventBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = memchr::memchr(b'\n', &self.buffer[search_index..]) {
            let newline_index = search_index + relative_pos;
            let mut line_end = newline_index;
            if line_end > search_index && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }
            let line = String::from_utf8_lossy(&self.buffer[search_index..line_end]).into_owned();
            if let Some(event) = self.accept_line(&line) {
                events.push(event);
            }
            search_index = newline_index + 1;
        }

        if search_index > 0 {
            self.buffer.drain(..search_index);
        }
        events
    }

    /// Flushes a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        if !rest.trim().is_empty() {
            let _ = self.accept_line(rest.trim_end_matches('\r'));
        }
        self.dispatch()
    }

    fn accept_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.trim().is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.trim().to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        let event = SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        };
        Some(event)
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

pub(crate) fn decode_server_message(payload: &str) -> McpResult<Option<ServerMessage>> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<ServerMessage>(payload)
        .map(Some)
        .map_err(|err| McpError::protocol(format!("Invalid server message: {err}")))
}

fn is_reply(message: &ServerMessage) -> bool {
    matches!(message, ServerMessage::Response(_) | ServerMessage::Error(_))
}

/// Reads an event-stream response until the first response or error message.
pub async fn next_sse_server_message(response: reqwest::Response) -> McpResult<ServerMessage> {
    let mut stream = response.bytes_stream();
    let mut buffer = SseEventBuffer::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for event in buffer.push(&chunk) {
            if let Some(message) = decode_server_message(&event.data)? {
                if is_reply(&message) {
                    return Ok(message);
                }
                debug!(message = ?message, "Ignoring interleaved MCP server message");
            }
        }
    }

    if let Some(event) = buffer.finish() {
        if let Some(message) = decode_server_message(&event.data)? {
            if is_reply(&message) {
                return Ok(message);
            }
        }
    }

    Err(McpError::protocol("Empty event-stream response."))
}

fn apply_post_headers(request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    request
        .header("Content-Type", MCP_JSON_CONTENT_TYPE)
        .header("Accept", MCP_JSON_AND_SSE_ACCEPT)
}

pub(crate) fn apply_message_headers(
    mut request: reqwest::RequestBuilder,
    message: &OutgoingMessage,
) -> reqwest::RequestBuilder {
    for (name, value) in message.headers() {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

pub(crate) fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// Streamable HTTP transport: every message is a POST to the endpoint, and
/// replies arrive as JSON or as a short event stream.
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    endpoint: String,
    session_id: RwLock<Option<String>>,
}

impl StreamableHttpTransport {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            session_id: RwLock::new(None),
        }
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    fn kind(&self) -> McpTransportKind {
        McpTransportKind::HttpStream
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.endpoint)
    }

    async fn send(&self, message: OutgoingMessage) -> McpResult<Option<ServerMessage>> {
        debug!(url = %self.endpoint, request_id = ?message.request_id, "Sending MCP HTTP message");
        let mut request = apply_message_headers(
            apply_post_headers(self.client.post(&self.endpoint)),
            &message,
        )
        .body(message.body.clone());
        if let Some(session_id) = self.session_id.read().await.as_ref() {
            request = request.header(MCP_SESSION_ID_HEADER, session_id);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::transport_with_code(
                format!("HTTP error: {status}"),
                i64::from(status.as_u16()),
                None,
            ));
        }

        if let Some(session_id) = header_value(&response, MCP_SESSION_ID_HEADER) {
            *self.session_id.write().await = Some(session_id);
        }

        if !message.expects_response() {
            return Ok(None);
        }

        let content_type =
            header_value(&response, reqwest::header::CONTENT_TYPE.as_str()).unwrap_or_default();
        let server_message = if is_event_stream_content_type(&content_type) {
            next_sse_server_message(response).await?
        } else {
            let body = response.bytes().await?;
            serde_json::from_slice::<ServerMessage>(&body)
                .map_err(|err| McpError::protocol(format!("Invalid server message: {err}")))?
        };
        Ok(Some(server_message))
    }

    async fn close(&self) -> McpResult<()> {
        let Some(session_id) = self.session_id.write().await.take() else {
            return Ok(());
        };
        debug!(url = %self.endpoint, "Terminating MCP HTTP session");
        let response = self
            .client
            .delete(&self.endpoint)
            .header(MCP_SESSION_ID_HEADER, session_id)
            .send()
            .await?;
        // Servers without explicit session termination answer 405.
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::METHOD_NOT_ALLOWED {
            Ok(())
        } else {
            Err(McpError::transport_with_code(
                format!("HTTP error: {status}"),
                i64::from(status.as_u16()),
                None,
            ))
        }
    }
}

/// Adds the negotiated protocol version header when one is known.
pub fn with_protocol_version(message: OutgoingMessage, version: Option<&str>) -> OutgoingMessage {
    match version {
        Some(version) if !version.trim().is_empty() => {
            message.with_header(MCP_PROTOCOL_VERSION_HEADER, version)
        }
        _ => message,
    }
}
