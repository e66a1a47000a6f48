//! Legacy HTTP+SSE transport.
//!
//! The client holds one long-lived GET event stream. The server announces a
//! POST endpoint through an `endpoint` event, and replies to posted requests
//! arrive as `message` events on the stream.

use super::streamable_http::{
    apply_message_headers, decode_server_message, is_event_stream_content_type, SseEvent,
    SseEventBuffer,
};
use super::{
    await_reply, dispatch_reply, McpTransport, McpTransportKind, OutgoingMessage, PendingReplies,
};
use crate::mcp::error::{McpError, McpResult};
use async_trait::async_trait;
use futures_util::StreamExt;
use rust_mcp_schema::schema_utils::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SSE_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);
const SSE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);
const SSE_ENDPOINT_EVENT: &str = "endpoint";
const SSE_MESSAGE_EVENT: &str = "message";

pub struct SseTransport {
    client: reqwest::Client,
    endpoint: String,
    pending: PendingReplies,
    cancel: CancellationToken,
}

impl SseTransport {
    pub async fn connect(client: reqwest::Client, stream_url: String) -> McpResult<Self> {
        debug!(url = %stream_url, "Opening MCP SSE stream");
        let response = client
            .get(&stream_url)
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::transport_with_code(
                format!("HTTP error: {status}"),
                i64::from(status.as_u16()),
                None,
            ));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !is_event_stream_content_type(content_type) {
            return Err(McpError::transport(format!(
                "{stream_url} did not answer with an event stream."
            )));
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut buffer = SseEventBuffer::default();
        let mut backlog = Vec::new();

        let announced = tokio::time::timeout(SSE_ENDPOINT_TIMEOUT, async {
            while let Some(chunk) = stream.next().await {
                let mut endpoint = None;
                for event in buffer.push(&chunk?) {
                    if endpoint.is_none() && event.is_named(SSE_ENDPOINT_EVENT) {
                        endpoint = Some(event.data);
                    } else {
                        backlog.push(event);
                    }
                }
                if endpoint.is_some() {
                    return Ok(endpoint);
                }
            }
            Ok::<_, McpError>(None)
        })
        .await
        .map_err(|_| McpError::transport("Timed out waiting for the SSE endpoint event."))??;

        let announced = announced.ok_or_else(|| {
            McpError::transport("SSE stream ended before announcing an endpoint.")
        })?;
        let endpoint = resolve_endpoint(&stream_url, &announced)?;
        debug!(url = %stream_url, endpoint = %endpoint, "MCP SSE endpoint announced");

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let reader_pending = pending.clone();
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            for event in backlog {
                dispatch_event(&reader_pending, event).await;
            }
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    chunk = stream.next() => match chunk {
                        Some(Ok(chunk)) => {
                            for event in buffer.push(&chunk) {
                                dispatch_event(&reader_pending, event).await;
                            }
                        }
                        Some(Err(err)) => {
                            debug!(error = %err, "MCP SSE stream failed");
                            break;
                        }
                        None => break,
                    }
                }
            }
            if let Some(event) = buffer.finish() {
                dispatch_event(&reader_pending, event).await;
            }
            reader_pending.lock().await.clear();
        });

        Ok(Self {
            client,
            endpoint,
            pending,
            cancel,
        })
    }
}

fn resolve_endpoint(stream_url: &str, announced: &str) -> McpResult<String> {
    let base = reqwest::Url::parse(stream_url)
        .map_err(|err| McpError::transport(format!("Invalid SSE URL {stream_url}: {err}")))?;
    base.join(announced.trim())
        .map(|url| url.to_string())
        .map_err(|err| McpError::transport(format!("Invalid SSE endpoint {announced}: {err}")))
}

async fn dispatch_event(pending: &PendingReplies, event: SseEvent) {
    let is_message = event
        .event
        .as_deref()
        .is_none_or(|name| name == SSE_MESSAGE_EVENT);
    if !is_message {
        return;
    }
    match decode_server_message(&event.data) {
        Ok(Some(message)) => dispatch_reply(pending, message).await,
        Ok(None) => {}
        Err(err) => debug!(error = %err, "Skipping malformed MCP SSE event"),
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    fn kind(&self) -> McpTransportKind {
        McpTransportKind::Sse
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.endpoint)
    }

    async fn send(&self, message: OutgoingMessage) -> McpResult<Option<ServerMessage>> {
        if self.cancel.is_cancelled() {
            return Err(McpError::transport("MCP SSE transport is closed."));
        }

        let waiter = match message.request_id.clone() {
            Some(request_id) => {
                let (tx, rx) = oneshot::channel();
                self.pending.lock().await.insert(request_id.clone(), tx);
                Some((request_id, rx))
            }
            None => None,
        };

        let request = apply_message_headers(
            self.client
                .post(&self.endpoint)
                .header("Content-Type", "application/json"),
            &message,
        )
        .body(message.body);
        let sent = request.send().await;
        let failure = match sent {
            Ok(response) if response.status().is_success() => None,
            Ok(response) => {
                let status = response.status();
                Some(McpError::transport_with_code(
                    format!("HTTP error: {status}"),
                    i64::from(status.as_u16()),
                    None,
                ))
            }
            Err(err) => Some(McpError::from(err)),
        };
        if let Some(err) = failure {
            if let Some((request_id, _)) = waiter.as_ref() {
                self.pending.lock().await.remove(request_id);
            }
            return Err(err);
        }

        match waiter {
            Some((request_id, rx)) => {
                await_reply(&self.pending, &request_id, rx, SSE_RESPONSE_TIMEOUT)
                    .await
                    .map(Some)
            }
            None => Ok(None),
        }
    }

    async fn close(&self) -> McpResult<()> {
        self.cancel.cancel();
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
