//! Cross-frame transport for servers embedded in the host UI.
//!
//! The host owns the actual window objects. It hands in a [`FrameChannel`]
//! that posts JSON to the frame, and forwards every message the frame posts
//! back as a [`FrameEnvelope`] on the sender returned by [`FrameHandle::new`].

use super::{
    await_reply, dispatch_reply, McpTransport, McpTransportKind, OutgoingMessage, PendingReplies,
};
use crate::mcp::error::{McpError, McpResult};
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::ServerMessage;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long the first request waits for the frame to answer.
pub const FRAME_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const FRAME_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Host-provided sink that delivers a message into the embedded frame.
pub trait FrameChannel: Send + Sync {
    fn post(&self, message: Value, target_origin: &str) -> McpResult<()>;
}

/// A message posted by the frame, tagged with the origin it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEnvelope {
    pub origin: String,
    pub data: Value,
}

/// Which origins the transport talks to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OriginPolicy {
    #[default]
    Any,
    Exact(String),
}

impl OriginPolicy {
    pub fn target_origin(&self) -> &str {
        match self {
            OriginPolicy::Any => "*",
            OriginPolicy::Exact(origin) => origin,
        }
    }

    pub fn accepts(&self, origin: &str) -> bool {
        match self {
            OriginPolicy::Any => true,
            OriginPolicy::Exact(expected) => {
                expected.trim_end_matches('/') == origin.trim_end_matches('/')
            }
        }
    }
}

type InboundSlot = Arc<std::sync::Mutex<Option<mpsc::UnboundedReceiver<FrameEnvelope>>>>;

/// Reference to an embedded frame. The inbound side is held by at most one
/// transport at a time and handed back when that transport closes.
#[derive(Clone)]
pub struct FrameHandle {
    label: String,
    channel: Arc<dyn FrameChannel>,
    inbound: InboundSlot,
}

impl FrameHandle {
    pub fn new(
        label: impl Into<String>,
        channel: Arc<dyn FrameChannel>,
    ) -> (Self, mpsc::UnboundedSender<FrameEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            label: label.into(),
            channel,
            inbound: Arc::new(std::sync::Mutex::new(Some(rx))),
        };
        (handle, tx)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn take_inbound(&self) -> McpResult<mpsc::UnboundedReceiver<FrameEnvelope>> {
        let mut slot = self
            .inbound
            .lock()
            .map_err(|_| McpError::transport("Frame inbound channel lock poisoned."))?;
        slot.take().ok_or_else(|| {
            McpError::transport(format!(
                "Frame '{}' is already attached to a transport.",
                self.label
            ))
        })
    }

    fn restore_inbound(&self, inbound: mpsc::UnboundedReceiver<FrameEnvelope>) {
        if let Ok(mut slot) = self.inbound.lock() {
            *slot = Some(inbound);
        }
    }
}

pub struct PostMessageTransport {
    label: String,
    channel: Arc<dyn FrameChannel>,
    policy: OriginPolicy,
    pending: PendingReplies,
    cancel: CancellationToken,
    answered: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl PostMessageTransport {
    pub fn connect(frame: FrameHandle, policy: OriginPolicy) -> McpResult<Self> {
        let mut inbound = frame.take_inbound()?;
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let reader_pending = pending.clone();
        let reader_cancel = cancel.clone();
        let reader_policy = policy.clone();
        let reader_frame = frame.clone();
        let label = frame.label.clone();
        let reader = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    envelope = inbound.recv() => {
                        let Some(envelope) = envelope else {
                            break;
                        };
                        if !reader_policy.accepts(&envelope.origin) {
                            debug!(frame = %label, origin = %envelope.origin, "Ignoring frame message from foreign origin");
                            continue;
                        }
                        match serde_json::from_value::<ServerMessage>(envelope.data) {
                            Ok(message) => dispatch_reply(&reader_pending, message).await,
                            Err(err) => debug!(frame = %label, error = %err, "Ignoring non-MCP frame message"),
                        }
                    }
                }
            }
            reader_pending.lock().await.clear();
            reader_frame.restore_inbound(inbound);
        });

        Ok(Self {
            label: frame.label,
            channel: frame.channel,
            policy,
            pending,
            cancel,
            answered: AtomicBool::new(false),
            reader: Mutex::new(Some(reader)),
        })
    }

    fn response_timeout(&self) -> Duration {
        if self.answered.load(Ordering::SeqCst) {
            FRAME_RESPONSE_TIMEOUT
        } else {
            FRAME_CONNECT_TIMEOUT
        }
    }
}

#[async_trait]
impl McpTransport for PostMessageTransport {
    fn kind(&self) -> McpTransportKind {
        McpTransportKind::PostMessage
    }

    fn endpoint(&self) -> Option<&str> {
        None
    }

    async fn send(&self, message: OutgoingMessage) -> McpResult<Option<ServerMessage>> {
        if self.cancel.is_cancelled() {
            return Err(McpError::transport(format!(
                "Frame '{}' transport is closed.",
                self.label
            )));
        }
        let payload: Value = serde_json::from_str(&message.body)?;

        let waiter = match message.request_id.clone() {
            Some(request_id) => {
                let (tx, rx) = oneshot::channel();
                self.pending.lock().await.insert(request_id.clone(), tx);
                Some((request_id, rx))
            }
            None => None,
        };

        debug!(frame = %self.label, request_id = ?message.request_id, "Posting MCP frame message");
        if let Err(err) = self.channel.post(payload, self.policy.target_origin()) {
            if let Some((request_id, _)) = waiter.as_ref() {
                self.pending.lock().await.remove(request_id);
            }
            return Err(err);
        }

        let Some((request_id, rx)) = waiter else {
            return Ok(None);
        };
        let reply = await_reply(&self.pending, &request_id, rx, self.response_timeout()).await?;
        self.answered.store(true, Ordering::SeqCst);
        Ok(Some(reply))
    }

    /// Stops the reader and waits until the frame can be attached again.
    async fn close(&self) -> McpResult<()> {
        self.cancel.cancel();
        if let Some(reader) = self.reader.lock().await.take() {
            reader.await.map_err(|err| {
                McpError::transport(format!("Frame '{}' reader failed: {err}", self.label))
            })?;
        }
        Ok(())
    }
}

impl Drop for PostMessageTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_mcp_schema::RequestId;
    use serde_json::json;

    struct EchoFrame {
        origin: String,
        replies: std::sync::OnceLock<mpsc::UnboundedSender<FrameEnvelope>>,
        posted: std::sync::Mutex<Vec<(Value, String)>>,
    }

    impl FrameChannel for EchoFrame {
        fn post(&self, message: Value, target_origin: &str) -> McpResult<()> {
            self.posted
                .lock()
                .expect("posted lock")
                .push((message.clone(), target_origin.to_string()));
            if let (Some(id), Some(replies)) = (message.get("id"), self.replies.get()) {
                let _ = replies.send(FrameEnvelope {
                    origin: self.origin.clone(),
                    data: json!({"jsonrpc": "2.0", "id": id, "result": {"ok": true}}),
                });
            }
            Ok(())
        }
    }

    fn echo_frame(origin: &str) -> (FrameHandle, Arc<EchoFrame>) {
        let channel = Arc::new(EchoFrame {
            origin: origin.to_string(),
            replies: std::sync::OnceLock::new(),
            posted: std::sync::Mutex::new(Vec::new()),
        });
        let (handle, tx) = FrameHandle::new("widget", channel.clone());
        let _ = channel.replies.set(tx);
        (handle, channel)
    }

    fn request(id: i64) -> OutgoingMessage {
        OutgoingMessage::request(
            RequestId::Integer(id),
            json!({"jsonrpc": "2.0", "id": id, "method": "ping"}).to_string(),
        )
    }

    #[test]
    fn origin_policy_matches_exact_origins() {
        let policy = OriginPolicy::Exact("https://app.example.com".to_string());
        assert!(policy.accepts("https://app.example.com/"));
        assert!(!policy.accepts("https://evil.example.com"));
        assert_eq!(policy.target_origin(), "https://app.example.com");
        assert!(OriginPolicy::Any.accepts("null"));
        assert_eq!(OriginPolicy::Any.target_origin(), "*");
    }

    #[tokio::test]
    async fn round_trips_requests_through_the_frame() {
        let (handle, channel) = echo_frame("https://widget.example.com");
        let transport = PostMessageTransport::connect(handle, OriginPolicy::Any).unwrap();

        let reply = transport.send(request(1)).await.expect("reply");
        assert!(matches!(reply, Some(ServerMessage::Response(_))));
        let posted = channel.posted.lock().expect("posted lock").clone();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].1, "*");
    }

    #[tokio::test]
    async fn frame_is_attached_to_one_transport_at_a_time() {
        let (handle, channel) = echo_frame("https://widget.example.com");
        let first = PostMessageTransport::connect(handle.clone(), OriginPolicy::Any).unwrap();
        let err = PostMessageTransport::connect(handle.clone(), OriginPolicy::Any)
            .err()
            .expect("second attach should fail");
        assert!(err.to_string().contains("already attached"));

        first.close().await.unwrap();
        let second = PostMessageTransport::connect(handle, OriginPolicy::Any).unwrap();
        let reply = second.send(request(3)).await.unwrap();
        assert!(matches!(reply, Some(ServerMessage::Response(_))));
        assert_eq!(channel.posted.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_origin_replies_are_ignored_until_timeout() {
        let (handle, _channel) = echo_frame("https://evil.example.com");
        let transport = PostMessageTransport::connect(
            handle,
            OriginPolicy::Exact("https://widget.example.com".to_string()),
        )
        .unwrap();

        let err = transport.send(request(7)).await.err().expect("timeout");
        assert_eq!(err.to_string(), "MCP transport error: MCP request timed out.");
    }

    #[tokio::test]
    async fn closed_transport_rejects_sends() {
        let (handle, _channel) = echo_frame("https://widget.example.com");
        let transport = PostMessageTransport::connect(handle, OriginPolicy::Any).unwrap();
        transport.close().await.unwrap();
        assert!(transport.send(request(2)).await.is_err());
    }
}
