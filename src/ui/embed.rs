//! Pushes stream output and theme changes into an embedding UI frame.
//!
//! Messages are JSON-RPC notifications delivered over the same
//! [`FrameChannel`] the cross-frame transport uses.

use crate::core::resumable_stream::StreamMessage;
use crate::mcp::error::McpResult;
use crate::mcp::transport::{FrameChannel, OriginPolicy};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub const PUSH_STREAM_CHUNK: &str = "pushStreamChunk";
pub const COMPLETE_STREAM: &str = "completeStream";
pub const ERROR_STREAM: &str = "errorStream";
pub const UPDATE_THEME: &str = "updateTheme";

pub struct EmbedBridge {
    channel: Arc<dyn FrameChannel>,
    policy: OriginPolicy,
}

impl EmbedBridge {
    pub fn new(channel: Arc<dyn FrameChannel>, policy: OriginPolicy) -> Self {
        Self { channel, policy }
    }

    fn notify(&self, method: &str, params: Value) -> McpResult<()> {
        debug!(method, "Posting embed notification");
        self.channel.post(
            json!({"jsonrpc": "2.0", "method": method, "params": params}),
            self.policy.target_origin(),
        )
    }

    pub fn push_stream_chunk(&self, stream_id: &str, chunk: &str) -> McpResult<()> {
        self.notify(
            PUSH_STREAM_CHUNK,
            json!({"streamId": stream_id, "chunk": chunk}),
        )
    }

    pub fn complete_stream(&self, stream_id: &str) -> McpResult<()> {
        self.notify(COMPLETE_STREAM, json!({"streamId": stream_id}))
    }

    pub fn error_stream(&self, stream_id: &str, error: &str) -> McpResult<()> {
        self.notify(ERROR_STREAM, json!({"streamId": stream_id, "error": error}))
    }

    pub fn update_theme(&self, theme: Value) -> McpResult<()> {
        self.notify(UPDATE_THEME, json!({"theme": theme}))
    }

    /// Relays a stream's messages until it ends or fails.
    pub async fn forward(
        &self,
        stream_id: &str,
        mut messages: mpsc::UnboundedReceiver<StreamMessage>,
    ) -> McpResult<()> {
        while let Some(message) = messages.recv().await {
            match message {
                StreamMessage::Chunk(chunk) => self.push_stream_chunk(stream_id, &chunk)?,
                StreamMessage::End => return self.complete_stream(stream_id),
                StreamMessage::Error(error) => return self.error_stream(stream_id, &error),
            }
        }
        Ok(())
    }
}
