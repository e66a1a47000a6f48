//! Request signing decorator for HTTP-backed transports.

use super::{McpTransport, McpTransportKind, OutgoingMessage};
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::identity::{IdentitySigner, RequestSigner};
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::ServerMessage;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub const SIGNED_AUTH_HEADER: &str = "Authorization";
pub const SIGNED_OPERATION: &str = "mcp-json-rpc";

/// Canonical payload covered by the signature of one request.
pub fn signing_payload(body: &str, url: &str) -> Value {
    json!({
        "operation": SIGNED_OPERATION,
        "params": {
            "body": body,
            "url": url,
        }
    })
}

/// Wraps a transport so that every outgoing message carries a fresh
/// signature over its exact body and target URL.
pub struct SignedTransport<T: McpTransport> {
    inner: T,
    url: String,
    signer: Arc<dyn RequestSigner>,
}

impl<T: McpTransport> SignedTransport<T> {
    /// Fetches the request signer once. Transports without an HTTP endpoint
    /// cannot be signed.
    pub async fn new(inner: T, identity: &dyn IdentitySigner) -> McpResult<Self> {
        let url = inner.endpoint().map(str::to_string).ok_or_else(|| {
            McpError::AuthSigning(format!(
                "{:?} transports have no HTTP endpoint to sign for.",
                inner.kind()
            ))
        })?;
        let signer = identity.request_signer().await.map_err(as_signing_error)?;
        Ok(Self { inner, url, signer })
    }
}

fn as_signing_error(err: McpError) -> McpError {
    match err {
        McpError::AuthSigning(_) => err,
        other => McpError::AuthSigning(other.to_string()),
    }
}

#[async_trait]
impl<T: McpTransport> McpTransport for SignedTransport<T> {
    fn kind(&self) -> McpTransportKind {
        self.inner.kind()
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.url)
    }

    async fn send(&self, message: OutgoingMessage) -> McpResult<Option<ServerMessage>> {
        let payload = signing_payload(&message.body, &self.url);
        let header = self
            .signer
            .sign_payload(&payload)
            .await
            .map_err(as_signing_error)?;
        debug!(url = %self.url, request_id = ?message.request_id, "Signed MCP request");
        self.inner
            .send(message.with_header(SIGNED_AUTH_HEADER, header))
            .await
    }

    async fn close(&self) -> McpResult<()> {
        self.inner.close().await
    }
}

#[async_trait]
impl McpTransport for Box<dyn McpTransport> {
    fn kind(&self) -> McpTransportKind {
        self.as_ref().kind()
    }

    fn endpoint(&self) -> Option<&str> {
        self.as_ref().endpoint()
    }

    async fn send(&self, message: OutgoingMessage) -> McpResult<Option<ServerMessage>> {
        self.as_ref().send(message).await
    }

    async fn close(&self) -> McpResult<()> {
        self.as_ref().close().await
    }
}
