//! Signing capabilities consumed from the host.
//!
//! Key custody stays outside this crate: the host hands in an
//! [`IdentitySigner`] that produces request signers and, optionally, a
//! wallet-like signer for payment authorizations.

use crate::mcp::error::McpResult;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Signs canonical request payloads and returns a ready-to-send header value.
#[async_trait]
pub trait RequestSigner: Send + Sync {
    async fn sign_payload(&self, payload: &Value) -> McpResult<String>;
}

/// Signs EIP-712 typed data on behalf of an on-chain account.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Checksummed or lowercase `0x` address of the account.
    fn address(&self) -> &str;

    /// Returns the `0x`-prefixed signature over `typed_data`.
    async fn sign_typed_data(&self, typed_data: &Value) -> McpResult<String>;
}

/// Identity capability supplied by the embedding runtime.
#[async_trait]
pub trait IdentitySigner: Send + Sync {
    async fn request_signer(&self) -> McpResult<Arc<dyn RequestSigner>>;

    fn wallet(&self) -> Option<Arc<dyn WalletSigner>>;
}
