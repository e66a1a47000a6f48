use super::amount::Uint256;
use super::network::check_address;
use crate::mcp::error::{McpError, McpResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// ERC-20 `balanceOf(address)` selector.
const BALANCE_OF_SELECTOR: &str = "0x70a08231";

/// Read-only on-chain capability.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn token_balance(&self, token: &str, account: &str) -> McpResult<Uint256>;
}

pub fn balance_of_call_data(account: &str) -> McpResult<String> {
    let digits = check_address(account)?;
    Ok(format!("{BALANCE_OF_SELECTOR}{:0>64}", digits.to_ascii_lowercase()))
}

/// Reads balances through an Ethereum JSON-RPC endpoint.
pub struct JsonRpcChainReader {
    client: reqwest::Client,
    rpc_url: String,
    next_id: AtomicU64,
}

impl JsonRpcChainReader {
    pub fn new(client: reqwest::Client, rpc_url: impl Into<String>) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }
}

#[async_trait]
impl ChainReader for JsonRpcChainReader {
    async fn token_balance(&self, token: &str, account: &str) -> McpResult<Uint256> {
        check_address(token)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "eth_call",
            "params": [
                {"to": token, "data": balance_of_call_data(account)?},
                "latest"
            ]
        });

        debug!(rpc_url = %self.rpc_url, token, account, "Querying token balance");
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("eth_call failed");
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
            return Err(McpError::transport_with_code(message, code, None));
        }
        let result = body
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::protocol("eth_call response is missing a result"))?;
        Uint256::from_hex(result)
            .map_err(|err| McpError::protocol(format!("Invalid balance '{result}': {err}")))
    }
}
