//! x402 `X-PAYMENT` header construction.

use super::network::NetworkInfo;
use super::requirement::PaymentRequirement;
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::identity::WalletSigner;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const X402_VERSION: u32 = 1;

/// How far back `validAfter` is set to tolerate clock skew.
const VALID_AFTER_SKEW_SECS: i64 = 600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAuthorization {
    pub from: String,
    pub to: String,
    pub value: String,
    pub valid_after: String,
    pub valid_before: String,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactPayload {
    pub signature: String,
    pub authorization: TransferAuthorization,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
    pub payload: ExactPayload,
}

impl PaymentPayload {
    pub fn encode(&self) -> McpResult<String> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }

    pub fn decode(header: &str) -> McpResult<Self> {
        let bytes = STANDARD
            .decode(header.trim())
            .map_err(|err| McpError::protocol(format!("Invalid payment header encoding: {err}")))?;
        serde_json::from_slice(&bytes).map_err(McpError::from)
    }
}

/// 32 random bytes as `0x`-prefixed hex.
pub fn random_nonce() -> McpResult<String> {
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes)
        .map_err(|err| McpError::AuthSigning(format!("No randomness for payment nonce: {err}")))?;
    Ok(format!("0x{}", hex::encode(bytes)))
}

pub fn transfer_authorization(
    requirement: &PaymentRequirement,
    from: &str,
    now: DateTime<Utc>,
    nonce: String,
) -> TransferAuthorization {
    let now = now.timestamp();
    let timeout = i64::try_from(requirement.max_timeout_seconds).unwrap_or(i64::MAX);
    TransferAuthorization {
        from: from.to_string(),
        to: requirement.pay_to.clone(),
        value: requirement.max_amount_required.clone(),
        valid_after: (now - VALID_AFTER_SKEW_SECS).max(0).to_string(),
        valid_before: now.saturating_add(timeout).to_string(),
        nonce,
    }
}

/// EIP-712 `TransferWithAuthorization` typed data for `authorization`.
pub fn typed_data(
    requirement: &PaymentRequirement,
    network: &NetworkInfo,
    authorization: &TransferAuthorization,
) -> Value {
    let (name, version) = requirement.domain_name_and_version();
    json!({
        "types": {
            "EIP712Domain": [
                {"name": "name", "type": "string"},
                {"name": "version", "type": "string"},
                {"name": "chainId", "type": "uint256"},
                {"name": "verifyingContract", "type": "address"}
            ],
            "TransferWithAuthorization": [
                {"name": "from", "type": "address"},
                {"name": "to", "type": "address"},
                {"name": "value", "type": "uint256"},
                {"name": "validAfter", "type": "uint256"},
                {"name": "validBefore", "type": "uint256"},
                {"name": "nonce", "type": "bytes32"}
            ]
        },
        "primaryType": "TransferWithAuthorization",
        "domain": {
            "name": name,
            "version": version,
            "chainId": network.chain_id,
            "verifyingContract": requirement.asset,
        },
        "message": authorization,
    })
}

/// Signs a transfer authorization for an already validated requirement and
/// returns the encoded header value.
pub async fn build_payment_header(
    requirement: &PaymentRequirement,
    network: &NetworkInfo,
    wallet: &dyn WalletSigner,
    now: DateTime<Utc>,
) -> McpResult<String> {
    let authorization = transfer_authorization(requirement, wallet.address(), now, random_nonce()?);
    let signature = wallet
        .sign_typed_data(&typed_data(requirement, network, &authorization))
        .await
        .map_err(|err| match err {
            McpError::AuthSigning(_) => err,
            other => McpError::AuthSigning(other.to_string()),
        })?;

    PaymentPayload {
        x402_version: X402_VERSION,
        scheme: requirement.scheme.clone(),
        network: requirement.network.clone(),
        payload: ExactPayload {
            signature,
            authorization,
        },
    }
    .encode()
}
