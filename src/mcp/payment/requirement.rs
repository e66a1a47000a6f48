use super::amount::Uint256;
use super::network::NetworkInfo;
use crate::mcp::error::{McpError, McpResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const EXACT_SCHEME: &str = "exact";

/// An x402 payment requirement as published by a paid resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    pub scheme: String,
    pub network: String,
    pub max_amount_required: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// JSON Schema describing a well-formed requirement object.
pub fn requirement_schema() -> Value {
    json!({
        "type": "object",
        "required": [
            "scheme", "network", "maxAmountRequired", "resource",
            "payTo", "maxTimeoutSeconds", "asset"
        ],
        "properties": {
            "scheme": {"type": "string"},
            "network": {"type": "string"},
            "maxAmountRequired": {"type": "string", "pattern": "^[0-9]+$"},
            "resource": {"type": "string", "minLength": 1},
            "description": {"type": "string"},
            "mimeType": {"type": "string"},
            "payTo": {"type": "string", "pattern": "^0x[0-9a-fA-F]{40}$"},
            "maxTimeoutSeconds": {"type": "integer", "minimum": 0},
            "asset": {"type": "string", "pattern": "^0x[0-9a-fA-F]{40}$"},
            "outputSchema": {"type": ["object", "null"]},
            "extra": {"type": ["object", "null"]}
        }
    })
}

impl PaymentRequirement {
    /// Checks `value` against [`requirement_schema`] and deserializes it.
    pub fn from_value(value: &Value) -> McpResult<Self> {
        let schema = requirement_schema();
        let validator = jsonschema::validator_for(&schema)
            .map_err(|err| McpError::protocol(format!("Invalid requirement schema: {err}")))?;
        if !validator.is_valid(value) {
            let errors: Vec<String> = validator
                .iter_errors(value)
                .map(|err| err.to_string())
                .collect();
            return Err(McpError::protocol(format!(
                "Malformed payment requirement: {}",
                errors.join("; ")
            )));
        }
        serde_json::from_value(value.clone()).map_err(McpError::from)
    }

    pub fn amount(&self) -> McpResult<Uint256> {
        Uint256::parse_decimal(&self.max_amount_required).map_err(|err| {
            McpError::protocol(format!(
                "Invalid maxAmountRequired '{}': {err}",
                self.max_amount_required
            ))
        })
    }

    /// Applies the scheme, network and amount limits.
    pub fn validate(&self, network: &NetworkInfo, max_payment_value: &Uint256) -> McpResult<()> {
        if self.scheme != EXACT_SCHEME {
            return Err(McpError::PaymentValidation(format!(
                "unsupported scheme '{}', only '{EXACT_SCHEME}' is accepted",
                self.scheme
            )));
        }
        if self.network != network.name {
            return Err(McpError::PaymentValidation(format!(
                "requirement is for network '{}' but the wallet is configured for '{}'",
                self.network, network.name
            )));
        }
        let amount = self.amount()?;
        if amount > *max_payment_value {
            return Err(McpError::PaymentValidation(format!(
                "requested amount {amount} exceeds the limit of {max_payment_value}"
            )));
        }
        Ok(())
    }

    /// EIP-712 domain name and version, from `extra` or the USDC defaults.
    pub fn domain_name_and_version(&self) -> (String, String) {
        let field = |key: &str, fallback: &str| {
            self.extra
                .as_ref()
                .and_then(|extra| extra.get(key))
                .and_then(Value::as_str)
                .unwrap_or(fallback)
                .to_string()
        };
        (field("name", "USD Coin"), field("version", "2"))
    }
}

#[cfg(test)]
pub(crate) fn sample_requirement_value() -> Value {
    json!({
        "scheme": "exact",
        "network": "base-sepolia",
        "maxAmountRequired": "10000",
        "resource": "https://api.example.com/premium",
        "description": "Premium forecast",
        "mimeType": "application/json",
        "payTo": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
        "maxTimeoutSeconds": 60,
        "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
        "extra": {"name": "USDC", "version": "2"}
    })
}
