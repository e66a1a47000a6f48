//! x402 payment gateway.
//!
//! [`PaymentGatewayClient`] wraps any [`ToolClient`] and adds two local
//! tools: one reports the wallet's stable-coin balance, the other validates
//! a payment requirement and signs a transfer authorization for it. Calls
//! that carry a `paymentAuthorization` argument have it moved into the
//! request `_meta` before they reach the remote server.

pub mod amount;
pub mod chain;
pub mod header;
pub mod network;
pub mod requirement;


use crate::core::config::PaymentSettings;
use crate::mcp::client::protocol::text_tool_result;
use crate::mcp::client::ToolClient;
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::identity::WalletSigner;
use crate::mcp::types::{CallAnnotation, RemoteTool, ToolCallRequest};
use amount::Uint256;
use async_trait::async_trait;
use chain::ChainReader;
use network::{network_info, NetworkInfo};
use requirement::PaymentRequirement;
use rust_mcp_schema::{CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use chain::JsonRpcChainReader;

pub const VIEW_BALANCE_TOOL: &str = "view-account-balance";
pub const GENERATE_PAYMENT_TOOL: &str = "generate-payment-authorization";
/// Tool argument carrying an encoded payment header.
pub const PAYMENT_AUTHORIZATION_FIELD: &str = "paymentAuthorization";
/// Argument of [`GENERATE_PAYMENT_TOOL`] holding the requirement object.
pub const PAYMENT_REQUIREMENTS_FIELD: &str = "paymentRequirements";

pub struct PaymentGatewayClient<C: ToolClient> {
    inner: C,
    network: &'static NetworkInfo,
    max_payment_value: Uint256,
    wallet: Arc<dyn WalletSigner>,
    chain: Arc<dyn ChainReader>,
}

impl<C: ToolClient> PaymentGatewayClient<C> {
    pub fn new(
        inner: C,
        settings: &PaymentSettings,
        wallet: Arc<dyn WalletSigner>,
        chain: Arc<dyn ChainReader>,
    ) -> McpResult<Self> {
        let (network, max_payment_value) = Self::check_settings(settings)?;
        Ok(Self {
            inner,
            network,
            max_payment_value,
            wallet,
            chain,
        })
    }

    /// Resolves the configured network and spending limit.
    pub fn check_settings(
        settings: &PaymentSettings,
    ) -> McpResult<(&'static NetworkInfo, Uint256)> {
        let network = network_info(&settings.network)?;
        let max_payment_value =
            Uint256::parse_decimal(&settings.max_payment_value).map_err(|err| {
                McpError::PaymentValidation(format!(
                    "invalid max_payment_value '{}': {err}",
                    settings.max_payment_value
                ))
            })?;
        Ok((network, max_payment_value))
    }

    pub fn network(&self) -> &NetworkInfo {
        self.network
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Balance of the wallet in the network's USDC, as a decimal string.
    pub async fn view_account_balance(&self) -> McpResult<Uint256> {
        self.chain
            .token_balance(self.network.usdc, self.wallet.address())
            .await
    }

    /// Validates `requirement` and returns the encoded `X-PAYMENT` value.
    /// Nothing is signed when validation fails.
    pub async fn generate_payment_authorization(&self, requirement: &Value) -> McpResult<String> {
        let requirement = PaymentRequirement::from_value(requirement)?;
        requirement.validate(self.network, &self.max_payment_value)?;
        let header = header::build_payment_header(
            &requirement,
            self.network,
            self.wallet.as_ref(),
            chrono::Utc::now(),
        )
        .await?;
        info!(
            network = self.network.name,
            resource = %requirement.resource,
            amount = %requirement.max_amount_required,
            "Generated payment authorization"
        );
        Ok(header)
    }

    async fn balance_result(&self) -> McpResult<CallToolResult> {
        let balance = self.view_account_balance().await?;
        let report = json!({
            "address": self.wallet.address(),
            "network": self.network.name,
            "asset": self.network.usdc,
            "balance": balance.as_str(),
        });
        text_tool_result(report.to_string())
    }

    async fn authorization_result(
        &self,
        arguments: Option<Map<String, Value>>,
    ) -> McpResult<CallToolResult> {
        let requirement = arguments
            .as_ref()
            .and_then(|arguments| arguments.get(PAYMENT_REQUIREMENTS_FIELD))
            .ok_or_else(|| {
                McpError::protocol(format!(
                    "{GENERATE_PAYMENT_TOOL} needs a '{PAYMENT_REQUIREMENTS_FIELD}' argument"
                ))
            })?;
        let header = self.generate_payment_authorization(requirement).await?;
        text_tool_result(header)
    }
}

fn synthetic_tools() -> Vec<RemoteTool> {
    vec![
        RemoteTool::new(
            VIEW_BALANCE_TOOL,
            "Show the payment wallet's stable-coin balance on the configured network.",
            json!({"type": "object", "properties": {}}),
        ),
        RemoteTool::new(
            GENERATE_PAYMENT_TOOL,
            "Sign an x402 payment authorization for a payment requirement returned by a paid tool. \
             Pass the result as the paymentAuthorization argument when retrying that tool.",
            json!({
                "type": "object",
                "properties": {
                    PAYMENT_REQUIREMENTS_FIELD: {
                        "type": "object",
                        "description": "The x402 payment requirement object."
                    }
                },
                "required": [PAYMENT_REQUIREMENTS_FIELD]
            }),
        ),
    ]
}

/// Adds the optional `paymentAuthorization` property to an input schema.
pub fn with_payment_property(mut schema: Value) -> Value {
    if !schema.is_object() {
        schema = json!({"type": "object"});
    }
    if let Some(object) = schema.as_object_mut() {
        let properties = object
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
        if !properties.is_object() {
            *properties = Value::Object(Map::new());
        }
        if let Some(properties) = properties.as_object_mut() {
            properties.insert(
                PAYMENT_AUTHORIZATION_FIELD.to_string(),
                json!({
                    "type": "string",
                    "description": "Payment authorization from generate-payment-authorization, for tools that require payment."
                }),
            );
        }
    }
    schema
}

fn is_synthetic(name: &str) -> bool {
    name == VIEW_BALANCE_TOOL || name == GENERATE_PAYMENT_TOOL
}

/// Moves `paymentAuthorization` out of the visible arguments and into the
/// call annotation. Requests without it are returned unchanged.
pub fn extract_payment_annotation(mut request: ToolCallRequest) -> McpResult<ToolCallRequest> {
    let Some(value) = request
        .arguments
        .as_mut()
        .and_then(|arguments| arguments.remove(PAYMENT_AUTHORIZATION_FIELD))
    else {
        return Ok(request);
    };
    match value {
        Value::String(header) => Ok(request.with_annotation(CallAnnotation::Payment(header))),
        other => Err(McpError::protocol(format!(
            "'{PAYMENT_AUTHORIZATION_FIELD}' must be a string, got {other}"
        ))),
    }
}

#[async_trait]
impl<C: ToolClient> ToolClient for PaymentGatewayClient<C> {
    async fn tools(&self) -> McpResult<Vec<RemoteTool>> {
        let mut tools = synthetic_tools();
        for mut tool in self.inner.tools().await? {
            if is_synthetic(&tool.name) {
                warn!(tool = %tool.name, "Remote tool shadowed by the payment gateway");
                continue;
            }
            tool.input_schema = with_payment_property(tool.input_schema);
            tools.push(tool);
        }
        Ok(tools)
    }

    async fn call_tool(&self, request: ToolCallRequest) -> McpResult<CallToolResult> {
        match request.name.as_str() {
            VIEW_BALANCE_TOOL => self.balance_result().await,
            GENERATE_PAYMENT_TOOL => self.authorization_result(request.arguments).await,
            _ => {
                let request = extract_payment_annotation(request)?;
                debug!(
                    tool = %request.name,
                    paid = request.annotation.is_some(),
                    "Forwarding tool call through payment gateway"
                );
                self.inner.call_tool(request).await
            }
        }
    }

    async fn close(&self) -> McpResult<()> {
        self.inner.close().await
    }

    async fn prompts(&self) -> McpResult<Vec<Prompt>> {
        self.inner.prompts().await
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> McpResult<GetPromptResult> {
        self.inner.get_prompt(name, arguments).await
    }

    async fn resources(&self) -> McpResult<Vec<Resource>> {
        self.inner.resources().await
    }

    async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        self.inner.read_resource(uri).await
    }
}
