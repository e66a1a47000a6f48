use super::ClientConnector;
use crate::core::cap::{AuthMode, RemoteServerDescriptor};
use crate::core::config::{Config, PaymentSettings};
use crate::mcp::client::{CanonicalClient, ToolClient};
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::identity::{IdentitySigner, WalletSigner};
use crate::mcp::payment::chain::{ChainReader, JsonRpcChainReader};
use crate::mcp::payment::network::network_info;
use crate::mcp::payment::PaymentGatewayClient;
use crate::mcp::transport::{
    self, build_http_client, FrameHandle, SignedTransport, TransportOptions, TransportTarget,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Prefix of descriptor URLs that name a registered in-page frame.
pub const FRAME_URL_PREFIX: &str = "frame:";

/// Everything the payment gateway needs besides the client it wraps.
#[derive(Clone)]
pub struct PaymentContext {
    pub settings: PaymentSettings,
    pub wallet: Arc<dyn WalletSigner>,
    pub chain: Arc<dyn ChainReader>,
}

impl PaymentContext {
    /// Reads balances through the configured RPC URL, or the network's
    /// public endpoint when none is set.
    pub fn with_rpc_reader(
        settings: PaymentSettings,
        wallet: Arc<dyn WalletSigner>,
        client: reqwest::Client,
    ) -> McpResult<Self> {
        let rpc_url = match &settings.rpc_url {
            Some(url) => url.clone(),
            None => network_info(&settings.network)?.default_rpc_url.to_string(),
        };
        Ok(Self {
            settings,
            wallet,
            chain: Arc::new(JsonRpcChainReader::new(client, rpc_url)),
        })
    }
}

/// Builds canonical clients and wraps them per the descriptor's auth mode.
pub struct RemoteConnector {
    options: TransportOptions,
    identity: Option<Arc<dyn IdentitySigner>>,
    payment: Option<PaymentContext>,
    frames: RwLock<HashMap<String, FrameHandle>>,
}

impl RemoteConnector {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            identity: None,
            payment: None,
            frames: RwLock::new(HashMap::new()),
        }
    }

    /// Connector for `config`. A host identity that carries a wallet also
    /// enables payment-gated servers, with balances read over JSON-RPC.
    pub fn from_config(
        config: &Config,
        identity: Option<Arc<dyn IdentitySigner>>,
    ) -> McpResult<Self> {
        let connector = Self::new(TransportOptions {
            http: config.http.clone(),
            ..TransportOptions::default()
        });
        let Some(identity) = identity else {
            return Ok(connector);
        };

        let connector = match identity.wallet() {
            Some(wallet) => {
                let http = build_http_client(&config.http)?;
                connector.with_payment(PaymentContext::with_rpc_reader(
                    config.payment.clone(),
                    wallet,
                    http,
                )?)
            }
            None => connector,
        };
        Ok(connector.with_identity(identity))
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentitySigner>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_payment(mut self, payment: PaymentContext) -> Self {
        self.payment = Some(payment);
        self
    }

    /// Makes `frame` reachable from descriptors whose URL is `frame:<name>`.
    pub fn register_frame(&self, name: impl Into<String>, frame: FrameHandle) -> McpResult<()> {
        self.frames
            .write()
            .map_err(|_| McpError::transport("Frame registry lock poisoned."))?
            .insert(name.into(), frame);
        Ok(())
    }

    fn target_for(&self, url: &str) -> McpResult<TransportTarget> {
        let Some(name) = url.strip_prefix(FRAME_URL_PREFIX) else {
            return Ok(TransportTarget::Url(url.to_string()));
        };
        let frames = self
            .frames
            .read()
            .map_err(|_| McpError::transport("Frame registry lock poisoned."))?;
        frames
            .get(name)
            .cloned()
            .map(TransportTarget::Frame)
            .ok_or_else(|| McpError::transport(format!("No embedded frame named '{name}'.")))
    }

    async fn connect_signed(
        &self,
        target: TransportTarget,
        descriptor: &RemoteServerDescriptor,
    ) -> McpResult<CanonicalClient> {
        let identity = self.identity.as_ref().ok_or_else(|| {
            McpError::AuthSigning(
                "No identity signer is available for a signed server.".to_string(),
            )
        })?;
        let label = target.describe();
        let inner = transport::open(target, descriptor.transport, &self.options).await?;
        let signed = SignedTransport::new(inner, identity.as_ref()).await?;
        CanonicalClient::connect(label, Box::new(signed)).await
    }

    async fn connect_payment_gated(
        &self,
        target: TransportTarget,
        descriptor: &RemoteServerDescriptor,
    ) -> McpResult<Arc<dyn ToolClient>> {
        let payment = self.payment.clone().ok_or_else(|| {
            McpError::PaymentValidation("No payment wallet is configured.".to_string())
        })?;
        PaymentGatewayClient::<CanonicalClient>::check_settings(&payment.settings)?;
        let client = CanonicalClient::create(target, descriptor.transport, &self.options).await?;
        let gateway =
            PaymentGatewayClient::new(client, &payment.settings, payment.wallet, payment.chain)?;
        Ok(Arc::new(gateway))
    }
}

#[async_trait]
impl ClientConnector for RemoteConnector {
    async fn connect(
        &self,
        server_name: &str,
        descriptor: &RemoteServerDescriptor,
    ) -> McpResult<Arc<dyn ToolClient>> {
        let target = self.target_for(&descriptor.url)?;
        debug!(
            server = %server_name,
            target = ?target,
            auth = ?descriptor.auth,
            "Connecting MCP server"
        );
        match descriptor.auth {
            AuthMode::None => Ok(Arc::new(
                CanonicalClient::create(target, descriptor.transport, &self.options).await?,
            )),
            AuthMode::Signed => Ok(Arc::new(self.connect_signed(target, descriptor).await?)),
            AuthMode::PaymentGated => self.connect_payment_gated(target, descriptor).await,
        }
    }
}
