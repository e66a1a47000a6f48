//! Canonical MCP client.
//!
//! A [`CanonicalClient`] owns one transport and exposes the same surface
//! whatever channel sits underneath: initialization, paginated listings,
//! prompt and resource reads, and tool calls.

use crate::mcp::error::{McpError, McpResult};
use crate::mcp::transport::streamable_http::with_protocol_version;
use crate::mcp::transport::{
    self, is_method_not_found, McpTransport, McpTransportKind, OutgoingMessage, TransportOptions,
    TransportTarget,
};
use crate::mcp::types::{RemoteTool, ToolCallRequest};
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{
    CallToolRequestParams, CallToolResult, ClientCapabilities, GetPromptRequestParams,
    GetPromptResult, Implementation, InitializeRequestParams, InitializeResult,
    PaginatedRequestParams, Prompt, ReadResourceRequestParams, ReadResourceResult, RequestId,
    Resource, ResourceTemplate, ServerCapabilities, LATEST_PROTOCOL_VERSION,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, info};

pub(crate) mod protocol;

#[cfg(test)]
mod tests;

pub use protocol::expand_uri_template;
use protocol::{attach_meta, parse_initialize_result, parse_response, parse_response_value};

pub const MCP_MAX_TOOL_LIST: usize = 100;
const MCP_MAX_LIST_PAGES: usize = 20;

/// Tool-facing surface shared by the canonical client and its decorators.
#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn tools(&self) -> McpResult<Vec<RemoteTool>>;

    async fn call_tool(&self, request: ToolCallRequest) -> McpResult<CallToolResult>;

    async fn close(&self) -> McpResult<()>;

    async fn prompts(&self) -> McpResult<Vec<Prompt>> {
        Ok(Vec::new())
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: HashMap<String, String>,
    ) -> McpResult<GetPromptResult> {
        Err(McpError::protocol(format!("Prompt '{name}' is not served here.")))
    }

    async fn resources(&self) -> McpResult<Vec<Resource>> {
        Ok(Vec::new())
    }

    async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        Err(McpError::protocol(format!("Resource '{uri}' is not served here.")))
    }
}

pub struct CanonicalClient {
    label: String,
    transport: Box<dyn McpTransport>,
    next_request_id: AtomicI64,
    server_details: Option<InitializeResult>,
}

impl CanonicalClient {
    /// Opens a transport for `target` and runs the initialize handshake.
    pub async fn create(
        target: TransportTarget,
        hint: Option<McpTransportKind>,
        options: &TransportOptions,
    ) -> McpResult<Self> {
        let label = target.describe();
        let transport = transport::open(target, hint, options).await?;
        Self::connect(label, transport).await
    }

    /// Runs the initialize handshake over an already opened transport. The
    /// transport is closed again when the handshake fails.
    pub async fn connect(
        label: impl Into<String>,
        transport: Box<dyn McpTransport>,
    ) -> McpResult<Self> {
        let mut client = Self {
            label: label.into(),
            transport,
            next_request_id: AtomicI64::new(0),
            server_details: None,
        };

        match client.initialize().await {
            Ok(()) => {
                info!(
                    server = %client.label,
                    transport = ?client.transport.kind(),
                    protocol_version = %client.protocol_version(),
                    "MCP client connected"
                );
                Ok(client)
            }
            Err(err) => {
                if let Err(close_err) = client.transport.close().await {
                    debug!(server = %client.label, error = %close_err, "Closing failed MCP transport");
                }
                Err(err)
            }
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn transport_kind(&self) -> McpTransportKind {
        self.transport.kind()
    }

    pub fn server_details(&self) -> Option<&InitializeResult> {
        self.server_details.as_ref()
    }

    pub fn protocol_version(&self) -> &str {
        self.server_details
            .as_ref()
            .map(|details| details.protocol_version.as_str())
            .unwrap_or(LATEST_PROTOCOL_VERSION)
    }

    fn server_capabilities(&self) -> Option<&ServerCapabilities> {
        self.server_details
            .as_ref()
            .map(|details| &details.capabilities)
    }

    fn supports_tools(&self) -> bool {
        self.server_capabilities()
            .map(|caps| caps.tools.is_some())
            .unwrap_or(true)
    }

    fn supports_resources(&self) -> bool {
        self.server_capabilities()
            .map(|caps| caps.resources.is_some())
            .unwrap_or(true)
    }

    fn supports_prompts(&self) -> bool {
        self.server_capabilities()
            .map(|caps| caps.prompts.is_some())
            .unwrap_or(true)
    }

    /// Stores the negotiated details before `initialized` goes out, so the
    /// notification already carries the negotiated protocol version.
    async fn initialize(&mut self) -> McpResult<()> {
        let response = self
            .request(RequestFromClient::InitializeRequest(client_details()), None)
            .await?;
        self.server_details = Some(parse_initialize_result(response)?);
        self.notify(NotificationFromClient::InitializedNotification(None))
            .await
    }

    async fn request(
        &self,
        request: RequestFromClient,
        meta: Option<(&str, &str)>,
    ) -> McpResult<ServerMessage> {
        let request_id = RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst));
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id.clone()),
        )
        .map_err(|err| McpError::protocol(err.to_string()))?;
        let mut body = serde_json::to_value(&message)?;
        if let Some((key, value)) = meta {
            attach_meta(&mut body, key, value)?;
        }

        debug!(server = %self.label, request_id = ?request_id, "Sending MCP request");
        let outgoing = with_protocol_version(
            OutgoingMessage::request(request_id.clone(), body.to_string()),
            Some(self.protocol_version()),
        );
        self.transport.send(outgoing).await?.ok_or_else(|| {
            McpError::protocol(format!("No reply to MCP request {request_id:?}."))
        })
    }

    async fn notify(&self, notification: NotificationFromClient) -> McpResult<()> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| McpError::protocol(err.to_string()))?;
        let body = serde_json::to_string(&message)?;
        let outgoing = with_protocol_version(
            OutgoingMessage::notification(body),
            Some(self.protocol_version()),
        );
        self.transport.send(outgoing).await.map(|_| ())
    }

    /// Follows `nextCursor` until the listing ends, `limit` items are
    /// collected, or the page budget runs out. Servers that do not implement
    /// the method yield an empty list.
    async fn list_all<T: DeserializeOwned>(
        &self,
        field: &str,
        limit: usize,
        build: impl Fn(Option<PaginatedRequestParams>) -> RequestFromClient,
    ) -> McpResult<Vec<T>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MCP_MAX_LIST_PAGES {
            let params = cursor.clone().map(|cursor| PaginatedRequestParams {
                cursor: Some(cursor),
                meta: None,
            });
            let response = self.request(build(params), None).await?;
            if is_method_not_found(&response) {
                debug!(server = %self.label, field, "MCP server does not implement listing");
                return Ok(items);
            }
            let (page, next_cursor) = take_page::<T>(parse_response_value(response)?, field)?;
            items.extend(page);
            if items.len() >= limit {
                items.truncate(limit);
                break;
            }
            match next_cursor {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next)
                }
                _ => break,
            }
        }

        Ok(items)
    }

    pub async fn tools(&self) -> McpResult<Vec<RemoteTool>> {
        if !self.supports_tools() {
            return Ok(Vec::new());
        }
        self.list_all("tools", MCP_MAX_TOOL_LIST, RequestFromClient::ListToolsRequest)
            .await
    }

    pub async fn prompts(&self) -> McpResult<Vec<Prompt>> {
        if !self.supports_prompts() {
            return Ok(Vec::new());
        }
        self.list_all("prompts", usize::MAX, RequestFromClient::ListPromptsRequest)
            .await
    }

    /// Looks up one advertised prompt by name.
    pub async fn prompt(&self, name: &str) -> McpResult<Option<Prompt>> {
        Ok(self
            .prompts()
            .await?
            .into_iter()
            .find(|prompt| prompt.name == name))
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> McpResult<GetPromptResult> {
        let params = GetPromptRequestParams {
            name: name.to_string(),
            arguments: (!arguments.is_empty()).then_some(arguments),
            meta: None,
        };
        let response = self
            .request(RequestFromClient::GetPromptRequest(params), None)
            .await?;
        parse_response(response)
    }

    pub async fn resources(&self) -> McpResult<Vec<Resource>> {
        if !self.supports_resources() {
            return Ok(Vec::new());
        }
        self.list_all("resources", usize::MAX, RequestFromClient::ListResourcesRequest)
            .await
    }

    pub async fn resource_templates(&self) -> McpResult<Vec<ResourceTemplate>> {
        if !self.supports_resources() {
            return Ok(Vec::new());
        }
        self.list_all(
            "resourceTemplates",
            usize::MAX,
            RequestFromClient::ListResourceTemplatesRequest,
        )
        .await
    }

    pub async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        let params = ReadResourceRequestParams {
            meta: None,
            uri: uri.to_string(),
        };
        let response = self
            .request(RequestFromClient::ReadResourceRequest(params), None)
            .await?;
        parse_response(response)
    }

    pub async fn read_resource_template(
        &self,
        uri_template: &str,
        arguments: &HashMap<String, String>,
    ) -> McpResult<ReadResourceResult> {
        let uri = expand_uri_template(uri_template, arguments)?;
        self.read_resource(&uri).await
    }

    pub async fn call_tool(&self, request: ToolCallRequest) -> McpResult<CallToolResult> {
        let mut params = CallToolRequestParams::new(&request.name);
        if let Some(arguments) = request.arguments {
            params = params.with_arguments(arguments);
        }
        let meta = request
            .annotation
            .as_ref()
            .map(|annotation| (annotation.meta_key(), annotation.value()));
        debug!(server = %self.label, tool = %request.name, annotated = meta.is_some(), "Calling MCP tool");
        let response = self
            .request(RequestFromClient::CallToolRequest(params), meta)
            .await?;
        parse_response(response)
    }

    pub async fn close(&self) -> McpResult<()> {
        debug!(server = %self.label, "Closing MCP client");
        self.transport.close().await
    }
}

#[async_trait]
impl ToolClient for CanonicalClient {
    async fn tools(&self) -> McpResult<Vec<RemoteTool>> {
        CanonicalClient::tools(self).await
    }

    async fn call_tool(&self, request: ToolCallRequest) -> McpResult<CallToolResult> {
        CanonicalClient::call_tool(self, request).await
    }

    async fn close(&self) -> McpResult<()> {
        CanonicalClient::close(self).await
    }

    async fn prompts(&self) -> McpResult<Vec<Prompt>> {
        CanonicalClient::prompts(self).await
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> McpResult<GetPromptResult> {
        CanonicalClient::get_prompt(self, name, arguments).await
    }

    async fn resources(&self) -> McpResult<Vec<Resource>> {
        CanonicalClient::resources(self).await
    }

    async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        CanonicalClient::read_resource(self, uri).await
    }
}

#[async_trait]
impl<T: ToolClient + ?Sized> ToolClient for std::sync::Arc<T> {
    async fn tools(&self) -> McpResult<Vec<RemoteTool>> {
        (**self).tools().await
    }

    async fn call_tool(&self, request: ToolCallRequest) -> McpResult<CallToolResult> {
        (**self).call_tool(request).await
    }

    async fn close(&self) -> McpResult<()> {
        (**self).close().await
    }

    async fn prompts(&self) -> McpResult<Vec<Prompt>> {
        (**self).prompts().await
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> McpResult<GetPromptResult> {
        (**self).get_prompt(name, arguments).await
    }

    async fn resources(&self) -> McpResult<Vec<Resource>> {
        (**self).resources().await
    }

    async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        (**self).read_resource(uri).await
    }
}

fn client_details() -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "capdeck".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Capdeck MCP Client".to_string()),
            description: Some("Cap runtime MCP client".to_string()),
            icons: Vec::new(),
            website_url: None,
        },
        meta: None,
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    }
}

fn take_page<T: DeserializeOwned>(
    mut value: Value,
    field: &str,
) -> McpResult<(Vec<T>, Option<String>)> {
    let items = match value.get_mut(field).map(Value::take) {
        Some(Value::Null) | None => Vec::new(),
        Some(items) => serde_json::from_value::<Vec<T>>(items)?,
    };
    let next_cursor = value
        .get("nextCursor")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok((items, next_cursor))
}
