//! Live tool sessions for the active cap.
//!
//! The [`SessionManager`] keeps at most one session set open. Activating a
//! different cap closes every session of the previous one before any new
//! connection is attempted, and a cap whose servers cannot all be reached
//! leaves nothing open behind it.

mod connector;

#[cfg(test)]
mod tests;

pub use connector::{PaymentContext, RemoteConnector, FRAME_URL_PREFIX};

use crate::core::cap::{Cap, RemoteServerDescriptor};
use crate::mcp::client::ToolClient;
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::registry::AggregatedToolRegistry;
use crate::mcp::types::{RemoteTool, ToolCallRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use rust_mcp_schema::{CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const MCP_STARTUP_CONCURRENCY_LIMIT: usize = 3;

/// Opens one client for a cap's server entry.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    async fn connect(
        &self,
        server_name: &str,
        descriptor: &RemoteServerDescriptor,
    ) -> McpResult<Arc<dyn ToolClient>>;
}

/// One open server connection and what it advertised when it was opened.
pub struct ClientSession {
    pub server_name: String,
    pub client: Arc<dyn ToolClient>,
    pub tools: Vec<RemoteTool>,
    pub prompts: Vec<Prompt>,
    pub resources: Vec<Resource>,
    pub connected_at: DateTime<Utc>,
}

/// A prompt advertised by one server of the active cap.
#[derive(Debug, Clone)]
pub struct ServerPrompt {
    pub server_name: String,
    pub prompt: Prompt,
}

/// A resource advertised by one server of the active cap.
#[derive(Debug, Clone)]
pub struct ServerResource {
    pub server_name: String,
    pub resource: Resource,
}

/// Outcome of closing a session set.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub closed: Vec<String>,
    pub failures: Vec<(String, McpError)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct ActiveCap {
    cap_id: String,
    sessions: BTreeMap<String, ClientSession>,
    registry: AggregatedToolRegistry,
}

pub struct SessionManager {
    connector: Arc<dyn ClientConnector>,
    // Serializes activation and cleanup across caps.
    state: Mutex<Option<ActiveCap>>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn ClientConnector>) -> Self {
        Self {
            connector,
            state: Mutex::new(None),
        }
    }

    pub async fn active_cap_id(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|active| active.cap_id.clone())
    }

    /// Returns the tool registry for `cap`, opening its sessions on first
    /// use. Repeated calls for the active cap return the cached registry.
    pub async fn initialize_for_cap(&self, cap: &Cap) -> McpResult<AggregatedToolRegistry> {
        let mut state = self.state.lock().await;

        if let Some(active) = state.as_ref() {
            if active.cap_id == cap.id {
                debug!(cap = %cap.id, "Reusing active cap sessions");
                return Ok(active.registry.clone());
            }
        }

        if let Some(previous) = state.take() {
            info!(from = %previous.cap_id, to = %cap.id, "Switching active cap");
            close_sessions(previous.sessions).await;
        }

        let sessions = self.open_sessions(cap).await?;
        let registry = match AggregatedToolRegistry::build(
            sessions
                .values()
                .map(|session| (session.server_name.clone(), session.tools.clone())),
        ) {
            Ok(registry) => registry,
            Err(err) => {
                warn!(cap = %cap.id, error = %err, "Cap tools cannot be aggregated");
                close_sessions(sessions).await;
                return Err(err);
            }
        };

        info!(
            cap = %cap.id,
            servers = sessions.len(),
            tools = registry.len(),
            "Cap sessions initialized"
        );
        *state = Some(ActiveCap {
            cap_id: cap.id.clone(),
            sessions,
            registry: registry.clone(),
        });
        Ok(registry)
    }

    /// Opens every server of `cap`. After the first failure no new
    /// connection is started, but the ones already in flight are awaited so
    /// that each session they produce is closed again.
    async fn open_sessions(&self, cap: &Cap) -> McpResult<BTreeMap<String, ClientSession>> {
        let mut opened = BTreeMap::new();
        let mut failure = None;
        let aborted = AtomicBool::new(false);

        let mut pending = stream::iter(cap.remote_servers.iter())
            .map(|(name, descriptor)| {
                let connector = Arc::clone(&self.connector);
                let aborted = &aborted;
                async move {
                    if aborted.load(Ordering::SeqCst) {
                        return None;
                    }
                    Some(open_session(connector.as_ref(), name, descriptor).await)
                }
            })
            .buffer_unordered(MCP_STARTUP_CONCURRENCY_LIMIT);

        while let Some(result) = pending.next().await {
            match result {
                Some(Ok(session)) => {
                    opened.insert(session.server_name.clone(), session);
                }
                Some(Err(err)) => {
                    aborted.store(true, Ordering::SeqCst);
                    if failure.is_none() {
                        failure = Some(err);
                    } else {
                        debug!(cap = %cap.id, error = %err, "Further cap server failure");
                    }
                }
                None => {}
            }
        }
        drop(pending);

        match failure {
            None => Ok(opened),
            Some(err) => {
                warn!(cap = %cap.id, error = %err, "Cap initialization failed");
                close_sessions(opened).await;
                Err(err)
            }
        }
    }

    /// Routes an aggregated tool key to the server that owns it.
    pub async fn call_tool(&self, request: ToolCallRequest) -> McpResult<CallToolResult> {
        let (client, original_name) = {
            let state = self.state.lock().await;
            let active = state
                .as_ref()
                .ok_or_else(|| McpError::protocol("No cap is active."))?;
            let tool = active.registry.get(&request.name).ok_or_else(|| {
                McpError::protocol(format!("Unknown tool '{}'.", request.name))
            })?;
            let session = active.sessions.get(&tool.server_name).ok_or_else(|| {
                McpError::protocol(format!("No session for server '{}'.", tool.server_name))
            })?;
            (Arc::clone(&session.client), tool.original_name.clone())
        };

        client
            .call_tool(ToolCallRequest {
                name: original_name,
                ..request
            })
            .await
    }

    /// Prompts of every open session, ordered by server name.
    pub async fn prompts(&self) -> Vec<ServerPrompt> {
        let state = self.state.lock().await;
        let Some(active) = state.as_ref() else {
            return Vec::new();
        };
        active
            .sessions
            .values()
            .flat_map(|session| {
                session.prompts.iter().map(|prompt| ServerPrompt {
                    server_name: session.server_name.clone(),
                    prompt: prompt.clone(),
                })
            })
            .collect()
    }

    /// Resources of every open session, ordered by server name.
    pub async fn resources(&self) -> Vec<ServerResource> {
        let state = self.state.lock().await;
        let Some(active) = state.as_ref() else {
            return Vec::new();
        };
        active
            .sessions
            .values()
            .flat_map(|session| {
                session.resources.iter().map(|resource| ServerResource {
                    server_name: session.server_name.clone(),
                    resource: resource.clone(),
                })
            })
            .collect()
    }

    pub async fn get_prompt(
        &self,
        server_name: &str,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> McpResult<GetPromptResult> {
        let client = self
            .advertising_client(server_name, |session| {
                session.prompts.iter().any(|prompt| prompt.name == name)
            })
            .await?
            .ok_or_else(|| {
                McpError::protocol(format!(
                    "Server '{server_name}' does not advertise prompt '{name}'."
                ))
            })?;
        client.get_prompt(name, arguments).await
    }

    pub async fn read_resource(
        &self,
        server_name: &str,
        uri: &str,
    ) -> McpResult<ReadResourceResult> {
        let client = self
            .advertising_client(server_name, |session| {
                session.resources.iter().any(|resource| resource.uri == uri)
            })
            .await?
            .ok_or_else(|| {
                McpError::protocol(format!(
                    "Server '{server_name}' does not advertise resource '{uri}'."
                ))
            })?;
        client.read_resource(uri).await
    }

    /// Client of `server_name`, or `None` when its session does not pass
    /// `advertises`.
    async fn advertising_client(
        &self,
        server_name: &str,
        advertises: impl Fn(&ClientSession) -> bool,
    ) -> McpResult<Option<Arc<dyn ToolClient>>> {
        let state = self.state.lock().await;
        let active = state
            .as_ref()
            .ok_or_else(|| McpError::protocol("No cap is active."))?;
        let session = active.sessions.get(server_name).ok_or_else(|| {
            McpError::protocol(format!("No session for server '{server_name}'."))
        })?;
        Ok(advertises(session).then(|| Arc::clone(&session.client)))
    }

    /// Closes every open session. State is cleared even when some close
    /// calls fail.
    pub async fn cleanup(&self) -> CleanupReport {
        let active = self.state.lock().await.take();
        match active {
            Some(active) => {
                info!(cap = %active.cap_id, "Closing cap sessions");
                close_sessions(active.sessions).await
            }
            None => CleanupReport::default(),
        }
    }
}

async fn open_session(
    connector: &dyn ClientConnector,
    name: &str,
    descriptor: &RemoteServerDescriptor,
) -> McpResult<ClientSession> {
    let wrap = |source: McpError| McpError::CapInitialization {
        server: name.to_string(),
        source: Box::new(source),
    };

    let client = connector.connect(name, descriptor).await.map_err(wrap)?;
    match list_capabilities(client.as_ref()).await {
        Ok((tools, prompts, resources)) => Ok(ClientSession {
            server_name: name.to_string(),
            client,
            tools,
            prompts,
            resources,
            connected_at: Utc::now(),
        }),
        Err(err) => {
            if let Err(close_err) = client.close().await {
                debug!(
                    server = %name,
                    error = %close_err,
                    "Closing MCP session after failed listing"
                );
            }
            Err(wrap(err))
        }
    }
}

async fn list_capabilities(
    client: &dyn ToolClient,
) -> McpResult<(Vec<RemoteTool>, Vec<Prompt>, Vec<Resource>)> {
    let tools = client.tools().await?;
    let prompts = client.prompts().await?;
    let resources = client.resources().await?;
    Ok((tools, prompts, resources))
}

async fn close_sessions(sessions: BTreeMap<String, ClientSession>) -> CleanupReport {
    let mut report = CleanupReport::default();
    for (name, session) in sessions {
        match session.client.close().await {
            Ok(()) => report.closed.push(name),
            Err(err) => {
                warn!(server = %name, error = %err, "Failed to close MCP session");
                report.failures.push((name, err));
            }
        }
    }
    report
}
