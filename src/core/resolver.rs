//! Turns a cap into what a chat turn needs: the resolved prompt, the model
//! settings and the cap's aggregated tools.

use crate::core::cap::{Cap, ModelConfig};
use crate::core::config::ResolverSettings;
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::registry::AggregatedToolRegistry;
use crate::mcp::session::SessionManager;
use async_trait::async_trait;
use chrono::Local;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

pub const USER_GEO_PLACEHOLDER: &str = "{{user_geo}}";
pub const ARTIFACT_SELECTIONS_PLACEHOLDER: &str = "{{artifact_selections}}";
pub const NO_SELECTIONS: &str = "No selections from the user";

/// Best-effort description of where the user is.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn locate(&self) -> McpResult<String>;
}

/// Per-chat log of what the user picked in embedded UIs.
#[async_trait]
pub trait SelectionLog: Send + Sync {
    async fn selections(&self, chat_id: &str) -> Vec<String>;
}

#[derive(Default)]
pub struct InMemorySelectionLog {
    entries: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemorySelectionLog {
    pub fn record(&self, chat_id: &str, selection: impl Into<String>) {
        if let Ok(mut entries) = self.entries.write() {
            entries
                .entry(chat_id.to_string())
                .or_default()
                .push(selection.into());
        }
    }

    pub fn clear(&self, chat_id: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(chat_id);
        }
    }
}

#[async_trait]
impl SelectionLog for InMemorySelectionLog {
    async fn selections(&self, chat_id: &str) -> Vec<String> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(chat_id).cloned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    country_name: Option<String>,
}

/// Looks the user up through an ipapi-style JSON endpoint.
pub struct IpApiGeoLocator {
    client: reqwest::Client,
    endpoint: String,
}

impl IpApiGeoLocator {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl GeoLocator for IpApiGeoLocator {
    async fn locate(&self) -> McpResult<String> {
        let response: IpApiResponse = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let parts: Vec<String> = [response.city, response.region, response.country_name]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect();
        if parts.is_empty() {
            return Err(McpError::protocol("Geolocation response has no location fields"));
        }
        Ok(parts.join(", "))
    }
}

/// Region string derived from a UTC offset, e.g. `Approximate region: UTC+05:30`.
pub fn timezone_region(offset_seconds: i32) -> String {
    if offset_seconds == 0 {
        return "Approximate region: UTC".to_string();
    }
    let sign = if offset_seconds < 0 { '-' } else { '+' };
    let minutes = offset_seconds.unsigned_abs() / 60;
    format!(
        "Approximate region: UTC{sign}{:02}:{:02}",
        minutes / 60,
        minutes % 60
    )
}

fn local_timezone_region() -> String {
    timezone_region(Local::now().offset().local_minus_utc())
}

pub fn format_selections(selections: &[String]) -> String {
    if selections.is_empty() {
        NO_SELECTIONS.to_string()
    } else {
        selections.join("\n")
    }
}

/// Everything a chat turn is executed with.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnContext {
    pub prompt: String,
    pub model: ModelConfig,
    pub tools: AggregatedToolRegistry,
}

pub struct CapResolver {
    sessions: Arc<SessionManager>,
    geo: Arc<dyn GeoLocator>,
    selections: Arc<dyn SelectionLog>,
    geo_timeout: Duration,
}

impl CapResolver {
    pub fn new(
        sessions: Arc<SessionManager>,
        geo: Arc<dyn GeoLocator>,
        selections: Arc<dyn SelectionLog>,
        settings: &ResolverSettings,
    ) -> Self {
        Self {
            sessions,
            geo,
            selections,
            geo_timeout: settings.geo_timeout(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    async fn user_geo(&self) -> String {
        match tokio::time::timeout(self.geo_timeout, self.geo.locate()).await {
            Ok(Ok(location)) => location,
            Ok(Err(err)) => {
                warn!(error = %err, "Geolocation failed, using timezone");
                local_timezone_region()
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.geo_timeout.as_millis() as u64,
                    "Geolocation timed out, using timezone"
                );
                local_timezone_region()
            }
        }
    }

    /// Fills the known placeholders of `template`. Collaborators are only
    /// consulted for placeholders that actually occur.
    pub async fn resolve_prompt(&self, template: &str, chat_id: &str) -> String {
        let mut prompt = template.to_string();
        if prompt.contains(USER_GEO_PLACEHOLDER) {
            let geo = self.user_geo().await;
            prompt = prompt.replace(USER_GEO_PLACEHOLDER, &geo);
        }
        if prompt.contains(ARTIFACT_SELECTIONS_PLACEHOLDER) {
            let selections = self.selections.selections(chat_id).await;
            prompt = prompt.replace(
                ARTIFACT_SELECTIONS_PLACEHOLDER,
                &format_selections(&selections),
            );
        }
        prompt
    }

    /// Activates `cap` on the session manager and resolves its prompt. A cap
    /// without remote servers yields an empty registry.
    pub async fn resolve(&self, cap: &Cap, chat_id: &str) -> McpResult<TurnContext> {
        let tools = self.sessions.initialize_for_cap(cap).await?;
        let prompt = self.resolve_prompt(&cap.prompt_template, chat_id).await;
        debug!(cap = %cap.id, tools = tools.len(), "Resolved turn context");
        Ok(TurnContext {
            prompt,
            model: cap.model_config.clone(),
            tools,
        })
    }
}
