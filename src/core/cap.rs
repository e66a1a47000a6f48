//! Cap descriptors: a persona prompt, its model settings and the remote
//! tool servers it pulls in.

use crate::core::config::io::read_file;
use crate::core::config::ConfigError;
use crate::mcp::transport::McpTransportKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    #[default]
    None,
    Signed,
    #[serde(alias = "payment_gated", alias = "paymentGated")]
    PaymentGated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DescriptorRepr")]
pub struct RemoteServerDescriptor {
    pub url: String,
    pub transport: Option<McpTransportKind>,
    pub auth: AuthMode,
}

impl RemoteServerDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            transport: None,
            auth: AuthMode::None,
        }
    }

    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_transport(mut self, transport: McpTransportKind) -> Self {
        self.transport = Some(transport);
        self
    }
}

/// Descriptors are written either as a bare URL or as a table.
#[derive(Deserialize)]
#[serde(untagged)]
enum DescriptorRepr {
    Url(String),
    Full {
        url: String,
        #[serde(default, alias = "transportHint")]
        transport: Option<McpTransportKind>,
        #[serde(default, alias = "authMode", alias = "auth_mode")]
        auth: AuthMode,
    },
}

impl From<DescriptorRepr> for RemoteServerDescriptor {
    fn from(repr: DescriptorRepr) -> Self {
        match repr {
            DescriptorRepr::Url(url) => Self::new(url),
            DescriptorRepr::Full {
                url,
                transport,
                auth,
            } => Self {
                url,
                transport,
                auth,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "max_tokens")]
    pub max_tokens: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cap {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "prompt_template")]
    pub prompt_template: String,
    #[serde(default, alias = "model_config")]
    pub model_config: ModelConfig,
    #[serde(default, alias = "mcpServers", alias = "mcp_servers", alias = "remote_servers")]
    pub remote_servers: BTreeMap<String, RemoteServerDescriptor>,
}

impl Cap {
    pub fn new(id: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt_template: prompt_template.into(),
            model_config: ModelConfig::default(),
            remote_servers: BTreeMap::new(),
        }
    }

    pub fn with_server(mut self, name: impl Into<String>, server: RemoteServerDescriptor) -> Self {
        self.remote_servers.insert(name.into(), server);
        self
    }

    pub fn has_remote_servers(&self) -> bool {
        !self.remote_servers.is_empty()
    }

    /// Loads a cap from a `.json` or `.toml` file. A missing `id` falls back
    /// to the file stem.
    pub fn load_from_path(path: &Path) -> Result<Cap, ConfigError> {
        let contents = read_file(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let mut cap: Cap = if is_json {
            serde_json::from_str(&contents).map_err(|source| ConfigError::ParseJson {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };

        if cap.id.trim().is_empty() {
            cap.id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
                .to_string();
        }
        if cap.id.is_empty() {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: "cap has no id".to_string(),
            });
        }
        if let Some((name, _)) = cap
            .remote_servers
            .iter()
            .find(|(_, server)| server.url.trim().is_empty())
        {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: format!("server '{name}' has no url"),
            });
        }
        Ok(cap)
    }
}
