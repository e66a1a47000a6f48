use crate::mcp::error::{McpError, McpResult};
use crate::mcp::types::RemoteTool;
use std::collections::BTreeMap;

/// A remote tool stamped with the server it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedTool {
    pub key: String,
    pub server_name: String,
    pub original_name: String,
    pub tool: RemoteTool,
}

pub fn aggregated_key(server_name: &str, tool_name: &str) -> String {
    format!("{server_name}_{tool_name}")
}

/// Tools of every server in a cap, keyed `"{server}_{tool}"`. Built in one
/// piece and never updated afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedToolRegistry {
    tools: BTreeMap<String, AggregatedTool>,
}

impl AggregatedToolRegistry {
    /// Fails with [`McpError::CapInitialization`] naming the server whose
    /// tool would overwrite a key already taken by another server.
    pub fn build<I>(servers: I) -> McpResult<Self>
    where
        I: IntoIterator<Item = (String, Vec<RemoteTool>)>,
    {
        let mut tools = BTreeMap::new();
        for (server_name, server_tools) in servers {
            for tool in server_tools {
                let key = aggregated_key(&server_name, &tool.name);
                let entry = AggregatedTool {
                    key: key.clone(),
                    server_name: server_name.clone(),
                    original_name: tool.name.clone(),
                    tool,
                };
                if let Some(existing) = tools.insert(key.clone(), entry) {
                    let collision = McpError::protocol(format!(
                        "Tool key '{key}' is produced by both '{}' on server '{}' and another tool on server '{server_name}'",
                        existing.original_name, existing.server_name
                    ));
                    return Err(McpError::CapInitialization {
                        server: server_name,
                        source: Box::new(collision),
                    });
                }
            }
        }
        Ok(Self { tools })
    }

    pub fn get(&self, key: &str) -> Option<&AggregatedTool> {
        self.tools.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AggregatedTool> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
