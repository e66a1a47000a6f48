use crate::mcp::error::{McpError, McpResult};
use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{CallToolResult, InitializeResult};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

pub(crate) fn parse_initialize_result(message: ServerMessage) -> McpResult<InitializeResult> {
    let result: InitializeResult = parse_response(message)?;
    if result.protocol_version.trim().is_empty() {
        return Err(McpError::protocol("Unexpected initialize response."));
    }
    Ok(result)
}

pub(crate) fn parse_response<T: serde::de::DeserializeOwned>(
    message: ServerMessage,
) -> McpResult<T> {
    let value = parse_response_value(message)?;
    serde_json::from_value::<T>(value).map_err(McpError::from)
}

pub(crate) fn parse_response_value(message: ServerMessage) -> McpResult<Value> {
    match message {
        ServerMessage::Response(response) => {
            serde_json::to_value(&response.result).map_err(McpError::from)
        }
        ServerMessage::Error(error) => Err(McpError::from_rpc_error(&error.error)),
        other => Err(McpError::protocol(format!(
            "Unexpected MCP server message: {other:?}"
        ))),
    }
}

/// Places `value` under `params._meta[key]` of a serialized request.
pub(crate) fn attach_meta(message: &mut Value, key: &str, value: &str) -> McpResult<()> {
    let params = message
        .as_object_mut()
        .ok_or_else(|| McpError::protocol("Request is not a JSON object."))?
        .entry("params")
        .or_insert_with(|| Value::Object(Map::new()));
    let params = params
        .as_object_mut()
        .ok_or_else(|| McpError::protocol("Request params are not a JSON object."))?;
    let meta = params
        .entry("_meta")
        .or_insert_with(|| Value::Object(Map::new()));
    let meta = meta
        .as_object_mut()
        .ok_or_else(|| McpError::protocol("Request _meta is not a JSON object."))?;
    meta.insert(key.to_string(), Value::String(value.to_string()));
    Ok(())
}

/// Builds a successful tool result carrying a single text block.
pub(crate) fn text_tool_result(text: impl Into<String>) -> McpResult<CallToolResult> {
    let value = json!({
        "content": [{"type": "text", "text": text.into()}],
        "isError": false,
    });
    serde_json::from_value(value).map_err(McpError::from)
}

/// Expands `{var}` and `{+var}` expressions. Simple expressions are
/// percent-encoded; reserved ones are inserted as given.
pub fn expand_uri_template(template: &str, args: &HashMap<String, String>) -> McpResult<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        output.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            McpError::protocol(format!("Unterminated expression in URI template {template}"))
        })?;
        let expression = &after[..end];
        let (reserved, name) = match expression.strip_prefix('+') {
            Some(name) => (true, name),
            None => (false, expression),
        };
        let name = name.trim();
        let value = args.get(name).ok_or_else(|| {
            McpError::protocol(format!(
                "Missing value for '{name}' in URI template {template}"
            ))
        })?;
        if reserved {
            output.push_str(value);
        } else {
            output.push_str(&urlencoding::encode(value));
        }
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}
