#![cfg(test)]

use crate::mcp::client::protocol::text_tool_result;
use crate::mcp::client::ToolClient;
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::transport::{FrameChannel, FrameEnvelope, FrameHandle};
use crate::mcp::types::{RemoteTool, ToolCallRequest};
use async_trait::async_trait;
use rust_mcp_schema::CallToolResult;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc;

pub const FAKE_FRAME_ORIGIN: &str = "https://widget.example.com";

/// In-process MCP server reachable through the frame transport.
pub struct FakeMcpServer {
    tools: Vec<Value>,
    page_size: usize,
    prompts: Option<Vec<Value>>,
    resources: Vec<Value>,
    templates: Vec<Value>,
    fail_initialize: bool,
    requests: Mutex<Vec<Value>>,
    replies: OnceLock<mpsc::UnboundedSender<FrameEnvelope>>,
}

impl Default for FakeMcpServer {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            page_size: usize::MAX,
            prompts: Some(vec![json!({
                "name": "greet",
                "description": "Say hello",
                "arguments": [{"name": "who", "required": true}]
            })]),
            resources: vec![json!({"uri": "file:///notes.md", "name": "notes"})],
            templates: vec![json!({"uriTemplate": "weather://{city}", "name": "weather"})],
            fail_initialize: false,
            requests: Mutex::new(Vec::new()),
            replies: OnceLock::new(),
        }
    }
}

impl FakeMcpServer {
    pub fn with_tools(mut self, names: &[&str]) -> Self {
        self.tools = names
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "description": format!("{name} tool"),
                    "inputSchema": {
                        "type": "object",
                        "properties": {"q": {"type": "string"}}
                    }
                })
            })
            .collect();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn without_prompts(mut self) -> Self {
        self.prompts = None;
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn attach(self, label: &str) -> (Arc<Self>, FrameHandle) {
        let server = Arc::new(self);
        let (handle, tx) = FrameHandle::new(label, server.clone());
        let _ = server.replies.set(tx);
        (server, handle)
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|request| request.get("method").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    fn respond(&self, request: &Value) -> Option<Value> {
        let id = request.get("id")?.clone();
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        let result = match method {
            "initialize" if self.fail_initialize => {
                return Some(error_reply(id, -32603, "initialize exploded"));
            }
            "initialize" => json!({
                "protocolVersion": "2025-11-25",
                "capabilities": {"tools": {}, "prompts": {}, "resources": {}},
                "serverInfo": {"name": "fake", "version": "0.1.0", "icons": []}
            }),
            "tools/list" => {
                let offset = params
                    .get("cursor")
                    .and_then(Value::as_str)
                    .and_then(|cursor| cursor.parse::<usize>().ok())
                    .unwrap_or(0);
                let end = offset.saturating_add(self.page_size).min(self.tools.len());
                let mut page = json!({"tools": self.tools[offset.min(end)..end]});
                if end < self.tools.len() {
                    page["nextCursor"] = json!(end.to_string());
                }
                page
            }
            "prompts/list" => match &self.prompts {
                Some(prompts) => json!({"prompts": prompts}),
                None => return Some(error_reply(id, -32601, "Method not found")),
            },
            "prompts/get" => {
                let who = params["arguments"]["who"].as_str().unwrap_or("nobody");
                json!({
                    "description": "Say hello",
                    "messages": [{
                        "role": "user",
                        "content": {"type": "text", "text": format!("Hello {who}")}
                    }]
                })
            }
            "resources/list" => json!({"resources": self.resources}),
            "resources/templates/list" => json!({"resourceTemplates": self.templates}),
            "resources/read" => {
                let uri = params["uri"].as_str().unwrap_or_default();
                json!({"contents": [{"uri": uri, "text": format!("contents of {uri}")}]})
            }
            "tools/call" => {
                let name = params["name"].as_str().unwrap_or_default();
                let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
                json!({
                    "content": [{"type": "text", "text": format!("{name}:{arguments}")}],
                    "isError": false
                })
            }
            _ => return Some(error_reply(id, -32601, "Method not found")),
        };

        Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
    }
}

fn error_reply(id: Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

impl FrameChannel for FakeMcpServer {
    fn post(&self, message: Value, _target_origin: &str) -> McpResult<()> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(message.clone());
        if let (Some(reply), Some(replies)) = (self.respond(&message), self.replies.get()) {
            let _ = replies.send(FrameEnvelope {
                origin: FAKE_FRAME_ORIGIN.to_string(),
                data: reply,
            });
        }
        Ok(())
    }
}

/// Removes proxy variables so reqwest talks to local test servers directly.
pub fn disable_proxies() {
    for name in [
        "HTTP_PROXY",
        "http_proxy",
        "HTTPS_PROXY",
        "https_proxy",
        "ALL_PROXY",
        "all_proxy",
    ] {
        std::env::remove_var(name);
    }
    std::env::set_var("NO_PROXY", "*");
    std::env::set_var("no_proxy", "*");
}

/// Reads one HTTP/1.1 request (headers plus content-length body).
pub async fn read_http_request(
    stream: &mut tokio::net::TcpStream,
) -> Result<(String, Vec<(String, String)>, Vec<u8>), String> {
    use tokio::io::AsyncReadExt;

    let mut buffer = Vec::new();
    let mut header_end = None;
    while header_end.is_none() {
        let mut chunk = [0_u8; 1024];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|index| index + 4);
    }

    let header_end = header_end.expect("header end should exist");
    let header_text =
        std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "Missing HTTP request line".to_string())?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length - body.len()];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok((request_line, headers, body))
}

pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Tool client double that records calls and writes lifecycle events to a
/// shared log.
pub struct RecordingToolClient {
    label: String,
    tools: Vec<RemoteTool>,
    calls: Mutex<Vec<ToolCallRequest>>,
    fail_close: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingToolClient {
    pub fn new(label: &str, tools: &[&str], log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            label: label.to_string(),
            tools: tools
                .iter()
                .map(|name| {
                    RemoteTool::new(
                        *name,
                        format!("{name} tool"),
                        json!({"type": "object", "properties": {"city": {"type": "string"}}}),
                    )
                })
                .collect(),
            calls: Mutex::new(Vec::new()),
            fail_close: false,
            log,
        }
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn calls(&self) -> Vec<ToolCallRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolClient for RecordingToolClient {
    async fn tools(&self) -> McpResult<Vec<RemoteTool>> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, request: ToolCallRequest) -> McpResult<CallToolResult> {
        let text = format!("{}:{}", self.label, request.name);
        self.calls.lock().unwrap().push(request);
        text_tool_result(text)
    }

    async fn close(&self) -> McpResult<()> {
        self.log.lock().unwrap().push(format!("close:{}", self.label));
        if self.fail_close {
            return Err(McpError::transport(format!("{} refused to close", self.label)));
        }
        Ok(())
    }
}

/// Extracts the first text block of a tool result.
pub fn result_text(result: &CallToolResult) -> String {
    serde_json::to_value(result).unwrap()["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}
