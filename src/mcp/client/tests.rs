use super::*;
use crate::mcp::transport::streamable_http::is_event_stream_content_type;
use crate::mcp::transport::{OriginPolicy, MCP_PROTOCOL_VERSION_HEADER};
use crate::mcp::types::CallAnnotation;
use crate::utils::test_utils::{
    disable_proxies, header, read_http_request, FakeMcpServer, FAKE_FRAME_ORIGIN,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

async fn frame_client(server: FakeMcpServer) -> (Arc<FakeMcpServer>, CanonicalClient) {
    let (server, frame) = server.attach("widget");
    let client = CanonicalClient::create(
        TransportTarget::Frame(frame),
        None,
        &TransportOptions::default(),
    )
    .await
    .expect("client should connect");
    (server, client)
}

#[tokio::test]
async fn create_runs_initialize_handshake() {
    let (server, client) = frame_client(FakeMcpServer::default()).await;

    assert_eq!(client.transport_kind(), McpTransportKind::PostMessage);
    assert_eq!(client.label(), "frame:widget");
    assert_eq!(client.protocol_version(), "2025-11-25");
    assert_eq!(
        server.methods(),
        vec!["initialize", "notifications/initialized"]
    );
}

#[tokio::test]
async fn tools_follow_cursors_across_pages() {
    let (server, client) = frame_client(
        FakeMcpServer::default()
            .with_tools(&["a", "b", "c", "d", "e"])
            .with_page_size(2),
    )
    .await;

    let tools = client.tools().await.expect("tools");
    let names: Vec<_> = tools.iter().map(|tool| tool.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
    let list_calls = server
        .methods()
        .into_iter()
        .filter(|method| method == "tools/list")
        .count();
    assert_eq!(list_calls, 3);
}

#[tokio::test]
async fn tools_are_capped() {
    let names: Vec<String> = (0..150).map(|index| format!("tool{index}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let (_server, client) =
        frame_client(FakeMcpServer::default().with_tools(&refs).with_page_size(60)).await;

    let tools = client.tools().await.expect("tools");
    assert_eq!(tools.len(), MCP_MAX_TOOL_LIST);
    assert_eq!(tools[99].name, "tool99");
}

#[tokio::test]
async fn missing_prompt_listing_yields_empty_list() {
    let (_server, client) = frame_client(FakeMcpServer::default().without_prompts()).await;

    assert!(client.prompts().await.expect("prompts").is_empty());
    assert!(client.prompt("greet").await.expect("prompt").is_none());
}

#[tokio::test]
async fn prompts_can_be_listed_and_rendered() {
    let (server, client) = frame_client(FakeMcpServer::default()).await;

    let prompt = client.prompt("greet").await.expect("prompt");
    assert_eq!(prompt.map(|prompt| prompt.name), Some("greet".to_string()));

    let rendered = client
        .get_prompt("greet", HashMap::from([("who".to_string(), "Ada".to_string())]))
        .await
        .expect("rendered prompt");
    let value = serde_json::to_value(&rendered).expect("serialize");
    assert_eq!(value["messages"][0]["content"]["text"], "Hello Ada");

    let get = server
        .requests()
        .into_iter()
        .find(|request| request["method"] == "prompts/get")
        .expect("prompts/get request");
    assert_eq!(get["params"]["arguments"]["who"], "Ada");
}

#[tokio::test]
async fn resource_templates_expand_before_reading() {
    let (server, client) = frame_client(FakeMcpServer::default()).await;

    let resources = client.resources().await.expect("resources");
    assert_eq!(resources[0].uri, "file:///notes.md");
    let templates = client.resource_templates().await.expect("templates");
    assert_eq!(templates[0].uri_template, "weather://{city}");

    let args = HashMap::from([("city".to_string(), "Lisbon".to_string())]);
    let read = client
        .read_resource_template("weather://{city}", &args)
        .await
        .expect("read");
    let value = serde_json::to_value(&read).expect("serialize");
    assert_eq!(value["contents"][0]["text"], "contents of weather://Lisbon");

    let last = server.requests().pop().expect("request");
    assert_eq!(last["method"], "resources/read");
    assert_eq!(last["params"]["uri"], "weather://Lisbon");
}

#[tokio::test]
async fn call_annotations_travel_in_meta() {
    let (server, client) = frame_client(FakeMcpServer::default().with_tools(&["echo"])).await;

    let request = ToolCallRequest::from_json("echo", json!({"q": "hi"}))
        .expect("request")
        .with_annotation(CallAnnotation::Payment("eyJ4NDAyIjoxfQ==".to_string()));
    let result = client.call_tool(request).await.expect("call");
    let value = serde_json::to_value(&result).expect("serialize");
    assert_eq!(value["content"][0]["text"], r#"echo:{"q":"hi"}"#);

    let call = server.requests().pop().expect("request");
    assert_eq!(call["params"]["name"], "echo");
    assert_eq!(call["params"]["arguments"], json!({"q": "hi"}));
    assert_eq!(call["params"]["_meta"]["x402/payment"], "eyJ4NDAyIjoxfQ==");
}

#[tokio::test]
async fn unannotated_calls_carry_no_meta() {
    let (server, client) = frame_client(FakeMcpServer::default().with_tools(&["echo"])).await;

    client
        .call_tool(ToolCallRequest::new("echo"))
        .await
        .expect("call");
    let call = server.requests().pop().expect("request");
    assert!(call["params"].get("_meta").is_none());
}

#[tokio::test]
async fn initialize_errors_are_typed_and_not_retried() {
    let (server, frame) = FakeMcpServer::default().failing_initialize().attach("broken");
    let err = CanonicalClient::create(
        TransportTarget::Frame(frame),
        Some(McpTransportKind::PostMessage),
        &TransportOptions {
            origin_policy: OriginPolicy::Exact(FAKE_FRAME_ORIGIN.to_string()),
            ..TransportOptions::default()
        },
    )
    .await
    .err()
    .expect("initialize should fail");

    assert_eq!(err.code(), Some(-32603));
    assert!(matches!(err, McpError::Transport { .. }));
    assert_eq!(server.methods(), vec!["initialize"]);
}

type CapturedHttpRequests = Arc<Mutex<Vec<(String, String, Option<String>, Option<String>)>>>;

#[tokio::test]
async fn streamable_http_session_lifecycle() {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    let captured: CapturedHttpRequests = Arc::new(Mutex::new(Vec::new()));
    let captured_for_server = Arc::clone(&captured);

    let server_task = tokio::spawn(async move {
        for _ in 0..4 {
            let (mut stream, _) = listener.accept().await.map_err(|err| err.to_string())?;
            let (request_line, headers, body) = read_http_request(&mut stream).await?;
            let method = if body.is_empty() {
                String::new()
            } else {
                let body_json: Value =
                    serde_json::from_slice(&body).map_err(|err| err.to_string())?;
                body_json["method"].as_str().unwrap_or_default().to_string()
            };
            captured_for_server.lock().await.push((
                request_line.clone(),
                method.clone(),
                header(&headers, "mcp-session-id").map(str::to_string),
                header(&headers, MCP_PROTOCOL_VERSION_HEADER).map(str::to_string),
            ));

            let response = if request_line.starts_with("DELETE") {
                "HTTP/1.1 200 OK\r\nconnection: close\r\ncontent-length: 0\r\n\r\n".to_string()
            } else if method == "initialize" {
                let body = json!({
                    "jsonrpc": "2.0",
                    "id": 0,
                    "result": {
                        "protocolVersion": "2025-06-18",
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "mock", "version": "0.1.0", "icons": []}
                    }
                })
                .to_string();
                format!(
                    "HTTP/1.1 200 OK\r\nconnection: close\r\ncontent-type: application/json\r\nmcp-session-id: s-1\r\ncontent-length: {}\r\n\r\n{}",
                    body.len(),
                    body
                )
            } else if method == "notifications/initialized" {
                "HTTP/1.1 202 Accepted\r\nconnection: close\r\ncontent-length: 0\r\n\r\n"
                    .to_string()
            } else {
                let event = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"tools\":[{\"name\":\"forecast\",\"inputSchema\":{\"type\":\"object\"}}]}}\n\n";
                format!(
                    "HTTP/1.1 200 OK\r\nconnection: close\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\n\r\n{}",
                    event.len(),
                    event
                )
            };
            stream
                .write_all(response.as_bytes())
                .await
                .map_err(|err| err.to_string())?;
        }
        Ok::<(), String>(())
    });

    disable_proxies();
    let client = CanonicalClient::create(
        TransportTarget::Url(format!("http://{addr}/mcp")),
        None,
        &TransportOptions::default(),
    )
    .await
    .expect("initialize should succeed");
    assert_eq!(client.transport_kind(), McpTransportKind::HttpStream);

    let tools = client.tools().await.expect("tools should list");
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "forecast");

    client.close().await.expect("close should succeed");
    server_task
        .await
        .expect("mock server task should join")
        .expect("mock server should succeed");

    let captured = captured.lock().await.clone();
    assert_eq!(captured[0].1, "initialize");
    assert_eq!(captured[0].2, None);
    assert_eq!(captured[0].3.as_deref(), Some(LATEST_PROTOCOL_VERSION));
    assert_eq!(captured[1].1, "notifications/initialized");
    assert_eq!(captured[1].2.as_deref(), Some("s-1"));
    assert_eq!(captured[1].3.as_deref(), Some("2025-06-18"));
    assert_eq!(captured[2].1, "tools/list");
    assert_eq!(captured[2].3.as_deref(), Some("2025-06-18"));
    assert!(captured[3].0.starts_with("DELETE /mcp"));
    assert_eq!(captured[3].2.as_deref(), Some("s-1"));
}

#[test]
fn event_stream_detection_ignores_parameters() {
    assert!(is_event_stream_content_type("Text/Event-Stream; charset=UTF-8"));
}
