use super::*;
use crate::core::cap::RemoteServerDescriptor;
use crate::mcp::transport::{FrameHandle, TransportOptions};
use crate::utils::test_utils::{result_text, FakeMcpServer, RecordingToolClient};
use std::collections::HashMap;
use std::time::Duration;

type EventLog = Arc<std::sync::Mutex<Vec<String>>>;

/// Connector double: each server name maps to a tool list, or to `None` to
/// make the connection fail.
struct FakeConnector {
    servers: HashMap<String, Option<Vec<&'static str>>>,
    failing_close: Vec<String>,
    delays: HashMap<String, Duration>,
    log: EventLog,
    clients: std::sync::Mutex<HashMap<String, Arc<RecordingToolClient>>>,
}

impl FakeConnector {
    fn new(servers: &[(&str, Option<Vec<&'static str>>)]) -> Self {
        Self {
            servers: servers
                .iter()
                .map(|(name, tools)| (name.to_string(), tools.clone()))
                .collect(),
            failing_close: Vec::new(),
            delays: HashMap::new(),
            log: Arc::new(std::sync::Mutex::new(Vec::new())),
            clients: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn failing_close(mut self, name: &str) -> Self {
        self.failing_close.push(name.to_string());
        self
    }

    /// Holds the connection to `name` open for `delay` before it resolves.
    fn delayed(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn client(&self, name: &str) -> Arc<RecordingToolClient> {
        Arc::clone(&self.clients.lock().unwrap()[name])
    }
}

#[async_trait]
impl ClientConnector for FakeConnector {
    async fn connect(
        &self,
        server_name: &str,
        _descriptor: &RemoteServerDescriptor,
    ) -> McpResult<Arc<dyn ToolClient>> {
        self.log.lock().unwrap().push(format!("open:{server_name}"));
        if let Some(delay) = self.delays.get(server_name) {
            tokio::time::sleep(*delay).await;
        }
        let Some(Some(tools)) = self.servers.get(server_name) else {
            return Err(McpError::transport("connection refused"));
        };
        let mut client = RecordingToolClient::new(server_name, tools, Arc::clone(&self.log));
        if self.failing_close.iter().any(|name| name == server_name) {
            client = client.failing_close();
        }
        let client = Arc::new(client);
        self.clients
            .lock()
            .unwrap()
            .insert(server_name.to_string(), Arc::clone(&client));
        Ok(client)
    }
}

fn cap(id: &str, servers: &[&str]) -> Cap {
    servers.iter().fold(Cap::new(id, "prompt"), |cap, name| {
        cap.with_server(
            *name,
            RemoteServerDescriptor::new(format!("https://{name}.example.com/mcp")),
        )
    })
}

fn manager(connector: &Arc<FakeConnector>) -> SessionManager {
    SessionManager::new(Arc::clone(connector) as Arc<dyn ClientConnector>)
}

#[tokio::test]
async fn cap_without_servers_opens_nothing() {
    let connector = Arc::new(FakeConnector::new(&[]));
    let manager = manager(&connector);

    let registry = manager.initialize_for_cap(&cap("plain", &[])).await.unwrap();

    assert!(registry.is_empty());
    assert!(connector.events().is_empty());
    assert_eq!(manager.active_cap_id().await.as_deref(), Some("plain"));
}

#[tokio::test]
async fn same_cap_is_memoized() {
    let connector = Arc::new(FakeConnector::new(&[("weather", Some(vec!["forecast"]))]));
    let manager = manager(&connector);
    let travel = cap("travel", &["weather"]);

    let first = manager.initialize_for_cap(&travel).await.unwrap();
    let (second, third) = tokio::join!(
        manager.initialize_for_cap(&travel),
        manager.initialize_for_cap(&travel)
    );

    assert_eq!(first, second.unwrap());
    assert_eq!(first, third.unwrap());
    assert_eq!(connector.events(), vec!["open:weather"]);
}

#[tokio::test]
async fn aggregated_keys_name_server_and_tool() {
    let connector = Arc::new(FakeConnector::new(&[
        ("weather", Some(vec!["forecast", "alerts"])),
        ("maps", Some(vec!["route"])),
    ]));
    let manager = manager(&connector);

    let registry = manager
        .initialize_for_cap(&cap("travel", &["weather", "maps"]))
        .await
        .unwrap();

    let keys: Vec<&str> = registry.keys().collect();
    assert_eq!(keys, vec!["maps_route", "weather_alerts", "weather_forecast"]);
    let forecast = registry.get("weather_forecast").unwrap();
    assert_eq!(forecast.server_name, "weather");
    assert_eq!(forecast.original_name, "forecast");
}

#[tokio::test]
async fn switching_caps_closes_before_opening() {
    let connector = Arc::new(FakeConnector::new(&[
        ("weather", Some(vec!["forecast"])),
        ("maps", Some(vec!["route"])),
        ("search", Some(vec!["query"])),
    ]));
    let manager = manager(&connector);

    manager
        .initialize_for_cap(&cap("travel", &["weather", "maps"]))
        .await
        .unwrap();
    let registry = manager
        .initialize_for_cap(&cap("research", &["search"]))
        .await
        .unwrap();

    let events = connector.events();
    let last_close = events
        .iter()
        .rposition(|event| event.starts_with("close:"))
        .unwrap();
    let first_new_open = events.iter().position(|event| event == "open:search").unwrap();
    assert!(last_close < first_new_open, "events: {events:?}");
    assert!(events.contains(&"close:weather".to_string()));
    assert!(events.contains(&"close:maps".to_string()));

    let keys: Vec<&str> = registry.keys().collect();
    assert_eq!(keys, vec!["search_query"]);
    assert_eq!(manager.active_cap_id().await.as_deref(), Some("research"));
}

#[tokio::test]
async fn reactivating_replaces_the_registry() {
    let connector = Arc::new(FakeConnector::new(&[
        ("weather", Some(vec!["forecast"])),
        ("search", Some(vec!["query"])),
    ]));
    let manager = manager(&connector);
    let travel = cap("travel", &["weather"]);

    let first = manager.initialize_for_cap(&travel).await.unwrap();
    manager
        .initialize_for_cap(&cap("research", &["search"]))
        .await
        .unwrap();
    let again = manager.initialize_for_cap(&travel).await.unwrap();

    assert_eq!(first, again);
    assert_eq!(again.len(), 1);
}

#[tokio::test]
async fn one_failing_server_aborts_the_cap() {
    let connector = Arc::new(FakeConnector::new(&[
        ("weather", Some(vec!["forecast"])),
        ("broken", None),
    ]));
    let manager = manager(&connector);

    let err = manager
        .initialize_for_cap(&cap("travel", &["broken", "weather"]))
        .await
        .unwrap_err();

    assert_eq!(err.failing_server(), Some("broken"));
    assert!(err.to_string().contains("connection refused"));
    assert_eq!(manager.active_cap_id().await, None);

    // Any session opened before the failure was observed is closed again.
    let events = connector.events();
    let opened = events.iter().filter(|e| e.as_str() == "open:weather").count();
    let closed = events.iter().filter(|e| e.as_str() == "close:weather").count();
    assert_eq!(opened, closed, "events: {events:?}");
}

#[tokio::test(start_paused = true)]
async fn sessions_in_flight_when_a_server_fails_are_closed() {
    let connector = Arc::new(
        FakeConnector::new(&[
            ("a_broken", None),
            ("b_slow", Some(vec!["forecast"])),
            ("c_slow", Some(vec!["route"])),
            ("d_late", Some(vec!["query"])),
        ])
        .delayed("a_broken", Duration::from_millis(10))
        .delayed("b_slow", Duration::from_secs(5))
        .delayed("c_slow", Duration::from_secs(5)),
    );
    let manager = manager(&connector);
    let travel = cap("travel", &["a_broken", "b_slow", "c_slow", "d_late"]);

    let err = manager.initialize_for_cap(&travel).await.unwrap_err();

    assert_eq!(err.failing_server(), Some("a_broken"));
    assert_eq!(manager.active_cap_id().await, None);
    let events = connector.events();
    let saw = |event: &str| events.iter().any(|logged| logged == event);
    assert!(saw("close:b_slow"), "events: {events:?}");
    assert!(saw("close:c_slow"), "events: {events:?}");
    // Not started once the failure was seen.
    assert!(!saw("open:d_late"), "events: {events:?}");
}

#[tokio::test]
async fn colliding_tool_keys_abort_the_cap() {
    // "a" + "b_c" and "a_b" + "c" both aggregate to "a_b_c".
    let connector = Arc::new(FakeConnector::new(&[
        ("a", Some(vec!["b_c"])),
        ("a_b", Some(vec!["c"])),
    ]));
    let manager = manager(&connector);

    let err = manager
        .initialize_for_cap(&cap("clash", &["a", "a_b"]))
        .await
        .unwrap_err();

    assert!(matches!(err, McpError::CapInitialization { .. }));
    assert_eq!(err.failing_server(), Some("a_b"));
    assert!(err.to_string().contains("a_b_c"), "{err}");
    assert_eq!(manager.active_cap_id().await, None);
    let events = connector.events();
    let saw = |event: &str| events.iter().any(|logged| logged == event);
    assert!(saw("close:a"), "events: {events:?}");
    assert!(saw("close:a_b"), "events: {events:?}");
}

fn frame_connector(frames: &[(&str, Arc<FakeMcpServer>, FrameHandle)]) -> SessionManager {
    let connector = RemoteConnector::new(TransportOptions::default());
    for (name, _server, frame) in frames {
        connector.register_frame(*name, frame.clone()).unwrap();
    }
    SessionManager::new(Arc::new(connector))
}

fn frame_cap(id: &str, frames: &[&str]) -> Cap {
    frames.iter().fold(Cap::new(id, "prompt"), |cap, name| {
        cap.with_server(
            *name,
            RemoteServerDescriptor::new(format!("{FRAME_URL_PREFIX}{name}")),
        )
    })
}

#[tokio::test]
async fn prompts_and_resources_are_served_from_open_sessions() {
    let (notes, notes_frame) = FakeMcpServer::default()
        .with_tools(&["search"])
        .attach("notes");
    let (bare, bare_frame) = FakeMcpServer::default().without_prompts().attach("bare");
    let manager = frame_connector(&[
        ("notes", notes.clone(), notes_frame),
        ("bare", bare.clone(), bare_frame),
    ]);
    manager
        .initialize_for_cap(&frame_cap("writing", &["notes", "bare"]))
        .await
        .unwrap();

    let prompts = manager.prompts().await;
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].server_name, "notes");
    assert_eq!(prompts[0].prompt.name, "greet");

    let resources: Vec<(String, String)> = manager
        .resources()
        .await
        .into_iter()
        .map(|entry| (entry.server_name, entry.resource.uri))
        .collect();
    assert_eq!(
        resources,
        vec![
            ("bare".to_string(), "file:///notes.md".to_string()),
            ("notes".to_string(), "file:///notes.md".to_string()),
        ]
    );

    let arguments = HashMap::from([("who".to_string(), "Ada".to_string())]);
    let prompt = manager
        .get_prompt("notes", "greet", arguments)
        .await
        .unwrap();
    let prompt = serde_json::to_value(prompt).unwrap();
    assert_eq!(prompt["messages"][0]["content"]["text"], "Hello Ada");

    let read = manager
        .read_resource("notes", "file:///notes.md")
        .await
        .unwrap();
    let read = serde_json::to_value(read).unwrap();
    assert_eq!(read["contents"][0]["text"], "contents of file:///notes.md");

    let err = manager
        .get_prompt("bare", "greet", HashMap::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not advertise"), "{err}");
    assert!(!bare.methods().contains(&"prompts/get".to_string()));
    assert!(manager
        .read_resource("ghost", "file:///notes.md")
        .await
        .is_err());

    manager.cleanup().await;
    assert!(manager.prompts().await.is_empty());
    assert!(manager.resources().await.is_empty());
}

#[tokio::test]
async fn frame_servers_reattach_after_switching_caps() {
    let (widget, widget_frame) = FakeMcpServer::default()
        .with_tools(&["render"])
        .attach("widget");
    let (maps, maps_frame) = FakeMcpServer::default()
        .with_tools(&["route"])
        .attach("maps");
    let manager = frame_connector(&[
        ("widget", widget.clone(), widget_frame),
        ("maps", maps, maps_frame),
    ]);
    let first = frame_cap("first", &["widget"]);

    manager.initialize_for_cap(&first).await.unwrap();
    manager
        .initialize_for_cap(&frame_cap("second", &["maps"]))
        .await
        .unwrap();
    let registry = manager.initialize_for_cap(&first).await.unwrap();

    let keys: Vec<&str> = registry.keys().collect();
    assert_eq!(keys, vec!["widget_render"]);
    let result = manager
        .call_tool(ToolCallRequest::new("widget_render"))
        .await
        .unwrap();
    assert!(result_text(&result).starts_with("render:"));
    let initializations = widget
        .methods()
        .iter()
        .filter(|method| method.as_str() == "initialize")
        .count();
    assert_eq!(initializations, 2);
}

#[tokio::test]
async fn call_tool_routes_to_the_owning_session() {
    let connector = Arc::new(FakeConnector::new(&[
        ("weather", Some(vec!["forecast"])),
        ("maps", Some(vec!["forecast"])),
    ]));
    let manager = manager(&connector);
    manager
        .initialize_for_cap(&cap("travel", &["weather", "maps"]))
        .await
        .unwrap();

    let result = manager
        .call_tool(ToolCallRequest::new("maps_forecast"))
        .await
        .unwrap();

    assert_eq!(result_text(&result), "maps:forecast");
    assert_eq!(connector.client("maps").calls().len(), 1);
    assert!(connector.client("weather").calls().is_empty());

    let err = manager
        .call_tool(ToolCallRequest::new("maps_missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Protocol(_)));
}

#[tokio::test]
async fn cleanup_reports_failures_and_clears_state() {
    let connector = Arc::new(
        FakeConnector::new(&[
            ("weather", Some(vec!["forecast"])),
            ("maps", Some(vec!["route"])),
        ])
        .failing_close("maps"),
    );
    let manager = manager(&connector);
    manager
        .initialize_for_cap(&cap("travel", &["weather", "maps"]))
        .await
        .unwrap();

    let report = manager.cleanup().await;

    assert!(!report.is_clean());
    assert_eq!(report.closed, vec!["weather"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "maps");
    assert_eq!(manager.active_cap_id().await, None);
    assert!(manager
        .call_tool(ToolCallRequest::new("weather_forecast"))
        .await
        .is_err());

    let events = connector.events();
    assert!(events.contains(&"close:weather".to_string()));
    assert!(events.contains(&"close:maps".to_string()));
}
