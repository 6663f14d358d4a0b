//! End-to-end tests using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use async_graphql::{Context, EmptyMutation, Object, Schema, Subscription};
use futures::{SinkExt, Stream, StreamExt, stream};
use gqlws_core::RequestContext;
use gqlws_server::{EventPayload, GqlWsServer, SchemaExecutor, ServerConfig};
use serde_json::{Value, json};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

// ── Schema ──

struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn bye(&self) -> &str {
        "friend"
    }
}

struct Greeter {
    color: String,
}

#[Object]
impl Greeter {
    async fn hello(&self, name: String) -> String {
        format!("hello {name} in {}", self.color)
    }
}

fn payload_text(ctx: &Context<'_>) -> String {
    ctx.data::<EventPayload>()
        .ok()
        .and_then(|p| p.0.as_str().map(str::to_owned))
        .unwrap_or_default()
}

struct SubscriptionRoot;

#[Subscription]
impl SubscriptionRoot {
    async fn ping(&self, ctx: &Context<'_>) -> impl Stream<Item = String> {
        let text = payload_text(ctx);
        stream::once(async move { text })
    }

    async fn greet(&self, ctx: &Context<'_>) -> impl Stream<Item = Greeter> {
        let color = payload_text(ctx);
        stream::once(async move { Greeter { color } })
    }

    async fn token(&self, ctx: &Context<'_>) -> impl Stream<Item = Option<String>> {
        let token = ctx
            .data::<Arc<RequestContext>>()
            .ok()
            .and_then(|c| c.connection_params.as_ref())
            .and_then(|p| p.get("token"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        stream::once(async move { token })
    }
}

// ── Helpers ──

fn quiet_config() -> ServerConfig {
    ServerConfig {
        keep_alive_interval_secs: 0,
        ..ServerConfig::default()
    }
}

/// Boot a test server and return the WS URL + server.
async fn boot_server(config: ServerConfig) -> (String, Arc<GqlWsServer>) {
    let schema = Schema::new(QueryRoot, EmptyMutation, SubscriptionRoot);
    let server = Arc::new(GqlWsServer::new(
        config,
        Arc::new(SchemaExecutor::new(schema)),
    ));
    let (addr, _handle) = server.listen().await.unwrap();
    let url = format!("ws://{addr}{}", server.config().path);
    (url, server)
}

async fn connect(url: &str) -> WsStream {
    let mut request = url.into_client_request().unwrap();
    let _ = request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("graphql-ws"));
    let (ws, _) = timeout(TIMEOUT, connect_async(request))
        .await
        .expect("timeout connecting")
        .expect("connect failed");
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Assert no text frame arrives for a short while.
async fn assert_silent(ws: &mut WsStream) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(QUIET, ws.next()).await {
        panic!("unexpected message: {text}");
    }
}

/// Read until the server closes the socket.
async fn expect_closed(ws: &mut WsStream) {
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("timeout waiting for close") {
            None | Some(Err(_) | Ok(Message::Close(_))) => return,
            Some(Ok(Message::Text(text))) => panic!("unexpected message before close: {text}"),
            Some(Ok(_)) => {}
        }
    }
}

async fn wait_for_subscriptions(server: &GqlWsServer, expected: usize) {
    timeout(TIMEOUT, async {
        while server.registry().subscription_count().await != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscription count never reached expected value");
}

async fn wait_for_connections(server: &GqlWsServer, expected: usize) {
    timeout(TIMEOUT, async {
        while server.registry().connection_count().await != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection count never reached expected value");
}

async fn init(ws: &mut WsStream) {
    send_json(ws, json!({"type": "connection_init"})).await;
    assert_eq!(read_json(ws).await, json!({"type": "connection_ack"}));
}

async fn start(ws: &mut WsStream, id: &str, query: &str) {
    send_json(ws, json!({"id": id, "type": "start", "payload": {"query": query}})).await;
}

// ── Tests ──

#[tokio::test]
async fn e2e_subprotocol_negotiated() {
    let (url, _server) = boot_server(quiet_config()).await;
    let mut request = url.as_str().into_client_request().unwrap();
    let _ = request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("graphql-ws"));
    let (_ws, response) = connect_async(request).await.unwrap();
    assert_eq!(
        response.headers().get("sec-websocket-protocol").unwrap(),
        "graphql-ws"
    );
}

#[tokio::test]
async fn e2e_init_is_acknowledged() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;
    wait_for_connections(&server, 1).await;
}

#[tokio::test]
async fn e2e_ping_lifecycle() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    start(&mut ws, "1", "subscription { ping }").await;
    wait_for_subscriptions(&server, 1).await;

    server.publisher().publish("ping", "Blue").await.unwrap();
    assert_eq!(
        read_json(&mut ws).await,
        json!({"type": "data", "id": "1", "payload": {"data": {"ping": "Blue"}}})
    );

    send_json(&mut ws, json!({"id": "1", "type": "stop"})).await;
    assert_eq!(read_json(&mut ws).await, json!({"type": "complete", "id": "1"}));
    wait_for_subscriptions(&server, 0).await;

    server.publisher().publish("ping", "Blue").await.unwrap();
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn e2e_start_without_init() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    start(&mut ws, "a", "subscription { ping }").await;
    wait_for_subscriptions(&server, 1).await;

    server.publisher().publish("ping", "Red").await.unwrap();
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["id"], "a");
    assert_eq!(msg["payload"]["data"]["ping"], "Red");
}

#[tokio::test]
async fn e2e_unknown_event_is_silent() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;
    start(&mut ws, "1", "subscription { ping }").await;
    wait_for_subscriptions(&server, 1).await;

    server.publisher().publish("pong", "Blue").await.unwrap();
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn e2e_nested_selection_and_variables() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    send_json(
        &mut ws,
        json!({
            "id": "g",
            "type": "start",
            "payload": {
                "query": "subscription Greet($name: String!) { greet { hello(name: $name) } }",
                "operationName": "Greet",
                "variables": {"name": "Ada"}
            }
        }),
    )
    .await;
    wait_for_subscriptions(&server, 1).await;

    server.publisher().publish("greet", "green").await.unwrap();
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "data");
    assert_eq!(msg["payload"]["data"]["greet"]["hello"], "hello Ada in green");
}

#[tokio::test]
async fn e2e_connection_params_reach_resolvers() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    send_json(&mut ws, json!({"type": "connection_init", "payload": {"token": "s3cret"}})).await;
    assert_eq!(read_json(&mut ws).await["type"], "connection_ack");

    start(&mut ws, "t", "subscription { token }").await;
    wait_for_subscriptions(&server, 1).await;

    server.publisher().publish("token", Value::Null).await.unwrap();
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["payload"]["data"]["token"], "s3cret");
}

#[tokio::test]
async fn e2e_invalid_query_yields_error() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    start(&mut ws, "bad", "subscription { ping").await;
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "error");
    assert_eq!(msg["id"], "bad");
    assert!(msg["payload"][0]["message"].is_string());
    assert_eq!(server.registry().subscription_count().await, 0);

    // connection stays usable
    start(&mut ws, "good", "subscription { ping }").await;
    wait_for_subscriptions(&server, 1).await;
}

#[tokio::test]
async fn e2e_execution_error_yields_error_message() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;

    // parses fine, fails schema validation at execution time
    start(&mut ws, "1", "subscription { nope }").await;
    wait_for_subscriptions(&server, 1).await;

    server.publisher().publish("nope", Value::Null).await.unwrap();
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "error");
    assert_eq!(msg["id"], "1");
    assert!(msg["payload"].as_array().is_some_and(|errors| !errors.is_empty()));
    assert_eq!(server.registry().subscription_count().await, 1);
}

#[tokio::test]
async fn e2e_malformed_frame_closes_connection() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;
    wait_for_connections(&server, 1).await;

    ws.send(Message::text("{not json")).await.unwrap();
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "connection_error");
    assert!(msg["payload"]["message"].is_string());

    expect_closed(&mut ws).await;
    wait_for_connections(&server, 0).await;
}

#[tokio::test]
async fn e2e_terminate_releases_subscriptions() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;
    start(&mut ws, "1", "subscription { ping }").await;
    start(&mut ws, "2", "subscription { greet { hello(name: \"x\") } }").await;
    wait_for_subscriptions(&server, 2).await;

    send_json(&mut ws, json!({"type": "connection_terminate"})).await;
    expect_closed(&mut ws).await;
    wait_for_subscriptions(&server, 0).await;
    wait_for_connections(&server, 0).await;
}

#[tokio::test]
async fn e2e_client_disconnect_releases_subscriptions() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;
    start(&mut ws, "1", "subscription { ping }").await;
    wait_for_subscriptions(&server, 1).await;

    drop(ws);
    wait_for_connections(&server, 0).await;
    assert_eq!(server.registry().subscription_count().await, 0);
    assert!(server.registry().matching_subscriptions("ping").await.is_empty());

    // publishing afterwards is harmless
    server.publisher().publish("ping", "Blue").await.unwrap();
}

#[tokio::test]
async fn e2e_two_clients_both_receive() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    init(&mut a).await;
    init(&mut b).await;
    start(&mut a, "1", "subscription { ping }").await;
    start(&mut b, "1", "subscription { ping }").await;
    wait_for_subscriptions(&server, 2).await;

    server.publisher().publish("ping", "Blue").await.unwrap();
    assert_eq!(read_json(&mut a).await["payload"]["data"]["ping"], "Blue");
    assert_eq!(read_json(&mut b).await["payload"]["data"]["ping"], "Blue");
}

#[tokio::test]
async fn e2e_events_arrive_in_publish_order() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;
    start(&mut ws, "1", "subscription { ping }").await;
    wait_for_subscriptions(&server, 1).await;

    for color in ["red", "green", "blue"] {
        server.publisher().publish("ping", color).await.unwrap();
    }
    for color in ["red", "green", "blue"] {
        assert_eq!(read_json(&mut ws).await["payload"]["data"]["ping"], color);
    }
}

#[tokio::test]
async fn e2e_keep_alive_after_ack() {
    let config = ServerConfig {
        keep_alive_interval_secs: 1,
        ..ServerConfig::default()
    };
    let (url, _server) = boot_server(config).await;
    let mut ws = connect(&url).await;
    send_json(&mut ws, json!({"type": "connection_init"})).await;
    assert_eq!(read_json(&mut ws).await["type"], "connection_ack");
    assert_eq!(read_json(&mut ws).await, json!({"type": "ka"}));
    assert_eq!(read_json(&mut ws).await, json!({"type": "ka"}));
}

#[tokio::test]
async fn e2e_no_keep_alive_before_init() {
    let config = ServerConfig {
        keep_alive_interval_secs: 1,
        ..ServerConfig::default()
    };
    let (url, _server) = boot_server(config).await;
    let mut ws = connect(&url).await;
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn e2e_shutdown_completes_subscriptions() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;
    start(&mut ws, "1", "subscription { ping }").await;
    start(&mut ws, "2", "subscription { greet { hello(name: \"x\") } }").await;
    wait_for_subscriptions(&server, 2).await;

    server.shutdown().shutdown();

    let mut completed = vec![
        read_json(&mut ws).await["id"].as_str().unwrap().to_string(),
        read_json(&mut ws).await["id"].as_str().unwrap().to_string(),
    ];
    completed.sort();
    assert_eq!(completed, vec!["1", "2"]);
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn e2e_connection_limit() {
    let config = ServerConfig {
        max_connections: 1,
        ..quiet_config()
    };
    let (url, server) = boot_server(config).await;
    let _first = connect(&url).await;
    wait_for_connections(&server, 1).await;

    let second = connect_async(url.as_str()).await;
    assert!(second.is_err());
}

#[tokio::test]
async fn e2e_binary_frames_are_decoded() {
    let (url, _server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    ws.send(Message::binary(br#"{"type":"connection_init"}"#.to_vec()))
        .await
        .unwrap();
    assert_eq!(read_json(&mut ws).await["type"], "connection_ack");
}

#[tokio::test]
async fn e2e_non_utf8_binary_frame_closes_connection() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;
    wait_for_connections(&server, 1).await;

    ws.send(Message::binary(vec![0xff, 0xfe, 0x00])).await.unwrap();
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "connection_error");
    assert!(msg["payload"]["message"].as_str().unwrap().contains("UTF-8"));

    expect_closed(&mut ws).await;
    wait_for_connections(&server, 0).await;
}

#[tokio::test]
async fn e2e_graceful_shutdown_waits_for_sessions() {
    let (url, server) = boot_server(quiet_config()).await;
    let mut ws = connect(&url).await;
    init(&mut ws).await;
    start(&mut ws, "1", "subscription { ping }").await;
    wait_for_subscriptions(&server, 1).await;

    timeout(TIMEOUT, server.shutdown_gracefully()).await.unwrap();
    // sessions finished before shutdown returned
    assert_eq!(server.registry().connection_count().await, 0);
    assert_eq!(server.shutdown().tracked(), 0);

    let msg = read_json(&mut ws).await;
    assert_eq!(msg, json!({"type": "complete", "id": "1"}));
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn e2e_concurrent_upgrades_respect_limit() {
    let config = ServerConfig {
        max_connections: 2,
        ..quiet_config()
    };
    let (url, server) = boot_server(config).await;

    let attempts = (0..6).map(|_| {
        let url = url.clone();
        tokio::spawn(async move { connect_async(url.as_str()).await.ok().map(|(ws, _)| ws) })
    });
    let mut accepted = Vec::new();
    for attempt in attempts.collect::<Vec<_>>() {
        if let Some(ws) = attempt.await.unwrap() {
            accepted.push(ws);
        }
    }

    assert_eq!(accepted.len(), 2);
    wait_for_connections(&server, 2).await;

    // a released slot can be reused
    drop(accepted.pop());
    wait_for_connections(&server, 1).await;
    let reconnected = timeout(TIMEOUT, async {
        loop {
            if let Ok((ws, _)) = connect_async(url.as_str()).await {
                break ws;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reconnected.is_ok());
}
