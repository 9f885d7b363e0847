//! End-to-end tests using a real WebSocket client and HTTP client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use tally_core::Conversation;
use tally_server::config::ServerConfig;
use tally_server::server::TallyServer;
use tally_store::{ConversationRegistry, MemoryCounterStore};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    base: String,
    ws_base: String,
    server: Arc<TallyServer>,
    http: reqwest::Client,
}

impl TestServer {
    fn ws_url(&self, user: &str) -> String {
        format!("{}/v1/ws?user={user}", self.ws_base)
    }

    async fn post_message(&self, sender: &str) -> Value {
        self.http
            .post(format!("{}/v1/messages", self.base))
            .json(&json!({"conversation": "c1", "sender": sender}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

/// Boot a test server with conversation `c1` between `buyer` and `seller`.
async fn boot_server_with(config: ServerConfig) -> TestServer {
    let conversations = Arc::new(ConversationRegistry::new());
    let _ = conversations
        .register(Conversation::new("c1", "buyer", "seller"))
        .unwrap();
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .build_recorder()
        .handle();
    let server = Arc::new(TallyServer::new(
        config,
        Arc::new(MemoryCounterStore::new()),
        conversations,
        metrics_handle,
    ));
    let (addr, _handle) = server.listen().await.unwrap();
    TestServer {
        base: format!("http://{addr}"),
        ws_base: format!("ws://{addr}"),
        server,
        http: reqwest::Client::new(),
    }
}

async fn boot_server() -> TestServer {
    boot_server_with(ServerConfig::default()).await
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
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

async fn try_read_json(ws: &mut WsStream, wait: Duration) -> Option<Value> {
    match timeout(wait, ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str(&text).ok(),
        _ => None,
    }
}

/// Connect and consume the `connection_established` + `snapshot` preamble.
async fn connect_ready(url: &str) -> (WsStream, Value) {
    let mut ws = connect(url).await;
    let established = read_json(&mut ws).await;
    assert_eq!(established["type"], "connection_established");
    let snapshot = read_json(&mut ws).await;
    assert_eq!(snapshot["type"], "snapshot");
    (ws, snapshot)
}

/// The session task leaves the hub just after its close frame goes out.
async fn wait_for_no_sessions(t: &TestServer) {
    let drained = timeout(TIMEOUT, async {
        while t.server.hub().connection_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "session never left the hub");
}

async fn rpc_call(ws: &mut WsStream, id: &str, method: &str, params: Option<Value>) -> Value {
    let mut req = json!({"id": id, "method": method});
    if let Some(p) = params {
        req["params"] = p;
    }
    ws.send(Message::text(req.to_string())).await.unwrap();
    loop {
        let msg = read_json(ws).await;
        if msg["id"] == id {
            return msg;
        }
    }
}

#[tokio::test]
async fn e2e_connect_sends_established_then_snapshot() {
    let t = boot_server().await;
    let _ = t.post_message("buyer").await;

    let mut ws = connect(&t.ws_url("seller")).await;
    let established = read_json(&mut ws).await;
    assert_eq!(established["type"], "connection_established");
    assert_eq!(established["user"], "seller");
    assert!(established["session"].is_string());

    let snapshot = read_json(&mut ws).await;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["total"], 1);
    assert_eq!(snapshot["perConversation"]["c1"], 1);
    assert_eq!(snapshot["sequences"]["c1"], 1);
}

#[tokio::test]
async fn e2e_ping() {
    let t = boot_server().await;
    let (mut ws, _) = connect_ready(&t.ws_url("seller")).await;
    let resp = rpc_call(&mut ws, "p1", "system.ping", None).await;
    assert_eq!(resp["success"], true);
    assert_eq!(resp["result"]["pong"], true);
}

#[tokio::test]
async fn e2e_delta_reaches_every_recipient_session() {
    let t = boot_server().await;
    let (mut tab1, _) = connect_ready(&t.ws_url("seller")).await;
    let (mut tab2, _) = connect_ready(&t.ws_url("seller")).await;
    let (mut sender, _) = connect_ready(&t.ws_url("buyer")).await;

    let outcome = t.post_message("buyer").await;
    assert_eq!(outcome["delivered"], 2);

    for ws in [&mut tab1, &mut tab2] {
        let delta = read_json(ws).await;
        assert_eq!(delta["type"], "counter_delta");
        assert_eq!(delta["conversation"], "c1");
        assert_eq!(delta["sequence"], 1);
        assert_eq!(delta["delta"], 1);
    }
    assert!(try_read_json(&mut sender, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn e2e_mark_read_over_rpc_propagates_receipt() {
    let t = boot_server().await;
    for _ in 0..3 {
        let _ = t.post_message("buyer").await;
    }
    let (mut tab1, snap) = connect_ready(&t.ws_url("seller")).await;
    assert_eq!(snap["total"], 3);
    let (mut tab2, _) = connect_ready(&t.ws_url("seller")).await;

    let resp = rpc_call(
        &mut tab1,
        "m1",
        "counter.markRead",
        Some(json!({"conversationId": "c1"})),
    )
    .await;
    assert_eq!(resp["success"], true);
    assert_eq!(resp["result"]["markedCount"], 3);
    assert_eq!(resp["result"]["throughSequence"], 3);

    let receipt = read_json(&mut tab2).await;
    assert_eq!(receipt["type"], "read_receipt");
    assert_eq!(receipt["markedCount"], 3);

    // The origin session gets the response, not a receipt.
    assert!(try_read_json(&mut tab1, Duration::from_millis(200)).await.is_none());

    let resp = rpc_call(&mut tab1, "s1", "counter.getSnapshot", None).await;
    assert_eq!(resp["result"]["total"], 0);
}

#[tokio::test]
async fn e2e_mark_read_over_http_pushes_receipt() {
    let t = boot_server().await;
    let _ = t.post_message("buyer").await;
    let (mut ws, _) = connect_ready(&t.ws_url("seller")).await;

    let resp = t
        .http
        .post(format!("{}/v1/users/seller/conversations/c1/read", t.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let receipt: Value = resp.json().await.unwrap();
    assert_eq!(receipt["markedCount"], 1);

    let pushed = read_json(&mut ws).await;
    assert_eq!(pushed["type"], "read_receipt");
    assert_eq!(pushed["markedCount"], 1);

    // Already read: success with nothing cleared.
    let again: Value = t
        .http
        .post(format!("{}/v1/users/seller/conversations/c1/read", t.base))
        .header("x-tally-session", "some-other-tab")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["markedCount"], 0);
}

#[tokio::test]
async fn e2e_unknown_conversation_is_404() {
    let t = boot_server().await;
    let resp = t
        .http
        .post(format!("{}/v1/users/seller/conversations/ghost/read", t.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "CONVERSATION_NOT_FOUND");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn e2e_snapshot_endpoint() {
    let t = boot_server().await;
    let _ = t.post_message("seller").await;
    let _ = t.post_message("seller").await;
    let snapshot: Value = t
        .http
        .get(format!("{}/v1/users/buyer/snapshot", t.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snapshot["user"], "buyer");
    assert_eq!(snapshot["total"], 2);
    assert_eq!(snapshot["sequences"]["c1"], 2);
}

#[tokio::test]
async fn e2e_silent_client_is_dropped_by_heartbeat() {
    let t = boot_server_with(ServerConfig {
        heartbeat_interval: Duration::from_millis(100),
        heartbeat_max_missed: 2,
        ..ServerConfig::default()
    })
    .await;
    let (mut ws, _) = connect_ready(&t.ws_url("seller")).await;
    assert_eq!(t.server.hub().connection_count().await, 1);

    // Not polling the stream means no Pongs go back.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    wait_for_no_sessions(&t).await;
}

#[tokio::test]
async fn e2e_connection_limit() {
    let t = boot_server_with(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    })
    .await;
    let (_first, _) = connect_ready(&t.ws_url("seller")).await;
    assert!(connect_async(t.ws_url("buyer")).await.is_err());
}

#[tokio::test]
async fn e2e_shutdown_closes_sessions() {
    let t = boot_server().await;
    let (mut ws, _) = connect_ready(&t.ws_url("seller")).await;

    assert!(t.server.shutdown(Some(Duration::from_secs(3))).await);

    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    assert_eq!(t.server.hub().connection_count().await, 0);
}
