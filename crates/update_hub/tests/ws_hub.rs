use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{Update, UpdateType};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use update_hub::{create_router, AppState, Hub, HubConfig};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_hub(config: HubConfig) -> (SocketAddr, Arc<Hub>) {
    let hub = Arc::new(Hub::new(config));
    let app = create_router(Arc::new(AppState { hub: hub.clone() }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hub)
}

async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    ws
}

/// Poll until `check` holds or two seconds pass.
async fn wait_until(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

async fn next_update(ws: &mut Ws) -> Option<Update> {
    match timeout(Duration::from_millis(300), ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => Some(Update::from_json(&text).unwrap()),
        _ => None,
    }
}

fn subscribed(hub: &Hub, update_type: UpdateType) -> usize {
    hub.registry().subscribers(update_type).len()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delivers_only_subscribed_types() {
    let (addr, hub) = spawn_hub(HubConfig::default()).await;
    let mut ws = connect(addr).await;

    ws.send(Message::Text(
        r#"{"action":"subscribe","types":["POI"]}"#.to_string(),
    ))
    .await
    .unwrap();
    wait_until(|| subscribed(&hub, UpdateType::Poi) == 1).await;

    let report = hub.broadcast(&Update::now(UpdateType::Weather, json!({"rain_mm": 2})));
    assert_eq!(report.delivered, 0);
    assert!(next_update(&mut ws).await.is_none());

    let report = hub.broadcast(&Update::now(UpdateType::Poi, json!({"name": "Cafe"})));
    assert_eq!(report.delivered, 1);
    let update = next_update(&mut ws).await.expect("POI update");
    assert_eq!(update.update_type, UpdateType::Poi);
    assert_eq!(update.data["name"], "Cafe");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_clients_one_subscribed() {
    let (addr, hub) = spawn_hub(HubConfig::default()).await;
    let mut subscriber = connect(addr).await;
    let mut bystander = connect(addr).await;
    wait_until(|| hub.connection_count() == 2).await;

    subscriber
        .send(Message::Text(
            r#"{"action":"subscribe","types":["POI"]}"#.to_string(),
        ))
        .await
        .unwrap();
    wait_until(|| subscribed(&hub, UpdateType::Poi) == 1).await;

    let report = hub.broadcast(&Update::now(UpdateType::Poi, json!({})));
    assert_eq!(report.delivered, 1);
    assert!(next_update(&mut subscriber).await.is_some());
    assert!(next_update(&mut bystander).await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_action_keeps_connection_open() {
    let (addr, hub) = spawn_hub(HubConfig::default()).await;
    let mut ws = connect(addr).await;

    ws.send(Message::Text(r#"{"action":"frobnicate"}"#.to_string()))
        .await
        .unwrap();
    ws.send(Message::Text("garbage".to_string())).await.unwrap();
    wait_until(|| hub.stats().unknown_actions == 1 && hub.stats().protocol_errors == 1).await;
    assert_eq!(hub.connection_count(), 1);

    ws.send(Message::Text(
        r#"{"action":"subscribe","types":["ROUTE"]}"#.to_string(),
    ))
    .await
    .unwrap();
    wait_until(|| subscribed(&hub, UpdateType::Route) == 1).await;

    hub.broadcast(&Update::now(UpdateType::Route, json!({"reroute": true})));
    let update = next_update(&mut ws).await.expect("route update");
    assert_eq!(update.update_type, UpdateType::Route);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn evicted_connection_is_closed() {
    let (addr, hub) = spawn_hub(HubConfig::default()).await;
    let mut ws = connect(addr).await;
    ws.send(Message::Text(
        r#"{"action":"subscribe","types":["TRAFFIC"]}"#.to_string(),
    ))
    .await
    .unwrap();
    wait_until(|| subscribed(&hub, UpdateType::Traffic) == 1).await;

    // Far enough in the future that the connection is stale.
    let evicted = hub.evict_stale_at(hub.now_ms() + 60_000);
    assert_eq!(evicted.len(), 1);
    assert_eq!(hub.connection_count(), 0);

    let report = hub.broadcast(&Update::now(UpdateType::Traffic, json!({})));
    assert_eq!(report.delivered, 0);

    let closed = timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket was not closed by the hub");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connection_limit_refuses_upgrade() {
    let config = HubConfig {
        max_connections: 1,
        ..HubConfig::default()
    };
    let (addr, hub) = spawn_hub(config).await;
    let _first = connect(addr).await;
    wait_until(|| hub.connection_count() == 1).await;

    let second = connect_async(format!("ws://{}/ws", addr)).await;
    assert!(second.is_err());
    assert_eq!(hub.stats().rejected_connections, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeat_is_counted() {
    let (addr, hub) = spawn_hub(HubConfig::default()).await;
    let mut ws = connect(addr).await;
    ws.send(Message::Text(r#"{"action":"heartbeat"}"#.to_string()))
        .await
        .unwrap();
    wait_until(|| hub.stats().heartbeats == 1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_utf8_binary_frame_is_protocol_error() {
    let (addr, hub) = spawn_hub(HubConfig::default()).await;
    let mut ws = connect(addr).await;

    ws.send(Message::Binary(vec![0xff, 0xfe, 0xfd])).await.unwrap();
    wait_until(|| hub.stats().protocol_errors == 1).await;
    assert_eq!(hub.connection_count(), 1);

    // Still usable afterwards.
    ws.send(Message::Text(
        r#"{"action":"subscribe","types":["POI"]}"#.to_string(),
    ))
    .await
    .unwrap();
    wait_until(|| subscribed(&hub, UpdateType::Poi) == 1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_and_health_endpoints() {
    let (addr, hub) = spawn_hub(HubConfig::default()).await;
    let mut ws = connect(addr).await;
    ws.send(Message::Text(
        r#"{"action":"subscribe","types":["WEATHER"]}"#.to_string(),
    ))
    .await
    .unwrap();
    wait_until(|| subscribed(&hub, UpdateType::Weather) == 1).await;

    let http = reqwest::Client::new();
    let resp = http
        .post(format!("http://{}/updates", addr))
        .json(&json!({"type": "WEATHER", "data": {"t": 1}}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let report: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(report, json!({"delivered": 1, "failed": 0}));

    let update = next_update(&mut ws).await.expect("weather update");
    assert_eq!(update.update_type, UpdateType::Weather);
    assert_eq!(update.data["t"], 1);
    assert!(update.timestamp > 0);

    // Explicit timestamps are kept; nobody listens for ROUTE.
    let report: serde_json::Value = http
        .post(format!("http://{}/updates", addr))
        .json(&json!({"type": "ROUTE", "timestamp": 1_700_000_000_000_i64}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report, json!({"delivered": 0, "failed": 0}));

    let unknown = http
        .post(format!("http://{}/updates", addr))
        .json(&json!({"type": "TOLLS", "data": {}}))
        .send()
        .await
        .unwrap();
    assert!(unknown.status().is_client_error());

    let health: serde_json::Value = http
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
    assert_eq!(health["subscriptions"], 1);
    assert_eq!(health["stats"]["updates_broadcast"], 2);
    assert_eq!(health["stats"]["deliveries"], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_update_is_sent_before_close() {
    let (addr, hub) = spawn_hub(HubConfig::default()).await;
    let mut ws = connect(addr).await;
    ws.send(Message::Text(
        r#"{"action":"subscribe","types":["POI"]}"#.to_string(),
    ))
    .await
    .unwrap();
    wait_until(|| subscribed(&hub, UpdateType::Poi) == 1).await;

    let report = hub.broadcast(&Update::now(UpdateType::Poi, json!({"name": "Last stop"})));
    assert_eq!(report.delivered, 1);
    hub.close_all();

    let frames = timeout(Duration::from_secs(2), async {
        let mut frames = Vec::new();
        while let Some(Ok(msg)) = ws.next().await {
            let is_close = msg.is_close();
            frames.push(msg);
            if is_close {
                break;
            }
        }
        frames
    })
    .await
    .expect("socket was not closed by the hub");

    assert_eq!(frames.len(), 2);
    match &frames[0] {
        Message::Text(text) => {
            let update = Update::from_json(text).unwrap();
            assert_eq!(update.data["name"], "Last stop");
        }
        other => panic!("expected the queued update first, got {:?}", other),
    }
    assert!(frames[1].is_close());
}
