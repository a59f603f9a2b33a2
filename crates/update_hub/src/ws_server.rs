//! WebSocket server handler using Axum.

use crate::connection::ClientConnection;
use crate::hub::{BroadcastReport, Hub};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::{Update, UpdateType};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// How long the writer gets to drain its queue and send a close frame on teardown.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state.
pub struct AppState {
    pub hub: Arc<Hub>,
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/updates", post(publish_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = state.hub.registry();
    Json(json!({
        "status": "ok",
        "connections": registry.len(),
        "subscriptions": registry.subscription_count(),
        "stats": state.hub.stats(),
    }))
}

/// Update posted by an out-of-process producer.
#[derive(Debug, Deserialize)]
struct PublishRequest {
    #[serde(rename = "type")]
    update_type: UpdateType,
    #[serde(default)]
    data: serde_json::Value,
    /// Epoch millis; defaults to now.
    timestamp: Option<i64>,
}

/// Producer ingress: broadcast one update to its subscribers.
async fn publish_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PublishRequest>,
) -> Json<BroadcastReport> {
    let mut update = Update::now(req.update_type, req.data);
    if let Some(ts) = req.timestamp {
        update.timestamp = ts;
    }
    Json(state.hub.broadcast(&update))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.hub.at_capacity() {
        state.hub.reject_connection();
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection from registration to removal.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (connection, mut rx) = match state.hub.connect() {
        Ok(pair) => pair,
        Err(e) => {
            warn!("Dropping upgraded socket: {}", e);
            let _ = ws_tx
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::AGAIN,
                    reason: "connection limit reached".into(),
                })))
                .await;
            return;
        }
    };
    let connection_id = connection.id;
    info!("Connection {} opened", connection_id);

    // Forward queued messages to the socket until told to stop.
    let (stop_tx, mut stop_rx) = oneshot::channel::<Option<CloseFrame<'static>>>();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                frame = &mut stop_rx => {
                    // Send what was already queued before closing.
                    while let Ok(msg) = rx.try_recv() {
                        if ws_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    let _ = ws_tx.send(Message::Close(frame.ok().flatten())).await;
                    break;
                }

                msg = rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if ws_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    let close_frame = loop {
        tokio::select! {
            biased;

            _ = connection.closed() => {
                debug!("Connection {} closed by hub", connection_id);
                break Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: "evicted".into(),
                });
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(msg)) => handle_message(&state.hub, &connection, msg),
                    Some(Err(e)) => {
                        state.hub.on_error(&connection, &e);
                        break None;
                    }
                }
            }
        }
    };

    // Cleanup
    state.hub.on_disconnect(&connection_id);
    let _ = stop_tx.send(close_frame);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }

    info!("Connection {} closed", connection_id);
}

/// Handle a single inbound WebSocket frame.
fn handle_message(hub: &Hub, connection: &ClientConnection, msg: Message) {
    let result = match msg {
        Message::Text(text) => hub.on_message(connection, &text),
        Message::Binary(data) => match std::str::from_utf8(&data) {
            Ok(text) => hub.on_message(connection, text),
            Err(e) => {
                hub.on_activity(connection);
                let detail = format!("non-UTF-8 binary frame: {}", e);
                hub.on_protocol_error(connection, &detail);
                Ok(())
            }
        },
        Message::Ping(data) => {
            hub.on_activity(connection);
            let _ = connection.try_send(Message::Pong(data));
            Ok(())
        }
        Message::Pong(_) => {
            hub.on_activity(connection);
            Ok(())
        }
        // Handled by the connection loop
        Message::Close(_) => Ok(()),
    };

    if let Err(e) = result {
        debug!("Error handling message from {}: {}", connection.id, e);
    }
}
