//! Connection state and registry management.
//!
//! Uses DashMap so that connection add/remove never blocks a concurrent
//! broadcast. Removal is a single map operation: a broadcast either holds
//! the connection in its snapshot or never sees it.

use axum::extract::ws::Message;
use chrono::Utc;
use common::{SharedSubscriptions, SubscriptionSet, UpdateType};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Unique connection identifier.
pub type ConnectionId = Uuid;

/// Default buffer size for per-connection outbound queues.
pub const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 256;

/// Monotonic millisecond clock used for heartbeat bookkeeping.
///
/// Built on `tokio::time::Instant` so paused-clock tests can drive it.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatClock {
    origin: Instant,
}

impl HeartbeatClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds since the clock was created.
    pub fn now_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }
}

impl Default for HeartbeatClock {
    fn default() -> Self {
        Self::new()
    }
}

/// State for a single connected client.
pub struct ClientConnection {
    /// Unique connection identifier.
    pub id: ConnectionId,
    /// Bounded outbound queue drained by the connection's writer task.
    tx: mpsc::Sender<Message>,
    /// Update types this connection receives.
    subscriptions: SharedSubscriptions,
    /// Wall-clock epoch millis when the client connected.
    pub connected_at: i64,
    /// Heartbeat clock millis of the last inbound traffic.
    last_heartbeat: AtomicI64,
    closed: AtomicBool,
    close_notify: Notify,
}

impl ClientConnection {
    /// Create a new connection with an empty subscription set.
    pub fn new(tx: mpsc::Sender<Message>, now_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
            subscriptions: SharedSubscriptions::new(),
            connected_at: Utc::now().timestamp_millis(),
            last_heartbeat: AtomicI64::new(now_ms),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        }
    }

    /// Enqueue a pre-serialized frame without waiting.
    /// Fails if the queue is full (slow client) or the writer is gone.
    pub fn try_send(&self, msg: Message) -> Result<(), mpsc::error::TrySendError<Message>> {
        self.tx.try_send(msg)
    }

    /// Record liveness. Never moves the heartbeat backwards.
    pub fn touch(&self, now_ms: i64) {
        self.last_heartbeat.fetch_max(now_ms, Ordering::AcqRel);
    }

    /// Heartbeat clock millis of the last inbound traffic.
    pub fn last_heartbeat(&self) -> i64 {
        self.last_heartbeat.load(Ordering::Acquire)
    }

    /// Whether the connection has been silent longer than `timeout_ms`.
    pub fn is_stale(&self, now_ms: i64, timeout_ms: i64) -> bool {
        now_ms - self.last_heartbeat() > timeout_ms
    }

    pub fn subscribe(&self, types: &[UpdateType]) {
        self.subscriptions.add(types.iter().copied());
    }

    pub fn unsubscribe(&self, types: &[UpdateType]) {
        self.subscriptions.remove(types.iter().copied());
    }

    pub fn is_subscribed(&self, update_type: UpdateType) -> bool {
        self.subscriptions.contains(update_type)
    }

    /// Current subscriptions.
    pub fn subscriptions(&self) -> SubscriptionSet {
        self.subscriptions.snapshot()
    }

    /// Ask the transport to close. Safe to call more than once.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.subscriptions.take();
            self.close_notify.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.close_notify.notified().await;
    }
}

/// Registry of live connections.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection.
    pub fn register(&self, connection: Arc<ClientConnection>) -> ConnectionId {
        let id = connection.id;
        self.connections.insert(id, connection);
        info!("Connection {} registered", id);
        id
    }

    /// Remove a connection. Only the first call for an id returns it.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let removed = self.connections.remove(id).map(|(_, c)| c);
        if removed.is_some() {
            info!("Connection {} unregistered", id);
        }
        removed
    }

    /// Get a connection by ID.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(id).map(|r| r.clone())
    }

    /// Connections currently subscribed to `update_type`.
    pub fn subscribers(&self, update_type: UpdateType) -> Vec<Arc<ClientConnection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_subscribed(update_type))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Ids of connections silent for longer than `timeout_ms`.
    pub fn stale(&self, now_ms: i64, timeout_ms: i64) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_stale(now_ms, timeout_ms))
            .map(|entry| *entry.key())
            .collect()
    }

    /// All live connection ids.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Get the number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Total (connection, type) subscription pairs.
    pub fn subscription_count(&self) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.value().subscriptions().len())
            .sum()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(now_ms: i64) -> (Arc<ClientConnection>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(4);
        (Arc::new(ClientConnection::new(tx, now_ms)), rx)
    }

    #[test]
    fn test_touch_is_monotonic() {
        let (conn, _rx) = connection(100);
        conn.touch(250);
        conn.touch(200);
        assert_eq!(conn.last_heartbeat(), 250);
        assert!(!conn.is_stale(280, 30));
        assert!(conn.is_stale(281, 30));
    }

    #[test]
    fn test_subscribers_filter_by_type() {
        let registry = ConnectionRegistry::new();
        let (poi, _rx1) = connection(0);
        let (weather, _rx2) = connection(0);
        poi.subscribe(&[UpdateType::Poi]);
        weather.subscribe(&[UpdateType::Weather, UpdateType::Traffic]);
        registry.register(poi.clone());
        registry.register(weather.clone());

        let subs = registry.subscribers(UpdateType::Poi);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].id, poi.id);
        assert!(registry.subscribers(UpdateType::Route).is_empty());
        assert_eq!(registry.subscription_count(), 3);
    }

    #[test]
    fn test_remove_once() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = connection(0);
        let id = registry.register(conn);
        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_releases_subscriptions_and_wakes() {
        let (conn, _rx) = connection(0);
        conn.subscribe(&[UpdateType::Route]);
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.closed().await })
        };
        conn.close();
        conn.close();
        waiter.await.unwrap();
        assert!(conn.is_closed());
        assert!(conn.subscriptions().is_empty());
    }

    #[test]
    fn test_try_send_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new(tx, 0);
        assert!(conn.try_send(Message::Text("a".into())).is_ok());
        assert!(conn.try_send(Message::Text("b".into())).is_err());
    }
}
