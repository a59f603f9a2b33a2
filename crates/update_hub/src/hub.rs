//! The update hub: subscription-filtered fan-out and connection lifecycle.
//!
//! Producers call [`Hub::broadcast`] with a shared `Arc<Hub>`; each socket task
//! feeds inbound frames to [`Hub::on_message`] and calls
//! [`Hub::on_disconnect`] when it ends. The heartbeat sweep runs as its own
//! task and stops when its shutdown channel fires.

use crate::config::HubConfig;
use crate::connection::{ClientConnection, ConnectionId, ConnectionRegistry, HeartbeatClock};
use crate::error::{HubError, Result};
use crate::stats::{HubStats, HubStatsSnapshot};
use axum::extract::ws::Message;
use common::{ControlMessage, Update};
use metrics::{counter, gauge};
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections the update was queued for.
    pub delivered: usize,
    /// Subscribed connections whose queue was full or closed.
    pub failed: usize,
}

/// Server-side broadcast/subscription registry.
pub struct Hub {
    registry: ConnectionRegistry,
    stats: HubStats,
    clock: HeartbeatClock,
    config: HubConfig,
    /// Connection slots held, including ones not yet in the registry.
    active: AtomicUsize,
}

impl Hub {
    /// Create a hub. The configuration must already be validated.
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            stats: HubStats::new(),
            clock: HeartbeatClock::new(),
            config,
            active: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn stats(&self) -> HubStatsSnapshot {
        self.stats.snapshot()
    }

    /// Current heartbeat clock reading.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether new connections should be refused.
    pub fn at_capacity(&self) -> bool {
        self.active.load(Ordering::Acquire) >= self.config.max_connections
    }

    /// Count a refused upgrade.
    pub fn reject_connection(&self) {
        HubStats::incr(&self.stats.rejected_connections);
        counter!("hub_rejected_connections_total").increment(1);
        warn!(
            "Refusing connection: {} live connections at limit",
            self.registry.len()
        );
    }

    /// Register a new connection with an empty subscription set.
    ///
    /// Returns the connection and the receiving end of its outbound queue,
    /// which the caller drains into the transport.
    pub fn connect(&self) -> Result<(Arc<ClientConnection>, mpsc::Receiver<Message>)> {
        let max = self.config.max_connections;
        let reserved = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            });
        if reserved.is_err() {
            self.reject_connection();
            return Err(HubError::AtCapacity(max));
        }

        let (tx, rx) = mpsc::channel(self.config.outbound_queue_size);
        let connection = Arc::new(ClientConnection::new(tx, self.clock.now_ms()));
        self.registry.register(connection.clone());

        HubStats::incr(&self.stats.connections_total);
        counter!("hub_connections_total").increment(1);
        gauge!("hub_active_connections").set(self.registry.len() as f64);

        Ok((connection, rx))
    }

    /// Send `update` to every connection subscribed to its type.
    ///
    /// Per-connection failures are logged and counted; they never stop
    /// delivery to the rest of the snapshot.
    pub fn broadcast(&self, update: &Update) -> BroadcastReport {
        HubStats::incr(&self.stats.updates_broadcast);
        counter!("hub_updates_broadcast_total", "type" => update.update_type.as_str())
            .increment(1);

        let recipients = self.registry.subscribers(update.update_type);
        if recipients.is_empty() {
            debug!("No connections subscribed to {}", update.update_type);
            return BroadcastReport::default();
        }

        // Pre-serialize once
        let json = match update.to_json() {
            Ok(j) => j,
            Err(e) => {
                warn!("Failed to serialize {} update: {}", update.update_type, e);
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        for connection in recipients {
            match connection.try_send(Message::Text(json.clone())) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    debug!("Failed to send to connection {}: {}", connection.id, e);
                }
            }
        }

        HubStats::add(&self.stats.deliveries, report.delivered as u64);
        if report.failed > 0 {
            HubStats::add(&self.stats.send_failures, report.failed as u64);
            counter!("hub_send_failures_total").increment(report.failed as u64);
        }

        debug!(
            "Broadcast {} update to {} connections ({} failed)",
            update.update_type, report.delivered, report.failed
        );
        report
    }

    /// Handle one inbound text frame from `connection`.
    ///
    /// A malformed frame is counted and returned as an error; the connection
    /// stays open.
    pub fn on_message(&self, connection: &ClientConnection, raw: &str) -> Result<()> {
        connection.touch(self.clock.now_ms());

        let msg = match ControlMessage::from_json(raw) {
            Ok(msg) => msg,
            Err(e) => {
                self.on_protocol_error(connection, &e);
                return Err(HubError::Protocol(e));
            }
        };

        match msg {
            ControlMessage::Subscribe { types } => {
                debug!("Connection {} subscribing to {:?}", connection.id, types);
                connection.subscribe(&types);
            }
            ControlMessage::Unsubscribe { types } => {
                debug!("Connection {} unsubscribing from {:?}", connection.id, types);
                connection.unsubscribe(&types);
            }
            ControlMessage::Heartbeat => {
                connection.touch(self.clock.now_ms());
                HubStats::incr(&self.stats.heartbeats);
            }
            ControlMessage::Unknown => {
                warn!("Connection {} sent unknown action: {}", connection.id, raw);
                HubStats::incr(&self.stats.unknown_actions);
                counter!("hub_unknown_actions_total").increment(1);
            }
        }
        Ok(())
    }

    /// Count an inbound frame that could not be read as a control message.
    pub fn on_protocol_error(&self, connection: &ClientConnection, detail: &dyn Display) {
        warn!("Protocol error on connection {}: {}", connection.id, detail);
        HubStats::incr(&self.stats.protocol_errors);
        counter!("hub_protocol_errors_total").increment(1);
    }

    /// Record inbound traffic that is not a control message (ping/pong).
    pub fn on_activity(&self, connection: &ClientConnection) {
        connection.touch(self.clock.now_ms());
    }

    /// Remove a connection and close its transport.
    ///
    /// Returns true only for the call that actually removed it.
    pub fn on_disconnect(&self, id: &ConnectionId) -> bool {
        let Some(connection) = self.registry.remove(id) else {
            return false;
        };
        connection.close();
        self.active.fetch_sub(1, Ordering::AcqRel);
        counter!("hub_disconnections_total").increment(1);
        gauge!("hub_active_connections").set(self.registry.len() as f64);
        true
    }

    /// Log a transport error. Removal is driven by the transport closing.
    pub fn on_error(&self, connection: &ClientConnection, error: &dyn Display) {
        warn!("Transport error on connection {}: {}", connection.id, error);
        HubStats::incr(&self.stats.transport_errors);
        counter!("hub_transport_errors_total").increment(1);
    }

    /// Evict every connection silent for longer than the heartbeat timeout.
    pub fn evict_stale(&self) -> Vec<ConnectionId> {
        self.evict_stale_at(self.clock.now_ms())
    }

    /// Evict connections stale as of heartbeat clock time `now_ms`.
    pub fn evict_stale_at(&self, now_ms: i64) -> Vec<ConnectionId> {
        let timeout_ms = self.config.heartbeat.timeout.as_millis() as i64;
        let mut evicted = Vec::new();

        for id in self.registry.stale(now_ms, timeout_ms) {
            // Re-check under the current reading; a heartbeat may have landed.
            let still_stale = self
                .registry
                .get(&id)
                .is_some_and(|c| c.is_stale(now_ms, timeout_ms));
            if still_stale && self.on_disconnect(&id) {
                warn!("Evicting connection {}: no heartbeat for over {}ms", id, timeout_ms);
                HubStats::incr(&self.stats.timeout_evictions);
                counter!("hub_timeout_evictions_total").increment(1);
                evicted.push(id);
            }
        }
        evicted
    }

    /// Run the heartbeat sweep until `shutdown_rx` fires or closes.
    pub async fn run_heartbeat_sweep(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        let period = self.config.heartbeat.sweep_interval;
        info!(
            "Heartbeat sweep running every {:?} (timeout {:?})",
            period, self.config.heartbeat.timeout
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.reset(); // Don't fire immediately

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Heartbeat sweep received shutdown signal");
                    break;
                }

                _ = ticker.tick() => {
                    let evicted = self.evict_stale();
                    if !evicted.is_empty() {
                        info!("Heartbeat sweep evicted {} connections", evicted.len());
                    }
                }
            }
        }

        info!("Heartbeat sweep stopped");
    }

    /// Close every connection, e.g. on shutdown.
    pub fn close_all(&self) {
        for id in self.registry.ids() {
            self.on_disconnect(&id);
        }
    }
}
