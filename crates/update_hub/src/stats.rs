//! In-process hub counters.
//!
//! Every counter here is also emitted through the `metrics` facade; these
//! atomics back the `/health` endpoint and let tests observe hub behaviour.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct HubStats {
    pub connections_total: AtomicU64,
    pub rejected_connections: AtomicU64,
    pub updates_broadcast: AtomicU64,
    pub deliveries: AtomicU64,
    pub send_failures: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub unknown_actions: AtomicU64,
    pub heartbeats: AtomicU64,
    pub timeout_evictions: AtomicU64,
    pub transport_errors: AtomicU64,
}

/// Point-in-time copy of [`HubStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStatsSnapshot {
    pub connections_total: u64,
    pub rejected_connections: u64,
    pub updates_broadcast: u64,
    pub deliveries: u64,
    pub send_failures: u64,
    pub protocol_errors: u64,
    pub unknown_actions: u64,
    pub heartbeats: u64,
    pub timeout_evictions: u64,
    pub transport_errors: u64,
}

impl HubStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HubStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        HubStatsSnapshot {
            connections_total: load(&self.connections_total),
            rejected_connections: load(&self.rejected_connections),
            updates_broadcast: load(&self.updates_broadcast),
            deliveries: load(&self.deliveries),
            send_failures: load(&self.send_failures),
            protocol_errors: load(&self.protocol_errors),
            unknown_actions: load(&self.unknown_actions),
            heartbeats: load(&self.heartbeats),
            timeout_evictions: load(&self.timeout_evictions),
            transport_errors: load(&self.transport_errors),
        }
    }
}
