//! Heartbeat timing shared by the hub and its clients.
//!
//! The hub sweeps every `sweep_interval` and evicts connections silent for
//! longer than `timeout`. Clients send a heartbeat every `client_interval`.
//! A healthy client must always land a heartbeat before the sweep that would
//! evict it, so `client_interval + sweep_interval <= timeout` is required.

use crate::error::{Error, Result};
use std::time::Duration;

/// Default hub sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Default staleness threshold (3x the sweep interval).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default client heartbeat interval.
pub const DEFAULT_CLIENT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    /// How often the hub scans for stale connections.
    pub sweep_interval: Duration,
    /// Silence after which a connection is evicted.
    pub timeout: Duration,
    /// How often clients send a heartbeat.
    pub client_interval: Duration,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            client_interval: DEFAULT_CLIENT_INTERVAL,
        }
    }
}

impl HeartbeatPolicy {
    /// Check the interval-to-timeout contract.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero()
            || self.timeout.is_zero()
            || self.client_interval.is_zero()
        {
            return Err(Error::InvalidHeartbeatPolicy(
                "intervals and timeout must be non-zero".to_string(),
            ));
        }
        if self.timeout <= self.sweep_interval {
            return Err(Error::InvalidHeartbeatPolicy(format!(
                "timeout {:?} must exceed sweep interval {:?}",
                self.timeout, self.sweep_interval
            )));
        }
        if self.client_interval >= self.timeout {
            return Err(Error::InvalidHeartbeatPolicy(format!(
                "client interval {:?} must be shorter than timeout {:?}",
                self.client_interval, self.timeout
            )));
        }
        if self.client_interval + self.sweep_interval > self.timeout {
            return Err(Error::InvalidHeartbeatPolicy(format!(
                "client interval {:?} plus sweep interval {:?} exceeds timeout {:?}",
                self.client_interval, self.sweep_interval, self.timeout
            )));
        }
        Ok(())
    }

    /// Whether a client heartbeat interval satisfies this policy.
    pub fn accepts_client_interval(&self, interval: Duration) -> Result<()> {
        Self {
            client_interval: interval,
            ..*self
        }
        .validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_default_policy_is_valid() {
        assert!(HeartbeatPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_client_interval_at_timeout() {
        let policy = HeartbeatPolicy {
            sweep_interval: secs(10),
            timeout: secs(30),
            client_interval: secs(30),
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_rejects_thin_margin() {
        // 25s heartbeats with a 10s sweep can miss a 30s window.
        let policy = HeartbeatPolicy {
            sweep_interval: secs(10),
            timeout: secs(30),
            client_interval: secs(25),
        };
        assert!(policy.validate().is_err());
        assert!(policy.accepts_client_interval(secs(20)).is_ok());
    }

    #[test]
    fn test_rejects_timeout_below_sweep() {
        let policy = HeartbeatPolicy {
            sweep_interval: secs(10),
            timeout: secs(10),
            client_interval: secs(5),
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_rejects_zero() {
        let policy = HeartbeatPolicy {
            sweep_interval: Duration::ZERO,
            ..HeartbeatPolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
