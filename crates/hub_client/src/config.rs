//! Hub client configuration.

use crate::error::{ClientError, Result};
use common::heartbeat::DEFAULT_CLIENT_INTERVAL;
use common::HeartbeatPolicy;
use std::time::Duration;
use url::Url;

/// Configuration for a [`HubClient`](crate::HubClient).
#[derive(Debug, Clone)]
pub struct HubClientConfig {
    /// Hub WebSocket endpoint, e.g. `ws://localhost:8090/ws`.
    pub url: String,
    /// Interval between heartbeat control messages.
    pub heartbeat_interval: Duration,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_interval: Duration,
    /// Consecutive failed reconnects before giving up.
    pub max_reconnect_attempts: u32,
    /// Upper bound on a single connect handshake.
    pub connect_timeout: Duration,
}

impl Default for HubClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8090/ws".to_string(),
            heartbeat_interval: DEFAULT_CLIENT_INTERVAL,
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 5,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl HubClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::Config(format!(
                "unsupported scheme {:?}, expected ws or wss",
                url.scheme()
            )));
        }
        if self.heartbeat_interval.is_zero()
            || self.reconnect_interval.is_zero()
            || self.connect_timeout.is_zero()
        {
            return Err(ClientError::Config(
                "intervals and timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Check the heartbeat interval against the hub's eviction policy.
    pub fn validate_against(&self, policy: &HeartbeatPolicy) -> Result<()> {
        self.validate()?;
        policy
            .accepts_client_interval(self.heartbeat_interval)
            .map_err(|e| ClientError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_hub_policy() {
        let config = HubClientConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert!(config.validate_against(&HeartbeatPolicy::default()).is_ok());
    }

    #[test]
    fn test_rejects_slow_heartbeat() {
        let config = HubClientConfig::default().with_heartbeat_interval(Duration::from_secs(30));
        assert!(matches!(
            config.validate_against(&HeartbeatPolicy::default()),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(HubClientConfig::new("not a url").validate().is_err());
        assert!(HubClientConfig::new("http://localhost/ws").validate().is_err());
        assert!(HubClientConfig::new("wss://hub.example.com/ws").validate().is_ok());
    }
}
