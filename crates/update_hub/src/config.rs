//! Hub configuration, read from the environment.

use crate::connection::DEFAULT_OUTBOUND_QUEUE_SIZE;
use crate::error::{HubError, Result};
use common::HeartbeatPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default cap on concurrent connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Port for the WebSocket/HTTP listener.
    pub http_port: u16,
    /// Port for the Prometheus exporter.
    pub metrics_port: u16,
    /// Sweep/timeout/client heartbeat timing.
    pub heartbeat: HeartbeatPolicy,
    /// Per-connection outbound queue capacity.
    pub outbound_queue_size: usize,
    /// New upgrades are refused once this many connections are live.
    pub max_connections: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            http_port: 8090,
            metrics_port: 9095,
            heartbeat: HeartbeatPolicy::default(),
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl HubConfig {
    /// Build from environment variables, falling back to defaults.
    ///
    /// - `HTTP_PORT`, `METRICS_PORT`
    /// - `HEARTBEAT_SWEEP_SECS`, `HEARTBEAT_TIMEOUT_SECS`, `CLIENT_HEARTBEAT_SECS`
    /// - `OUTBOUND_QUEUE_SIZE`, `MAX_CONNECTIONS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str, default: u64| parse_var(&lookup, key, default);

        let config = Self {
            http_port: parse_var(&lookup, "HTTP_PORT", defaults.http_port)?,
            metrics_port: parse_var(&lookup, "METRICS_PORT", defaults.metrics_port)?,
            heartbeat: HeartbeatPolicy {
                sweep_interval: Duration::from_secs(get(
                    "HEARTBEAT_SWEEP_SECS",
                    defaults.heartbeat.sweep_interval.as_secs(),
                )?),
                timeout: Duration::from_secs(get(
                    "HEARTBEAT_TIMEOUT_SECS",
                    defaults.heartbeat.timeout.as_secs(),
                )?),
                client_interval: Duration::from_secs(get(
                    "CLIENT_HEARTBEAT_SECS",
                    defaults.heartbeat.client_interval.as_secs(),
                )?),
            },
            outbound_queue_size: parse_var(
                &lookup,
                "OUTBOUND_QUEUE_SIZE",
                defaults.outbound_queue_size,
            )?,
            max_connections: parse_var(&lookup, "MAX_CONNECTIONS", defaults.max_connections)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.heartbeat
            .validate()
            .map_err(|e| HubError::Config(e.to_string()))?;
        if self.outbound_queue_size == 0 {
            return Err(HubError::Config(
                "OUTBOUND_QUEUE_SIZE must be at least 1".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(HubError::Config(
                "MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| HubError::Config(format!("{} must be a number, got {:?}", key, raw))),
        None => Ok(default),
    }
}
