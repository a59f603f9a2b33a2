//! Wire protocol shared by the hub and its clients.
//!
//! Clients send [`ControlMessage`]s, the hub pushes [`Update`]s. Both are JSON
//! text frames; there are no acknowledgement frames.

use crate::error::Error;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Update types
// ============================================================================

/// Category of live data a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateType {
    /// Points of interest along a route.
    Poi,
    Weather,
    Traffic,
    /// Route events (reroutes, closures, arrival).
    Route,
}

impl UpdateType {
    /// Every update type, in wire order.
    pub const ALL: [UpdateType; 4] = [
        UpdateType::Poi,
        UpdateType::Weather,
        UpdateType::Traffic,
        UpdateType::Route,
    ];

    /// Wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Poi => "POI",
            UpdateType::Weather => "WEATHER",
            UpdateType::Traffic => "TRAFFIC",
            UpdateType::Route => "ROUTE",
        }
    }

    pub(crate) fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UpdateType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownUpdateType(s.to_string()))
    }
}

// ============================================================================
// Server → Client
// ============================================================================

/// One typed payload pushed from a producer to subscribed clients.
///
/// `data` is opaque to the hub; consumers deserialize it based on `update_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    #[serde(rename = "type")]
    pub update_type: UpdateType,
    pub data: serde_json::Value,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl Update {
    /// Create an update stamped with the current wall clock.
    pub fn now(update_type: UpdateType, data: serde_json::Value) -> Self {
        Self {
            update_type,
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Serialize to the JSON text sent over the wire.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an update frame.
    pub fn from_json(raw: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(raw)?)
    }
}

// ============================================================================
// Client → Server
// ============================================================================

/// Control message sent from a client to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Add types to the connection's subscription set.
    Subscribe { types: Vec<UpdateType> },
    /// Remove types from the connection's subscription set.
    Unsubscribe { types: Vec<UpdateType> },
    /// Liveness signal; resets the connection's staleness clock.
    Heartbeat,
    /// Any action this hub does not understand.
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    pub fn subscribe(types: impl IntoIterator<Item = UpdateType>) -> Self {
        ControlMessage::Subscribe {
            types: types.into_iter().collect(),
        }
    }

    pub fn unsubscribe(types: impl IntoIterator<Item = UpdateType>) -> Self {
        ControlMessage::Unsubscribe {
            types: types.into_iter().collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_wire_format() {
        let update = Update {
            update_type: UpdateType::Weather,
            data: json!({"temp_c": 12.5}),
            timestamp: 1_704_067_200_000,
        };
        let parsed: serde_json::Value = serde_json::from_str(&update.to_json().unwrap()).unwrap();
        assert_eq!(parsed["type"], "WEATHER");
        assert_eq!(parsed["data"]["temp_c"], 12.5);
        assert_eq!(parsed["timestamp"], 1_704_067_200_000i64);
    }

    #[test]
    fn test_parse_subscribe() {
        let msg = ControlMessage::from_json(r#"{"action":"subscribe","types":["POI","TRAFFIC"]}"#)
            .unwrap();
        assert_eq!(
            msg,
            ControlMessage::Subscribe {
                types: vec![UpdateType::Poi, UpdateType::Traffic]
            }
        );
    }

    #[test]
    fn test_parse_heartbeat() {
        let msg = ControlMessage::from_json(r#"{"action":"heartbeat"}"#).unwrap();
        assert_eq!(msg, ControlMessage::Heartbeat);
        assert_eq!(msg.to_json().unwrap(), r#"{"action":"heartbeat"}"#);
    }

    #[test]
    fn test_unknown_action() {
        let msg = ControlMessage::from_json(r#"{"action":"frobnicate"}"#).unwrap();
        assert_eq!(msg, ControlMessage::Unknown);
    }

    #[test]
    fn test_subscribe_requires_types() {
        assert!(ControlMessage::from_json(r#"{"action":"subscribe"}"#).is_err());
        assert!(ControlMessage::from_json(r#"{"action":"subscribe","types":["SNOW"]}"#).is_err());
        assert!(ControlMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_update_type_from_str() {
        assert_eq!("poi".parse::<UpdateType>().unwrap(), UpdateType::Poi);
        assert_eq!(" ROUTE ".parse::<UpdateType>().unwrap(), UpdateType::Route);
        assert!("snow".parse::<UpdateType>().is_err());
    }
}
