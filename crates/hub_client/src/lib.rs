//! Client library for the live update hub.
//!
//! Keeps a logical subscription alive across an unreliable WebSocket:
//! heartbeats while connected, fixed-interval reconnects with a bounded
//! attempt budget, and transparent re-subscription after every reconnect.
//!
//! ```no_run
//! use common::UpdateType;
//! use hub_client::{HubClient, HubClientConfig};
//!
//! # async fn run() -> hub_client::Result<()> {
//! let client = HubClient::new(HubClientConfig::new("ws://localhost:8090/ws"));
//! client.on_type(UpdateType::Weather, |update| println!("weather: {}", update.data));
//! client.connect().await?;
//! client.subscribe(&[UpdateType::Weather, UpdateType::Traffic]).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod listeners;

pub use client::{ClientStatus, HubClient};
pub use config::HubClientConfig;
pub use error::{ClientError, Result};
