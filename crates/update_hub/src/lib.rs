//! Update hub: real-time fan-out of live route data to WebSocket clients.
//!
//! This service:
//! - Accepts WebSocket connections from map clients
//! - Tracks which update types (POI, weather, traffic, route) each client wants
//! - Pushes producer updates to exactly the subscribed clients
//! - Evicts connections that stop sending heartbeats
//!
//! ## Architecture
//!
//! ```text
//! producers (in-process Arc<Hub> or POST /updates)
//!         ↓
//! Hub::broadcast (subscription filter, pre-serialized)
//!         ↓
//! ConnectionRegistry (DashMap) → bounded per-connection queues
//!         ↓
//! per-socket writer tasks → WebSocket clients
//! ```
//!
//! Each socket has one reader loop and one writer task. A full outbound queue
//! drops that update for that connection only.

pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod stats;
pub mod ws_server;

pub use config::HubConfig;
pub use connection::{ClientConnection, ConnectionId, ConnectionRegistry};
pub use error::{HubError, Result};
pub use hub::{BroadcastReport, Hub};
pub use stats::HubStatsSnapshot;
pub use ws_server::{create_router, AppState};
