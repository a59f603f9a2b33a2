//! Shared protocol types for the live update hub and its clients.

pub mod error;
pub mod heartbeat;
pub mod messages;
pub mod subscription;

pub use error::Error;
pub use heartbeat::HeartbeatPolicy;
pub use messages::{ControlMessage, Update, UpdateType};
pub use subscription::{SharedSubscriptions, SubscriptionSet};
