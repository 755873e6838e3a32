//! proxkit-core — shared types, wire format, and configuration.
//! All other proxkit crates depend on this one.

pub mod config;
pub mod error;
pub mod message;
pub mod node;
pub mod state;
pub mod wire;

pub use error::{FailureReason, KitError};
pub use message::{Message, OutboundMessage, Timestamp};
pub use node::NodeId;
pub use state::{ConnectionState, LifecycleEvent, LifecycleInput, ServiceState, ServiceStatus};
pub use wire::MAX_DISCOVERY_INFO_LEN;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
