//! proxkit-services — the discovery and messaging engine.
//!
//! `KitClient` is the entry point. It drives a `Backend` (the transport)
//! and exposes discovery and messaging for the current session.

pub mod backend;
pub mod client;
pub mod discovery;
pub mod listener;
pub mod messaging;
pub mod peer;
pub mod testing;

pub use backend::{ActivationRequest, Backend, BackendSink};
pub use client::{DiscoveryServices, EngineConfig, KitClient, MessageServices};
pub use discovery::{validate_discovery_info, DiscoveryEngine, DiscoveryEvent, GeoEvent, Sighting};
pub use listener::{EventStream, Listener, ListenerId};
pub use messaging::{validate_destination, MessageEvent, MessagingService};
pub use peer::{Peer, PeerRegistry};
