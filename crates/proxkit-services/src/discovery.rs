//! Discovery engine — turns raw sightings into peer-presence events and
//! holds the local node's published discovery info.
//!
//! Two independent paths share the same presence rules:
//! - proximity (P2P) sightings carry optional discovery info and feed the
//!   peer registry and the `DiscoveryEvent` stream;
//! - location-assisted (geo) sightings carry no info and feed a separate
//!   registry and the `GeoEvent` stream.
//!
//! All registry writes happen under `transitions`, and each event is queued
//! on its stream before that lock is released, so listeners observe events
//! in exactly the order the transitions happened.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use bytes::Bytes;
use proxkit_core::{KitError, NodeId, ServiceState, Timestamp, MAX_DISCOVERY_INFO_LEN};

use crate::listener::{EventStream, Listener, ListenerId};
use crate::peer::{Observation, Peer, PeerRegistry};

/// Event delivered to proximity discovery listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    StateChanged(ServiceState),
    PeerDiscovered(Peer),
    PeerUpdatedDiscoveryInfo(Peer),
    PeerLost(Peer),
}

/// Event delivered to location-assisted discovery listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoEvent {
    StateChanged(ServiceState),
    PeerDiscovered(NodeId),
    PeerLost(NodeId),
}

/// One raw proximity observation of another node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    pub node_id: NodeId,
    pub info: Option<Bytes>,
    pub at: Timestamp,
}

struct ModeState {
    p2p: ServiceState,
    geo: ServiceState,
}

pub struct DiscoveryEngine {
    registry: PeerRegistry,
    geo_registry: PeerRegistry,
    published: RwLock<Option<Bytes>>,
    p2p_events: EventStream<DiscoveryEvent>,
    geo_events: EventStream<GeoEvent>,
    transitions: Mutex<ModeState>,
    liveness_window_ms: u64,
}

/// Reject discovery info that can never fit in a beacon.
pub fn validate_discovery_info(info: &[u8]) -> Result<(), KitError> {
    if info.len() > MAX_DISCOVERY_INFO_LEN {
        return Err(KitError::InfoTooLong {
            len: info.len(),
            max: MAX_DISCOVERY_INFO_LEN,
        });
    }
    Ok(())
}

impl DiscoveryEngine {
    pub fn new(liveness_window_ms: u64) -> Self {
        Self {
            registry: PeerRegistry::new(),
            geo_registry: PeerRegistry::new(),
            published: RwLock::new(None),
            p2p_events: EventStream::new("p2p"),
            geo_events: EventStream::new("geo"),
            transitions: Mutex::new(ModeState {
                p2p: ServiceState::Off,
                geo: ServiceState::Off,
            }),
            liveness_window_ms,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ModeState> {
        self.transitions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn geo_registry(&self) -> &PeerRegistry {
        &self.geo_registry
    }

    pub fn liveness_window_ms(&self) -> u64 {
        self.liveness_window_ms
    }

    // ── Published info ───────────────────────────────────────────────────────

    /// Replace the published discovery info. On `InfoTooLong` the previous
    /// payload is left untouched.
    pub fn set_discovery_info(&self, info: Option<Bytes>) -> Result<(), KitError> {
        if let Some(bytes) = &info {
            validate_discovery_info(bytes)?;
        }
        let mut published = self.published.write().unwrap_or_else(|e| e.into_inner());
        *published = info;
        Ok(())
    }

    pub fn discovery_info(&self) -> Option<Bytes> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ── Listeners ────────────────────────────────────────────────────────────

    pub fn add_p2p_listener(&self, listener: Arc<dyn Listener<DiscoveryEvent>>) -> ListenerId {
        self.p2p_events.add(listener)
    }

    pub fn remove_p2p_listener(&self, id: ListenerId) -> bool {
        self.p2p_events.remove(id)
    }

    pub fn add_geo_listener(&self, listener: Arc<dyn Listener<GeoEvent>>) -> ListenerId {
        self.geo_events.add(listener)
    }

    pub fn remove_geo_listener(&self, id: ListenerId) -> bool {
        self.geo_events.remove(id)
    }

    // ── Transitions ──────────────────────────────────────────────────────────

    fn is_closed(&self) -> bool {
        self.p2p_events.is_closed()
    }

    pub fn on_sighting(&self, sighting: Sighting) {
        if let Some(info) = &sighting.info {
            if validate_discovery_info(info).is_err() {
                tracing::warn!(peer = %sighting.node_id, len = info.len(), "dropping sighting with oversized info");
                return;
            }
        }
        {
            let _guard = self.lock();
            if self.is_closed() {
                return;
            }
            let id = sighting.node_id;
            match self.registry.observe(id, sighting.info, sighting.at) {
                Observation::Discovered(peer) => {
                    tracing::debug!(peer = %id, info_len = info_len(&peer), "peer discovered");
                    self.p2p_events.enqueue(DiscoveryEvent::PeerDiscovered(peer));
                }
                Observation::Updated(peer) => {
                    tracing::debug!(peer = %id, info_len = info_len(&peer), "peer updated discovery info");
                    self.p2p_events
                        .enqueue(DiscoveryEvent::PeerUpdatedDiscoveryInfo(peer));
                }
                Observation::Refreshed => {
                    tracing::trace!(peer = %id, "peer refreshed");
                }
            }
        }
        self.p2p_events.drain();
    }

    pub fn on_geo_sighting(&self, node_id: NodeId, at: Timestamp) {
        {
            let _guard = self.lock();
            if self.is_closed() {
                return;
            }
            if let Observation::Discovered(_) = self.geo_registry.observe(node_id, None, at) {
                tracing::debug!(peer = %node_id, "geo peer discovered");
                self.geo_events.enqueue(GeoEvent::PeerDiscovered(node_id));
            }
        }
        self.geo_events.drain();
    }

    /// Provider-signalled loss of a proximity peer, ahead of the liveness window.
    pub fn on_peer_lost(&self, node_id: &NodeId) {
        {
            let _guard = self.lock();
            if self.is_closed() {
                return;
            }
            if let Some(peer) = self.registry.remove(node_id) {
                tracing::debug!(peer = %node_id, "peer lost");
                self.p2p_events.enqueue(DiscoveryEvent::PeerLost(peer));
            }
        }
        self.p2p_events.drain();
    }

    /// Provider-signalled loss of a geo peer.
    pub fn on_geo_peer_lost(&self, node_id: &NodeId) {
        {
            let _guard = self.lock();
            if self.is_closed() {
                return;
            }
            if self.geo_registry.remove(node_id).is_some() {
                tracing::debug!(peer = %node_id, "geo peer lost");
                self.geo_events.enqueue(GeoEvent::PeerLost(*node_id));
            }
        }
        self.geo_events.drain();
    }

    /// Sweep both registries and emit a loss for every peer whose last
    /// sighting is outside the liveness window.
    pub fn expire(&self, now: Timestamp) {
        {
            let _guard = self.lock();
            if self.is_closed() {
                return;
            }
            let lost = self.registry.remove_stale(now, self.liveness_window_ms);
            let geo_lost = self.geo_registry.remove_stale(now, self.liveness_window_ms);
            if !lost.is_empty() || !geo_lost.is_empty() {
                tracing::debug!(
                    p2p = lost.len(),
                    geo = geo_lost.len(),
                    "expired peers outside liveness window"
                );
            }
            for peer in lost {
                self.p2p_events.enqueue(DiscoveryEvent::PeerLost(peer));
            }
            for peer in geo_lost {
                self.geo_events.enqueue(GeoEvent::PeerLost(peer.node_id));
            }
        }
        self.p2p_events.drain();
        self.geo_events.drain();
    }

    pub fn set_p2p_state(&self, state: ServiceState) {
        {
            let mut modes = self.lock();
            if modes.p2p == state {
                return;
            }
            tracing::info!(from = %modes.p2p, to = %state, "p2p discovery state changed");
            modes.p2p = state;
            self.p2p_events.enqueue(DiscoveryEvent::StateChanged(state));
        }
        self.p2p_events.drain();
    }

    pub fn set_geo_state(&self, state: ServiceState) {
        {
            let mut modes = self.lock();
            if modes.geo == state {
                return;
            }
            tracing::info!(from = %modes.geo, to = %state, "geo discovery state changed");
            modes.geo = state;
            self.geo_events.enqueue(GeoEvent::StateChanged(state));
        }
        self.geo_events.drain();
    }

    pub fn p2p_state(&self) -> ServiceState {
        self.lock().p2p
    }

    pub fn geo_state(&self) -> ServiceState {
        self.lock().geo
    }

    /// Silence both streams and forget every peer.
    pub fn close(&self) {
        let _guard = self.lock();
        self.p2p_events.close();
        self.geo_events.close();
        self.registry.clear();
        self.geo_registry.clear();
    }
}

fn info_len(peer: &Peer) -> i64 {
    peer.discovery_info.as_ref().map(|i| i.len() as i64).unwrap_or(-1)
}
