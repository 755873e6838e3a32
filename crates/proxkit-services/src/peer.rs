//! Peer registry — tracks nearby peers and their discovery info.
//!
//! Reads are lock-free and may come from any thread. Every write goes
//! through the discovery engine's transition path, which serializes them.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use proxkit_core::{NodeId, Timestamp};

/// A discovered peer, as last seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub node_id: NodeId,
    /// `None` when the peer publishes no discovery info.
    pub discovery_info: Option<Bytes>,
    /// Timestamp of the most recent sighting.
    pub last_seen_at: Timestamp,
}

/// Outcome of recording one sighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Observation {
    /// First sighting of this peer.
    Discovered(Peer),
    /// Known peer whose discovery info changed.
    Updated(Peer),
    /// Known peer, same info; only the timestamp moved.
    Refreshed,
}

/// The peer registry — keyed on node id.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<DashMap<NodeId, Peer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &NodeId) -> Option<Peer> {
        self.peers.get(node_id).map(|p| p.clone())
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.peers.contains_key(node_id)
    }

    /// Point-in-time copy, ordered by node id. Later registry changes do not
    /// affect the returned vector.
    pub fn snapshot(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.iter().map(|e| e.value().clone()).collect();
        peers.sort_by_key(|p| p.node_id);
        peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Record a sighting and classify it.
    pub(crate) fn observe(&self, node_id: NodeId, info: Option<Bytes>, at: Timestamp) -> Observation {
        match self.peers.entry(node_id) {
            Entry::Vacant(slot) => {
                let peer = Peer {
                    node_id,
                    discovery_info: info,
                    last_seen_at: at,
                };
                slot.insert(peer.clone());
                Observation::Discovered(peer)
            }
            Entry::Occupied(mut slot) => {
                let peer = slot.get_mut();
                peer.last_seen_at = peer.last_seen_at.max(at);
                if peer.discovery_info != info {
                    peer.discovery_info = info;
                    Observation::Updated(peer.clone())
                } else {
                    Observation::Refreshed
                }
            }
        }
    }

    pub(crate) fn remove(&self, node_id: &NodeId) -> Option<Peer> {
        self.peers.remove(node_id).map(|(_, p)| p)
    }

    /// Remove every peer not seen within `window_ms` of `now`.
    /// Returns the removed peers ordered by node id.
    pub(crate) fn remove_stale(&self, now: Timestamp, window_ms: u64) -> Vec<Peer> {
        let stale: Vec<NodeId> = self
            .peers
            .iter()
            .filter(|e| now.saturating_sub(e.value().last_seen_at) >= window_ms)
            .map(|e| *e.key())
            .collect();

        let mut removed: Vec<Peer> = stale
            .iter()
            .filter_map(|id| {
                // Re-check under the shard lock; only the transition path
                // writes, but the predicate must hold at removal time.
                self.peers
                    .remove_if(id, |_, p| now.saturating_sub(p.last_seen_at) >= window_ms)
                    .map(|(_, p)| p)
            })
            .collect();
        removed.sort_by_key(|p| p.node_id);
        removed
    }

    pub(crate) fn clear(&self) {
        self.peers.clear();
    }
}
