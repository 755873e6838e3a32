//! Beacon plumbing — periodic broadcast of the local beacon, the listener
//! that turns received beacons into sightings, and the address book that
//! maps node ids to the link-local address their beacons came from.
//!
//! The address book is populated by the listener and read by the message
//! sender. Entries expire with the same liveness window as peers, on the
//! same session clock.

use std::net::SocketAddrV6;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use proxkit_core::{NodeId, Timestamp};

pub mod broadcast;
pub mod listener;

/// Monotonic milliseconds since the session started.
///
/// Sightings and liveness ticks are both stamped from this, so a wall-clock
/// step cannot expire every peer at once or keep a dead one alive.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.start.elapsed().as_millis() as Timestamp
    }
}

/// Where a peer's last beacon came from.
#[derive(Debug, Clone, Copy)]
pub struct PeerAddr {
    /// Message socket of the peer: beacon source address, message port.
    pub addr: SocketAddrV6,
    /// Session time of the last refresh.
    pub last_seen: Timestamp,
}

/// Shared between the listener, expiry and message tasks of one session.
#[derive(Clone, Default)]
pub struct AddressBook {
    entries: Arc<DashMap<NodeId, PeerAddr>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, node_id: NodeId, addr: SocketAddrV6, at: Timestamp) {
        let mut entry = self.entries.entry(node_id).or_insert(PeerAddr {
            addr,
            last_seen: at,
        });
        entry.addr = addr;
        entry.last_seen = entry.last_seen.max(at);
    }

    pub fn lookup(&self, node_id: &NodeId) -> Option<SocketAddrV6> {
        self.entries.get(node_id).map(|e| e.addr)
    }

    /// Drop entries not refreshed within `window_ms` of `now`. Returns how
    /// many went.
    pub fn expire(&self, now: Timestamp, window_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.last_seen) < window_ms);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn addr(port: u16) -> SocketAddrV6 {
        SocketAddrV6::new(Ipv6Addr::LOCALHOST, port, 0, 0)
    }

    #[test]
    fn record_overwrites_previous_address() {
        let book = AddressBook::new();
        let id = NodeId::random();
        book.record(id, addr(1), 10);
        book.record(id, addr(2), 20);
        assert_eq!(book.lookup(&id), Some(addr(2)));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn expire_uses_the_liveness_window() {
        let book = AddressBook::new();
        book.record(NodeId::random(), addr(1), 1_000);
        assert_eq!(book.expire(10_999, 10_000), 0);
        assert_eq!(book.expire(11_000, 10_000), 1);
        assert_eq!(book.len(), 0);
    }

    #[test]
    fn late_stamp_does_not_rewind_last_seen() {
        let book = AddressBook::new();
        let id = NodeId::random();
        book.record(id, addr(1), 5_000);
        book.record(id, addr(1), 4_000);
        assert_eq!(book.expire(14_500, 10_000), 0);
    }

    #[test]
    fn session_clock_is_monotonic_from_zero() {
        let clock = SessionClock::start();
        let first = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = clock.now();
        assert!(first < 1_000);
        assert!(second >= first + 5);
    }
}
