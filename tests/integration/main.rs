//! proxkit integration test harness.
//!
//! Tests drive a `KitClient` end to end through its public API. The
//! transport is `MockBackend`: each test plays the network by pushing
//! provider events into the session's sink, with explicit timestamps so
//! liveness expiry is deterministic.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use proxkit_core::{ConnectionState, NodeId, Timestamp};
use proxkit_services::testing::{MockBackend, Recorder};
use proxkit_services::{BackendSink, KitClient, Sighting};

mod discovery;
mod lifecycle;
mod messaging;
mod scenario;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const APP_KEY: &str = "K1";

/// A client plus the mock transport behind it.
pub struct Node {
    pub client: KitClient,
    pub backend: Arc<MockBackend>,
}

impl Node {
    pub fn new() -> Self {
        let backend = Arc::new(MockBackend::new());
        let client = KitClient::new(backend.clone());
        Self { client, backend }
    }

    /// Connect and acknowledge; returns the local node id.
    pub fn connect(&self) -> Result<NodeId> {
        let state = self.client.connect(APP_KEY);
        if state != ConnectionState::Connecting {
            anyhow::bail!("expected connecting, got {state}");
        }
        let me = NodeId::random();
        self.sink()?.acknowledged(me);
        Ok(me)
    }

    /// Sink of the most recent activation.
    pub fn sink(&self) -> Result<BackendSink> {
        self.backend.sink().context("backend was never activated")
    }

    /// Report one proximity sighting of `peer` at `at`.
    pub fn sight(&self, peer: NodeId, info: Option<&'static [u8]>, at: Timestamp) -> Result<()> {
        self.sink()?.sighting(Sighting {
            node_id: peer,
            info: info.map(Bytes::from_static),
            at,
        });
        Ok(())
    }
}

pub fn recorder<E: Clone>() -> Recorder<E> {
    Recorder::new()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_harness_connects() {
    let node = Node::new();
    let me = node.connect().unwrap();
    assert_eq!(node.client.current_node_id().unwrap(), me);
    assert_eq!(node.backend.activations().len(), 1);
}
