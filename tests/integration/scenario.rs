use crate::*;

use proxkit_core::LifecycleEvent;
use proxkit_services::{DiscoveryEvent, MessageEvent};

/// Connect, publish, discover, lose, disconnect, and then nothing.
#[test]
fn test_full_session_scenario() {
    let node = Node::new();
    let lifecycle = recorder::<LifecycleEvent>();
    node.client.add_lifecycle_listener(lifecycle.clone());
    assert_eq!(node.client.state(), ConnectionState::Disconnected);

    node.connect().unwrap();
    assert_eq!(lifecycle.events(), vec![LifecycleEvent::Connected]);

    let discovery = node.client.discovery().unwrap();
    let peers = recorder::<DiscoveryEvent>();
    let messages = recorder::<MessageEvent>();
    discovery.add_p2p_listener(peers.clone()).unwrap();
    node.client
        .messaging()
        .unwrap()
        .add_listener(messages.clone())
        .unwrap();

    discovery.set_discovery_info(vec![10u8, 20, 30]).unwrap();
    assert_eq!(
        node.backend.published(),
        vec![Some(Bytes::from_static(&[10, 20, 30]))]
    );

    let q = NodeId::random();
    node.sight(q, Some(&[10, 20, 30]), 1_000).unwrap();
    let discovered = match peers.events().as_slice() {
        [DiscoveryEvent::PeerDiscovered(p)] => p.clone(),
        other => panic!("expected one discovery, got {other:?}"),
    };
    assert_eq!(discovered.node_id, q);
    assert_eq!(discovered.discovery_info.as_deref(), Some(&[10u8, 20, 30][..]));

    // No further sighting of Q within the window.
    let sink = node.sink().unwrap();
    sink.tick(5_000);
    assert_eq!(peers.len(), 1);
    sink.tick(11_000);
    assert!(matches!(
        peers.events().last(),
        Some(DiscoveryEvent::PeerLost(p)) if p.node_id == q
    ));

    node.client.disconnect();
    let (lifecycle_seen, peers_seen) = (lifecycle.len(), peers.len());

    node.sight(q, Some(&[10, 20, 30]), 12_000).unwrap();
    sink.tick(50_000);
    sink.lost();
    sink.message_received(proxkit_core::Message {
        origin: q,
        msg_type: "t".into(),
        payload: Bytes::new(),
        received_at: 12_001,
    });

    assert_eq!(lifecycle.len(), lifecycle_seen);
    assert_eq!(peers.len(), peers_seen);
    assert!(messages.is_empty());
    assert_eq!(node.client.state(), ConnectionState::Disconnected);
}

/// A second session starts clean: no peers, no listeners, no info.
#[test]
fn test_reconnect_starts_fresh_session() {
    let node = Node::new();
    node.connect().unwrap();
    let old = node.client.discovery().unwrap();
    let peers = recorder::<DiscoveryEvent>();
    old.add_p2p_listener(peers.clone()).unwrap();
    old.set_discovery_info(vec![1u8]).unwrap();
    node.sight(NodeId::random(), None, 1).unwrap();
    node.client.disconnect();
    peers.clear();

    node.connect().unwrap();
    let fresh = node.client.discovery().unwrap();
    assert!(fresh.snapshot().is_empty());
    assert_eq!(fresh.discovery_info(), None);

    node.sight(NodeId::random(), None, 2).unwrap();
    assert!(peers.is_empty());
    assert_eq!(node.client.snapshot().len(), 1);
}
