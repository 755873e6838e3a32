use crate::*;

use proxkit_core::{KitError, ServiceState, MAX_DISCOVERY_INFO_LEN};
use proxkit_services::{DiscoveryEvent, GeoEvent, Peer};

fn peer(node_id: NodeId, info: Option<&'static [u8]>, at: Timestamp) -> Peer {
    Peer {
        node_id,
        discovery_info: info.map(Bytes::from_static),
        last_seen_at: at,
    }
}

/// Oversized info is rejected and the published payload is kept.
#[test]
fn test_oversized_info_leaves_previous_payload() {
    let node = Node::new();
    node.connect().unwrap();
    let discovery = node.client.discovery().unwrap();
    discovery.set_discovery_info(vec![1u8, 2, 3]).unwrap();

    for len in [MAX_DISCOVERY_INFO_LEN + 1, 64, 1024] {
        let err = discovery.set_discovery_info(vec![0u8; len]).unwrap_err();
        assert_eq!(
            err,
            KitError::InfoTooLong {
                len,
                max: MAX_DISCOVERY_INFO_LEN
            }
        );
    }

    assert_eq!(discovery.discovery_info().as_deref(), Some(&[1u8, 2, 3][..]));
    assert_eq!(
        node.backend.published(),
        vec![Some(Bytes::from_static(&[1, 2, 3]))]
    );
}

#[test]
fn test_boundary_and_empty_info_accepted() {
    let node = Node::new();
    node.connect().unwrap();
    let discovery = node.client.discovery().unwrap();

    discovery
        .set_discovery_info(vec![7u8; MAX_DISCOVERY_INFO_LEN])
        .unwrap();
    // Zero bytes is presence-only discovery, not "no info".
    discovery.set_discovery_info(Vec::new()).unwrap();
    assert_eq!(discovery.discovery_info(), Some(Bytes::new()));

    discovery.clear_discovery_info().unwrap();
    assert_eq!(discovery.discovery_info(), None);
    assert_eq!(node.backend.published().len(), 3);
}

/// Repeated identical payloads never emit; a change emits once.
#[test]
fn test_unchanged_repeats_are_silent() {
    let node = Node::new();
    node.connect().unwrap();
    let events = recorder::<DiscoveryEvent>();
    node.client
        .discovery()
        .unwrap()
        .add_p2p_listener(events.clone())
        .unwrap();

    let p = NodeId::random();
    node.sight(p, Some(b"b1"), 10).unwrap();
    node.sight(p, Some(b"b1"), 20).unwrap();
    node.sight(p, Some(b"b2"), 30).unwrap();
    node.sight(p, Some(b"b2"), 40).unwrap();

    assert_eq!(
        events.events(),
        vec![
            DiscoveryEvent::PeerDiscovered(peer(p, Some(b"b1"), 10)),
            DiscoveryEvent::PeerUpdatedDiscoveryInfo(peer(p, Some(b"b2"), 30)),
        ]
    );
    assert_eq!(node.client.get_peer(&p), Some(peer(p, Some(b"b2"), 40)));
}

#[test]
fn test_listeners_see_identical_sequences() {
    let node = Node::new();
    node.connect().unwrap();
    let discovery = node.client.discovery().unwrap();
    let a = recorder::<DiscoveryEvent>();
    let b = recorder::<DiscoveryEvent>();
    discovery.add_p2p_listener(a.clone()).unwrap();
    discovery.add_p2p_listener(b.clone()).unwrap();

    let sink = node.sink().unwrap();
    sink.p2p_state(ServiceState::On);
    for i in 0..5u64 {
        node.sight(NodeId::random(), None, i).unwrap();
    }
    sink.tick(100_000);

    assert_eq!(a.len(), 1 + 5 + 5);
    assert_eq!(a.events(), b.events());
}

/// N distinct peers → snapshot holds exactly N, matching the last sighting.
#[test]
fn test_snapshot_matches_last_sightings() {
    let node = Node::new();
    node.connect().unwrap();
    let events = recorder::<DiscoveryEvent>();
    node.client
        .discovery()
        .unwrap()
        .add_p2p_listener(events.clone())
        .unwrap();

    const INFOS: [&[u8]; 3] = [b"x", b"y", b"z"];
    let mut expected: Vec<Peer> = (0..12u64)
        .map(|i| {
            let id = NodeId::random();
            let info = INFOS[i as usize % 3];
            node.sight(id, Some(b"first"), i).unwrap();
            node.sight(id, Some(info), 100 + i).unwrap();
            peer(id, Some(info), 100 + i)
        })
        .collect();
    expected.sort_by_key(|p| p.node_id);

    let snapshot = node.client.snapshot();
    assert_eq!(snapshot, expected);
    assert_eq!(node.client.discovery().unwrap().snapshot(), expected);

    // A snapshot is a copy.
    node.sight(NodeId::random(), None, 500).unwrap();
    assert_eq!(snapshot.len(), 12);
    assert_eq!(node.client.snapshot().len(), 13);
}

#[test]
fn test_peer_lost_after_liveness_window() {
    let node = Node::new();
    node.connect().unwrap();
    let events = recorder::<DiscoveryEvent>();
    node.client
        .discovery()
        .unwrap()
        .add_p2p_listener(events.clone())
        .unwrap();
    let sink = node.sink().unwrap();

    let q = NodeId::random();
    node.sight(q, None, 1_000).unwrap();
    sink.tick(10_999);
    assert!(node.client.get_peer(&q).is_some());

    sink.tick(11_000);
    assert!(node.client.get_peer(&q).is_none());
    assert_eq!(
        events.events().last(),
        Some(&DiscoveryEvent::PeerLost(peer(q, None, 1_000)))
    );

    // Seen again → discovered again.
    node.sight(q, None, 12_000).unwrap();
    assert_eq!(
        events.events().last(),
        Some(&DiscoveryEvent::PeerDiscovered(peer(q, None, 12_000)))
    );
}

#[test]
fn test_own_sightings_are_ignored() {
    let node = Node::new();
    let me = node.connect().unwrap();
    node.sight(me, Some(b"self"), 1).unwrap();
    assert!(node.client.snapshot().is_empty());
}

#[test]
fn test_geo_stream_is_independent() {
    let node = Node::new();
    node.connect().unwrap();
    let discovery = node.client.discovery().unwrap();
    let p2p = recorder::<DiscoveryEvent>();
    let geo = recorder::<GeoEvent>();
    discovery.add_p2p_listener(p2p.clone()).unwrap();
    discovery.add_geo_listener(geo.clone()).unwrap();

    let sink = node.sink().unwrap();
    let g = NodeId::random();
    sink.geo_state(ServiceState::On);
    sink.geo_sighting(g, 5);
    sink.geo_sighting(g, 6);
    assert_eq!(node.client.snapshot_geo(), vec![g]);
    assert!(node.client.snapshot().is_empty());

    sink.geo_peer_lost(&g);
    assert_eq!(
        geo.events(),
        vec![
            GeoEvent::StateChanged(ServiceState::On),
            GeoEvent::PeerDiscovered(g),
            GeoEvent::PeerLost(g),
        ]
    );
    assert!(p2p.is_empty());
    assert_eq!(discovery.geo_state(), ServiceState::On);
    assert_eq!(discovery.p2p_state(), ServiceState::Off);
}

#[test]
fn test_removed_listener_gets_nothing_further() {
    let node = Node::new();
    node.connect().unwrap();
    let discovery = node.client.discovery().unwrap();
    let events = recorder::<DiscoveryEvent>();
    let id = discovery.add_p2p_listener(events.clone()).unwrap();

    node.sight(NodeId::random(), None, 1).unwrap();
    assert!(discovery.remove_p2p_listener(id));
    node.sight(NodeId::random(), None, 2).unwrap();
    assert_eq!(events.len(), 1);
}

/// No events reach listeners after disconnect, whatever the provider does.
#[test]
fn test_silence_after_disconnect() {
    let node = Node::new();
    node.connect().unwrap();
    let discovery = node.client.discovery().unwrap();
    let events = recorder::<DiscoveryEvent>();
    let geo = recorder::<GeoEvent>();
    discovery.add_p2p_listener(events.clone()).unwrap();
    discovery.add_geo_listener(geo.clone()).unwrap();
    let sink = node.sink().unwrap();
    let known = NodeId::random();
    node.sight(known, None, 1).unwrap();
    events.clear();

    node.client.disconnect();

    node.sight(NodeId::random(), Some(b"late"), 2).unwrap();
    sink.geo_sighting(NodeId::random(), 2);
    sink.peer_lost(&known);
    sink.p2p_state(ServiceState::Unavailable);
    sink.tick(1_000_000);

    assert!(events.is_empty());
    assert!(geo.is_empty());
    assert!(node.client.snapshot().is_empty());
    assert_eq!(
        discovery.set_discovery_info(vec![1u8]),
        Err(KitError::NotConnected)
    );
    assert!(discovery.add_p2p_listener(events.clone()).is_err());
}

#[test]
fn test_info_change_from_inside_listener() {
    let node = Node::new();
    node.connect().unwrap();
    let discovery = node.client.discovery().unwrap();
    let handle = discovery.clone();
    discovery
        .add_p2p_listener(move |event: &DiscoveryEvent| {
            if let DiscoveryEvent::PeerDiscovered(p) = event {
                let info = p.discovery_info.clone().unwrap_or_default();
                handle.set_discovery_info(info).unwrap();
            }
        })
        .unwrap();

    node.sight(NodeId::random(), Some(b"echo"), 1).unwrap();
    assert_eq!(discovery.discovery_info().as_deref(), Some(&b"echo"[..]));
}
