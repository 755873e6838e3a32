use crate::*;

use proxkit_core::message::msg_types;
use proxkit_core::{KitError, Message, ServiceState};
use proxkit_services::MessageEvent;

fn incoming(origin: NodeId, body: &'static [u8], at: Timestamp) -> Message {
    Message {
        origin,
        msg_type: msg_types::SIMPLE_CHAT.to_string(),
        payload: Bytes::from_static(body),
        received_at: at,
    }
}

/// Sending to an id nobody has seen is fine and stays silent locally.
#[test]
fn test_send_to_unknown_peer_succeeds_silently() {
    let node = Node::new();
    let me = node.connect().unwrap();
    let messaging = node.client.messaging().unwrap();
    let events = recorder::<MessageEvent>();
    messaging.add_listener(events.clone()).unwrap();

    let stranger = NodeId::random();
    assert!(node.client.get_peer(&stranger).is_none());
    messaging
        .send_message(stranger, msg_types::SIMPLE_CHAT, Bytes::from_static(b"hi"))
        .unwrap();

    assert!(events.is_empty());
    let sent = node.backend.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].origin, me);
    assert_eq!(sent[0].destination, stranger);
    assert_eq!(&sent[0].payload[..], b"hi");
    assert_eq!(messaging.stats(), (1, 0));
}

#[test]
fn test_malformed_destination_has_no_side_effect() {
    let node = Node::new();
    node.connect().unwrap();
    let messaging = node.client.messaging().unwrap();

    assert!(matches!(
        messaging.send_message(NodeId::NIL, "t", Bytes::new()),
        Err(KitError::MalformedDestination(_))
    ));
    assert!(matches!(
        messaging.send_message_to("zz", "t", Bytes::new()),
        Err(KitError::MalformedDestination(_))
    ));
    assert!(node.backend.sent().is_empty());
    assert_eq!(messaging.stats(), (0, 0));
}

#[test]
fn test_send_requires_connection() {
    let node = Node::new();
    node.connect().unwrap();
    let messaging = node.client.messaging().unwrap();
    node.client.disconnect();

    assert_eq!(
        messaging.send_message(NodeId::random(), "t", Bytes::new()),
        Err(KitError::NotConnected)
    );
    assert!(node.backend.sent().is_empty());
}

#[test]
fn test_received_messages_in_arrival_order() {
    let node = Node::new();
    node.connect().unwrap();
    let messaging = node.client.messaging().unwrap();
    let a = recorder::<MessageEvent>();
    let b = recorder::<MessageEvent>();
    messaging.add_listener(a.clone()).unwrap();
    messaging.add_listener(b.clone()).unwrap();

    let sink = node.sink().unwrap();
    sink.messaging_state(ServiceState::On);
    let (x, y) = (NodeId::random(), NodeId::random());
    // Arrival order wins over sender timestamps.
    sink.message_received(incoming(x, b"one", 30));
    sink.message_received(incoming(y, b"two", 10));
    sink.message_received(incoming(x, b"three", 31));

    let expected = vec![
        MessageEvent::StateChanged(ServiceState::On),
        MessageEvent::MessageReceived(incoming(x, b"one", 30)),
        MessageEvent::MessageReceived(incoming(y, b"two", 10)),
        MessageEvent::MessageReceived(incoming(x, b"three", 31)),
    ];
    assert_eq!(a.events(), expected);
    assert_eq!(b.events(), expected);
    assert_eq!(messaging.state(), ServiceState::On);
    assert_eq!(messaging.stats(), (0, 3));
}

#[test]
fn test_reply_from_inside_listener() {
    let node = Node::new();
    node.connect().unwrap();
    let messaging = node.client.messaging().unwrap();
    let replier = messaging.clone();
    messaging
        .add_listener(move |event: &MessageEvent| {
            if let MessageEvent::MessageReceived(m) = event {
                replier
                    .send_message(m.origin, &m.msg_type, m.payload.clone())
                    .unwrap();
            }
        })
        .unwrap();

    let x = NodeId::random();
    node.sink().unwrap().message_received(incoming(x, b"ping", 1));

    let sent = node.backend.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].destination, x);
    assert_eq!(&sent[0].payload[..], b"ping");
}

#[test]
fn test_no_messages_after_disconnect() {
    let node = Node::new();
    node.connect().unwrap();
    let events = recorder::<MessageEvent>();
    node.client
        .messaging()
        .unwrap()
        .add_listener(events.clone())
        .unwrap();
    let sink = node.sink().unwrap();

    node.client.disconnect();
    sink.message_received(incoming(NodeId::random(), b"late", 1));
    sink.messaging_state(ServiceState::Unavailable);

    assert!(events.is_empty());
}
