use crate::*;

use proxkit_core::{FailureReason, KitError, LifecycleEvent, ServiceStatus};

/// `Connected` fires exactly once per acknowledged connect.
#[test]
fn test_connected_fires_once() {
    let node = Node::new();
    let events = recorder::<LifecycleEvent>();
    node.client.add_lifecycle_listener(events.clone());

    node.connect().unwrap();
    // A duplicate ack is not a transition.
    node.sink().unwrap().acknowledged(NodeId::random());

    assert_eq!(events.events(), vec![LifecycleEvent::Connected]);
    assert!(node.client.is_connected());
}

#[test]
fn test_connect_failure_reported_through_listener() {
    let node = Node::new();
    let events = recorder::<LifecycleEvent>();
    node.client.add_lifecycle_listener(events.clone());

    assert_eq!(node.client.connect(APP_KEY), ConnectionState::Connecting);
    node.sink().unwrap().failed(FailureReason::InvalidAppKey);

    assert_eq!(
        events.events(),
        vec![LifecycleEvent::ConnectionFailed(FailureReason::InvalidAppKey)]
    );
    assert_eq!(
        node.client.state(),
        ConnectionState::Failed(FailureReason::InvalidAppKey)
    );
    assert_eq!(node.client.current_node_id(), Err(KitError::NotConnected));
    assert_eq!(node.backend.deactivations(), 1);

    // Failed → Connecting is allowed and starts a fresh session.
    assert_eq!(node.client.connect(APP_KEY), ConnectionState::Connecting);
    assert_eq!(node.backend.activations().len(), 2);
}

#[test]
fn test_suspend_and_resume() {
    let node = Node::new();
    let events = recorder::<LifecycleEvent>();
    node.client.add_lifecycle_listener(events.clone());
    let me = node.connect().unwrap();

    node.sink().unwrap().suspended();
    assert_eq!(node.client.state(), ConnectionState::Suspended);
    assert_eq!(node.client.current_node_id(), Err(KitError::NotConnected));

    node.sink().unwrap().resumed();
    assert_eq!(node.client.current_node_id().unwrap(), me);
    assert_eq!(
        events.events(),
        vec![
            LifecycleEvent::Connected,
            LifecycleEvent::ConnectionSuspended,
            LifecycleEvent::Connected
        ]
    );
}

#[test]
fn test_backend_loss_emits_disconnected() {
    let node = Node::new();
    let events = recorder::<LifecycleEvent>();
    node.client.add_lifecycle_listener(events.clone());
    node.connect().unwrap();
    let sink = node.sink().unwrap();

    sink.lost();
    assert_eq!(node.client.state(), ConnectionState::Disconnected);
    assert!(!sink.is_live());

    // The dead session's sink can no longer move the state.
    sink.resumed();
    sink.acknowledged(NodeId::random());
    assert_eq!(
        events.events(),
        vec![LifecycleEvent::Connected, LifecycleEvent::Disconnected]
    );
}

#[test]
fn test_explicit_disconnect_is_silent() {
    let node = Node::new();
    let events = recorder::<LifecycleEvent>();
    node.client.add_lifecycle_listener(events.clone());
    node.connect().unwrap();
    events.clear();

    node.client.disconnect();
    node.client.disconnect();

    assert!(events.is_empty());
    assert_eq!(node.backend.deactivations(), 1);
}

#[test]
fn test_disconnect_from_inside_connected_callback() {
    let node = Node::new();
    let client = node.client.clone();
    node.client.add_lifecycle_listener(move |event: &LifecycleEvent| {
        if *event == LifecycleEvent::Connected {
            // Re-entering the client from a callback must not deadlock.
            assert!(client.current_node_id().is_ok());
            client.disconnect();
        }
    });

    node.connect().unwrap();
    assert_eq!(node.client.state(), ConnectionState::Disconnected);
    assert_eq!(node.backend.deactivations(), 1);
}

#[test]
fn test_stale_sink_cannot_touch_new_session() {
    let node = Node::new();
    node.connect().unwrap();
    let old = node.sink().unwrap();
    node.client.disconnect();

    let me = node.connect().unwrap();
    old.failed(FailureReason::ServiceDisabled);
    old.lost();

    assert!(node.client.is_connected());
    assert_eq!(node.client.current_node_id().unwrap(), me);
    assert_ne!(old.session_id(), node.sink().unwrap().session_id());
}

#[test]
fn test_service_status_passthrough() {
    let node = Node::new();
    assert_eq!(node.client.service_status(), ServiceStatus::Available);
    node.backend
        .set_status(ServiceStatus::Unavailable(FailureReason::ServiceUpdateRequired));
    assert_eq!(
        node.client.service_status().status_code(),
        FailureReason::ServiceUpdateRequired.status_code()
    );
}

#[test]
fn test_independent_clients() {
    let a = Node::new();
    let b = Node::new();
    let id_a = a.connect().unwrap();
    let id_b = b.connect().unwrap();
    assert_ne!(id_a, id_b);

    a.client.disconnect();
    assert!(b.client.is_connected());
}
