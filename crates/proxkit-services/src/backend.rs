//! Backend trait — the seam between the client and whatever actually talks
//! to nearby devices.
//!
//! The client calls into a `Backend` to activate, publish info and send
//! messages. The backend reports back through the `BackendSink` it was handed
//! at activation. A sink is bound to one session: once that session is
//! disconnected (or has failed), everything pushed into its sink is dropped.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use proxkit_core::{
    FailureReason, LifecycleInput, Message, NodeId, OutboundMessage, ServiceState, ServiceStatus,
    Timestamp,
};

use crate::client::{ClientInner, Session};
use crate::discovery::Sighting;

/// Parameters of one activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    /// Identifies the session this activation belongs to.
    pub session_id: u64,
    /// Application identity credential supplied to `connect`.
    pub app_key: String,
}

/// Trait for transports that back a `KitClient`.
///
/// Implementations must not block: activation completes asynchronously by
/// calling `BackendSink::acknowledged` or `BackendSink::failed`. Sends are
/// fire-and-forget; an undeliverable message is simply dropped.
pub trait Backend: Send + Sync {
    /// Host availability check. Consulted by callers before `connect`.
    fn status(&self) -> ServiceStatus {
        ServiceStatus::Available
    }

    /// Start a session. Replaces any previous sink.
    fn activate(&self, request: ActivationRequest, sink: BackendSink);

    /// Stop session `session_id` and release its resources.
    ///
    /// The client calls this after releasing its own lock, so a newer
    /// session may already be active. Ids other than the active session's
    /// must be ignored.
    fn deactivate(&self, session_id: u64);

    /// Discovery info to carry in subsequent beacons. `None` stops publishing.
    fn publish_discovery_info(&self, info: Option<Bytes>);

    /// Attempt delivery of one message.
    fn send_message(&self, message: OutboundMessage);
}

/// Handle a backend uses to push provider events into one session.
#[derive(Clone)]
pub struct BackendSink {
    client: Weak<ClientInner>,
    session: Weak<Session>,
    session_id: u64,
}

impl BackendSink {
    pub(crate) fn new(client: &Arc<ClientInner>, session: &Arc<Session>) -> Self {
        Self {
            client: Arc::downgrade(client),
            session: Arc::downgrade(session),
            session_id: session.id(),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// False once the session was disconnected, failed, or dropped.
    /// Backend tasks use this to stop early.
    pub fn is_live(&self) -> bool {
        self.live_session().is_some()
    }

    fn live_session(&self) -> Option<Arc<Session>> {
        match self.session.upgrade() {
            Some(session) if !session.is_closed() => Some(session),
            _ => {
                tracing::trace!(session = self.session_id, "event for closed session dropped");
                None
            }
        }
    }

    fn lifecycle(&self, input: LifecycleInput) {
        let (Some(client), Some(session)) = (self.client.upgrade(), self.live_session()) else {
            return;
        };
        client.handle_backend(&session, input);
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Activation succeeded; `node_id` is the identity assigned to this node.
    pub fn acknowledged(&self, node_id: NodeId) {
        if node_id.is_nil() {
            self.failed(FailureReason::Internal("backend assigned the nil node id".into()));
            return;
        }
        if let Some(session) = self.live_session() {
            session.assign_node_id(node_id);
        }
        self.lifecycle(LifecycleInput::Acknowledged);
    }

    pub fn suspended(&self) {
        self.lifecycle(LifecycleInput::Suspended);
    }

    pub fn resumed(&self) {
        self.lifecycle(LifecycleInput::Resumed);
    }

    /// The backend dropped the connection for good.
    pub fn lost(&self) {
        self.lifecycle(LifecycleInput::Lost);
    }

    pub fn failed(&self, reason: FailureReason) {
        self.lifecycle(LifecycleInput::Failed(reason));
    }

    // ── Discovery ────────────────────────────────────────────────────────────

    pub fn sighting(&self, sighting: Sighting) {
        let Some(session) = self.live_session() else {
            return;
        };
        if session.node_id() == Some(sighting.node_id) {
            tracing::trace!("ignoring own beacon");
            return;
        }
        session.discovery.on_sighting(sighting);
    }

    pub fn geo_sighting(&self, node_id: NodeId, at: Timestamp) {
        let Some(session) = self.live_session() else {
            return;
        };
        if session.node_id() == Some(node_id) {
            return;
        }
        session.discovery.on_geo_sighting(node_id, at);
    }

    pub fn peer_lost(&self, node_id: &NodeId) {
        if let Some(session) = self.live_session() {
            session.discovery.on_peer_lost(node_id);
        }
    }

    pub fn geo_peer_lost(&self, node_id: &NodeId) {
        if let Some(session) = self.live_session() {
            session.discovery.on_geo_peer_lost(node_id);
        }
    }

    /// Liveness sweep: peers not sighted within the window are lost.
    pub fn tick(&self, now: Timestamp) {
        if let Some(session) = self.live_session() {
            session.discovery.expire(now);
        }
    }

    pub fn p2p_state(&self, state: ServiceState) {
        if let Some(session) = self.live_session() {
            session.discovery.set_p2p_state(state);
        }
    }

    pub fn geo_state(&self, state: ServiceState) {
        if let Some(session) = self.live_session() {
            session.discovery.set_geo_state(state);
        }
    }

    // ── Messaging ────────────────────────────────────────────────────────────

    pub fn message_received(&self, message: Message) {
        let Some(session) = self.live_session() else {
            return;
        };
        if session.node_id() == Some(message.origin) {
            tracing::trace!("ignoring own message");
            return;
        }
        session.messaging.on_message(message);
    }

    pub fn messaging_state(&self, state: ServiceState) {
        if let Some(session) = self.live_session() {
            session.messaging.set_state(state);
        }
    }
}
