//! Lifecycle manager — the single connection to the discovery backend.
//!
//! `KitClient` owns the connection state machine and the current session.
//! A session is created by `connect` and destroyed by `disconnect`, or by a
//! backend failure or loss. Discovery and messaging live inside the session,
//! so nothing from an old session (peers, listeners, pending events) can
//! leak into the next one.
//!
//! Lifecycle notifications are queued while the state lock is held and
//! dispatched after it is released. A listener can therefore call back into
//! the client, including `disconnect`, from inside `Connected`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use bytes::Bytes;
use proxkit_core::config::KitConfig;
use proxkit_core::wire::PEER_LIVENESS_WINDOW_MS;
use proxkit_core::{
    now_millis, ConnectionState, KitError, LifecycleEvent, LifecycleInput, NodeId, ServiceState,
    ServiceStatus,
};

use crate::backend::{ActivationRequest, Backend, BackendSink};
use crate::discovery::{validate_discovery_info, DiscoveryEngine, DiscoveryEvent, GeoEvent};
use crate::listener::{EventStream, Listener, ListenerId};
use crate::messaging::{validate_destination, MessageEvent, MessagingService};
use crate::peer::Peer;

/// Engine tunables taken from the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub liveness_window_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            liveness_window_ms: PEER_LIVENESS_WINDOW_MS,
        }
    }
}

impl From<&KitConfig> for EngineConfig {
    fn from(config: &KitConfig) -> Self {
        Self {
            liveness_window_ms: config.discovery.liveness_window_ms,
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

/// Everything that exists for the duration of one connection.
pub(crate) struct Session {
    id: u64,
    node_id: OnceLock<NodeId>,
    /// Connected and not suspended.
    online: AtomicBool,
    closed: AtomicBool,
    pub(crate) discovery: DiscoveryEngine,
    pub(crate) messaging: MessagingService,
}

impl Session {
    fn new(id: u64, config: &EngineConfig) -> Self {
        Self {
            id,
            node_id: OnceLock::new(),
            online: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            discovery: DiscoveryEngine::new(config.liveness_window_ms),
            messaging: MessagingService::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn node_id(&self) -> Option<NodeId> {
        self.node_id.get().copied()
    }

    /// First assignment wins; the node id is stable for the session.
    pub(crate) fn assign_node_id(&self, node_id: NodeId) {
        if self.node_id.set(node_id).is_err() && self.node_id() != Some(node_id) {
            tracing::warn!(session = self.id, %node_id, "backend reassigned node id, ignored");
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// The local node id, if the session may currently send and publish.
    fn ensure_online(&self) -> Result<NodeId, KitError> {
        if self.is_closed() || !self.online.load(Ordering::Acquire) {
            return Err(KitError::NotConnected);
        }
        self.node_id().ok_or(KitError::NotConnected)
    }

    fn ensure_live(&self) -> Result<(), KitError> {
        if self.is_closed() {
            return Err(KitError::NotConnected);
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.online.store(false, Ordering::Release);
        self.discovery.close();
        self.messaging.close();
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

struct Lifecycle {
    state: ConnectionState,
    session: Option<Arc<Session>>,
}

pub(crate) struct ClientInner {
    backend: Arc<dyn Backend>,
    config: EngineConfig,
    lifecycle: Mutex<Lifecycle>,
    events: EventStream<LifecycleEvent>,
    next_session: AtomicU64,
}

impl ClientInner {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a backend-originated input to the session it belongs to.
    pub(crate) fn handle_backend(&self, session: &Arc<Session>, input: LifecycleInput) {
        let ended = {
            let mut lc = self.lock();
            if lc.session.as_ref().map(|s| s.id) != Some(session.id) {
                tracing::trace!(session = session.id, ?input, "input for stale session ignored");
                return;
            }
            let Some((next, event)) = lc.state.apply(&input) else {
                tracing::debug!(state = %lc.state, ?input, "lifecycle input ignored");
                return;
            };
            tracing::info!(from = %lc.state, to = %next, "connection state changed");

            session.set_online(next.is_connected());
            let ended = if next.has_session() {
                None
            } else {
                lc.session.take()
            };
            if let Some(ended) = &ended {
                ended.close();
            }
            lc.state = next;
            if let Some(event) = event {
                self.events.enqueue(event);
            }
            ended
        };

        if let Some(ended) = ended {
            self.backend.deactivate(ended.id);
        }
        self.events.drain();
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let lc = self.lifecycle.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = lc.session.take() {
            session.close();
            self.backend.deactivate(session.id);
        }
    }
}

/// Entry point of the library: one logical connection to the backend.
///
/// Cheap to clone; all clones share the same connection.
#[derive(Clone)]
pub struct KitClient {
    inner: Arc<ClientInner>,
}

impl KitClient {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_config(backend, EngineConfig::default())
    }

    pub fn with_config(backend: Arc<dyn Backend>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                backend,
                config,
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::Disconnected,
                    session: None,
                }),
                events: EventStream::new("lifecycle"),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    /// Whether the host can offer the proximity service at all.
    pub fn service_status(&self) -> ServiceStatus {
        self.inner.backend.status()
    }

    /// Begin connecting. Returns the state after the call.
    ///
    /// Only valid from `Disconnected` or `Failed`; otherwise a no-op that
    /// returns the current state. Completion is reported asynchronously
    /// through the lifecycle listeners.
    pub fn connect(&self, app_key: &str) -> ConnectionState {
        let session = {
            let mut lc = self.inner.lock();
            let Some((next, _)) = lc.state.apply(&LifecycleInput::Connect) else {
                tracing::debug!(state = %lc.state, "connect ignored");
                return lc.state.clone();
            };
            let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
            let session = Arc::new(Session::new(id, &self.inner.config));
            lc.session = Some(session.clone());
            lc.state = next;
            session
        };

        tracing::info!(session = session.id, "connecting");
        let sink = BackendSink::new(&self.inner, &session);
        self.inner.backend.activate(
            ActivationRequest {
                session_id: session.id,
                app_key: app_key.to_string(),
            },
            sink,
        );
        // Activation may already have completed (or failed) synchronously.
        self.state()
    }

    /// End the session. Idempotent.
    ///
    /// No lifecycle notification is emitted for an explicit disconnect, and
    /// nothing queued or in flight for the old session reaches a listener
    /// after this returns.
    pub fn disconnect(&self) {
        let ended = {
            let mut lc = self.inner.lock();
            let Some((next, _)) = lc.state.apply(&LifecycleInput::Disconnect) else {
                return;
            };
            lc.state = next;
            let ended = lc.session.take();
            if let Some(session) = &ended {
                session.close();
            }
            self.inner.events.clear_pending();
            ended
        };

        if let Some(session) = ended {
            tracing::info!(session = session.id, "disconnected");
            self.inner.backend.deactivate(session.id);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().state.is_connected()
    }

    /// The node id assigned by the backend for the current session.
    pub fn current_node_id(&self) -> Result<NodeId, KitError> {
        let lc = self.inner.lock();
        if !lc.state.is_connected() {
            return Err(KitError::NotConnected);
        }
        lc.session
            .as_ref()
            .and_then(|s| s.node_id())
            .ok_or(KitError::NotConnected)
    }

    pub fn add_lifecycle_listener(
        &self,
        listener: impl Listener<LifecycleEvent> + 'static,
    ) -> ListenerId {
        self.inner.events.add(Arc::new(listener))
    }

    pub fn remove_lifecycle_listener(&self, id: ListenerId) -> bool {
        self.inner.events.remove(id)
    }

    fn session(&self) -> Result<Arc<Session>, KitError> {
        let lc = self.inner.lock();
        match (&lc.state, &lc.session) {
            (ConnectionState::Connected, Some(session)) => Ok(session.clone()),
            _ => Err(KitError::NotConnected),
        }
    }

    /// Discovery services of the current session.
    pub fn discovery(&self) -> Result<DiscoveryServices, KitError> {
        Ok(DiscoveryServices {
            session: self.session()?,
            backend: self.inner.backend.clone(),
        })
    }

    /// Messaging services of the current session.
    pub fn messaging(&self) -> Result<MessageServices, KitError> {
        Ok(MessageServices {
            session: self.session()?,
            backend: self.inner.backend.clone(),
        })
    }

    fn live_session(&self) -> Option<Arc<Session>> {
        self.inner.lock().session.clone()
    }

    /// Peers currently present. Empty when no session exists.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.live_session()
            .map(|s| s.discovery.registry().snapshot())
            .unwrap_or_default()
    }

    /// Node ids currently present through location-assisted discovery.
    pub fn snapshot_geo(&self) -> Vec<NodeId> {
        self.live_session()
            .map(|s| geo_ids(&s.discovery))
            .unwrap_or_default()
    }

    pub fn get_peer(&self, node_id: &NodeId) -> Option<Peer> {
        self.live_session()
            .and_then(|s| s.discovery.registry().get(node_id))
    }
}

fn geo_ids(discovery: &DiscoveryEngine) -> Vec<NodeId> {
    discovery
        .geo_registry()
        .snapshot()
        .into_iter()
        .map(|p| p.node_id)
        .collect()
}

// ── Service handles ──────────────────────────────────────────────────────────

/// Discovery operations, bound to the session they were obtained from.
/// Every call fails with `NotConnected` once that session has ended.
#[derive(Clone)]
pub struct DiscoveryServices {
    session: Arc<Session>,
    backend: Arc<dyn Backend>,
}

impl DiscoveryServices {
    /// Publish discovery info in this node's beacons.
    ///
    /// Peers learn the new value on their next sighting of this node.
    pub fn set_discovery_info(&self, info: impl Into<Bytes>) -> Result<(), KitError> {
        let info = info.into();
        validate_discovery_info(&info)?;
        self.session.ensure_online()?;
        self.session.discovery.set_discovery_info(Some(info.clone()))?;
        tracing::debug!(len = info.len(), "discovery info published");
        self.backend.publish_discovery_info(Some(info));
        Ok(())
    }

    /// Stop publishing discovery info.
    pub fn clear_discovery_info(&self) -> Result<(), KitError> {
        self.session.ensure_online()?;
        self.session.discovery.set_discovery_info(None)?;
        self.backend.publish_discovery_info(None);
        Ok(())
    }

    pub fn discovery_info(&self) -> Option<Bytes> {
        self.session.discovery.discovery_info()
    }

    pub fn add_p2p_listener(
        &self,
        listener: impl Listener<DiscoveryEvent> + 'static,
    ) -> Result<ListenerId, KitError> {
        self.session.ensure_live()?;
        Ok(self.session.discovery.add_p2p_listener(Arc::new(listener)))
    }

    pub fn remove_p2p_listener(&self, id: ListenerId) -> bool {
        self.session.discovery.remove_p2p_listener(id)
    }

    pub fn add_geo_listener(
        &self,
        listener: impl Listener<GeoEvent> + 'static,
    ) -> Result<ListenerId, KitError> {
        self.session.ensure_live()?;
        Ok(self.session.discovery.add_geo_listener(Arc::new(listener)))
    }

    pub fn remove_geo_listener(&self, id: ListenerId) -> bool {
        self.session.discovery.remove_geo_listener(id)
    }

    pub fn p2p_state(&self) -> ServiceState {
        self.session.discovery.p2p_state()
    }

    pub fn geo_state(&self) -> ServiceState {
        self.session.discovery.geo_state()
    }

    pub fn snapshot(&self) -> Vec<Peer> {
        self.session.discovery.registry().snapshot()
    }

    pub fn get(&self, node_id: &NodeId) -> Option<Peer> {
        self.session.discovery.registry().get(node_id)
    }

    pub fn geo_snapshot(&self) -> Vec<NodeId> {
        geo_ids(&self.session.discovery)
    }
}

/// Messaging operations, bound to the session they were obtained from.
#[derive(Clone)]
pub struct MessageServices {
    session: Arc<Session>,
    backend: Arc<dyn Backend>,
}

impl MessageServices {
    /// Fire-and-forget send. `Ok` means the message was handed to the
    /// backend, not that it was delivered.
    pub fn send_message(
        &self,
        destination: NodeId,
        msg_type: &str,
        payload: impl Into<Bytes>,
    ) -> Result<(), KitError> {
        validate_destination(&destination)?;
        let origin = self.session.ensure_online()?;
        let message = self.session.messaging.prepare(
            origin,
            destination,
            msg_type,
            payload.into(),
            now_millis(),
        )?;
        tracing::debug!(
            destination = %destination,
            msg_type,
            bytes = message.payload.len(),
            "message sent"
        );
        self.backend.send_message(message);
        Ok(())
    }

    /// As `send_message`, with the destination given in textual form.
    pub fn send_message_to(
        &self,
        destination: &str,
        msg_type: &str,
        payload: impl Into<Bytes>,
    ) -> Result<(), KitError> {
        let destination: NodeId = destination.parse()?;
        self.send_message(destination, msg_type, payload)
    }

    pub fn add_listener(
        &self,
        listener: impl Listener<MessageEvent> + 'static,
    ) -> Result<ListenerId, KitError> {
        self.session.ensure_live()?;
        Ok(self.session.messaging.add_listener(Arc::new(listener)))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.session.messaging.remove_listener(id)
    }

    pub fn state(&self) -> ServiceState {
        self.session.messaging.state()
    }

    /// (sent, received) counters of this session.
    pub fn stats(&self) -> (u64, u64) {
        self.session.messaging.stats()
    }
}
