//! In-memory backend and listener helpers for tests.
//!
//! `MockBackend` records every call the client makes and hands the session's
//! `BackendSink` back to the test, which then plays the role of the network.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use proxkit_core::{OutboundMessage, ServiceStatus};

use crate::backend::{ActivationRequest, Backend, BackendSink};
use crate::listener::Listener;

#[derive(Default)]
struct MockState {
    status: Option<ServiceStatus>,
    activations: Vec<ActivationRequest>,
    deactivations: usize,
    active: Option<u64>,
    published: Vec<Option<Bytes>>,
    sent: Vec<OutboundMessage>,
    sink: Option<BackendSink>,
}

/// Backend that never touches the network.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_status(&self, status: ServiceStatus) {
        self.lock().status = Some(status);
    }

    /// Sink of the most recent activation.
    pub fn sink(&self) -> Option<BackendSink> {
        self.lock().sink.clone()
    }

    pub fn activations(&self) -> Vec<ActivationRequest> {
        self.lock().activations.clone()
    }

    /// Deactivations that actually stopped the active session.
    pub fn deactivations(&self) -> usize {
        self.lock().deactivations
    }

    /// Session id of the activation that has not been deactivated yet.
    pub fn active_session(&self) -> Option<u64> {
        self.lock().active
    }

    /// Every discovery info value handed to the backend, in order.
    pub fn published(&self) -> Vec<Option<Bytes>> {
        self.lock().published.clone()
    }

    /// Every message handed to the backend, in order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.lock().sent.clone()
    }
}

impl Backend for MockBackend {
    fn status(&self) -> ServiceStatus {
        self.lock().status.clone().unwrap_or(ServiceStatus::Available)
    }

    fn activate(&self, request: ActivationRequest, sink: BackendSink) {
        let mut state = self.lock();
        state.active = Some(request.session_id);
        state.activations.push(request);
        state.sink = Some(sink);
    }

    fn deactivate(&self, session_id: u64) {
        let mut state = self.lock();
        if state.active == Some(session_id) {
            state.active = None;
            state.deactivations += 1;
        }
    }

    fn publish_discovery_info(&self, info: Option<Bytes>) {
        self.lock().published.push(info);
    }

    fn send_message(&self, message: OutboundMessage) {
        self.lock().sent.push(message);
    }
}

/// Listener that keeps a copy of every event it receives.
///
/// Clones share the same log, so one clone can be registered while the
/// test inspects another.
pub struct Recorder<E> {
    events: Arc<Mutex<Vec<E>>>,
}

impl<E> Clone for Recorder<E> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
        }
    }
}

impl<E> Default for Recorder<E> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<E: Clone> Recorder<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<E> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl<E: Clone + Send + Sync> Listener<E> for Recorder<E> {
    fn on_event(&self, event: &E) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
