//! Messaging service — fire-and-forget typed messages to a node id.
//!
//! Sending only validates and hands the message to the backend. Delivery is
//! best effort: an unreachable destination is dropped by the transport and
//! never reported back. Received messages fan out to every listener in
//! arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use proxkit_core::{KitError, Message, NodeId, OutboundMessage, ServiceState, Timestamp};

use crate::listener::{EventStream, Listener, ListenerId};

/// Event delivered to messaging listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    StateChanged(ServiceState),
    MessageReceived(Message),
}

pub struct MessagingService {
    events: EventStream<MessageEvent>,
    state: Mutex<ServiceState>,
    sent: AtomicU64,
    received: AtomicU64,
}

/// The nil id addresses nobody.
pub fn validate_destination(destination: &NodeId) -> Result<(), KitError> {
    if destination.is_nil() {
        return Err(KitError::MalformedDestination(destination.to_string()));
    }
    Ok(())
}

impl Default for MessagingService {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagingService {
    pub fn new() -> Self {
        Self {
            events: EventStream::new("messaging"),
            state: Mutex::new(ServiceState::Off),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener<MessageEvent>>) -> ListenerId {
        self.events.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.events.remove(id)
    }

    /// Build the outbound form of a message after validating the destination.
    pub fn prepare(
        &self,
        origin: NodeId,
        destination: NodeId,
        msg_type: &str,
        payload: Bytes,
        now: Timestamp,
    ) -> Result<OutboundMessage, KitError> {
        validate_destination(&destination)?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(OutboundMessage {
            origin,
            destination,
            msg_type: msg_type.to_string(),
            payload,
            sent_at: now,
        })
    }

    pub fn on_message(&self, message: Message) {
        if self.events.is_closed() {
            return;
        }
        self.received.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            origin = %message.origin,
            msg_type = %message.msg_type,
            bytes = message.payload.len(),
            "message received"
        );
        self.events.publish(MessageEvent::MessageReceived(message));
    }

    pub fn set_state(&self, state: ServiceState) {
        {
            let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *current == state {
                return;
            }
            let from = *current;
            tracing::info!(from = %from, to = %state, "messaging state changed");
            *current = state;
            self.events.enqueue(MessageEvent::StateChanged(state));
        }
        self.events.drain();
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// (sent, received) counters for this session.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.sent.load(Ordering::Relaxed),
            self.received.load(Ordering::Relaxed),
        )
    }

    pub fn close(&self) {
        self.events.close();
    }
}
