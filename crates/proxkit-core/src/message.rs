//! Typed, addressed messages.
//!
//! `Message` is what listeners receive. `OutboundMessage` is what the client
//! hands to the backend. `MessageEnvelope` is the JSON form used on the wire
//! by the reference backend.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::node::NodeId;
use crate::wire::{AppHash, WireError};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Well-known `msg_type` tags.
pub mod msg_types {
    pub const SIMPLE_CHAT: &str = "SimpleChatMessage";
}

/// A received message. Constructed on receipt, never retained by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub origin: NodeId,
    pub msg_type: String,
    pub payload: Bytes,
    pub received_at: Timestamp,
}

/// A message handed to the backend for best-effort delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub origin: NodeId,
    pub destination: NodeId,
    pub msg_type: String,
    pub payload: Bytes,
    pub sent_at: Timestamp,
}

/// JSON envelope carried in every message datagram.
///
/// Binary fields are hex-encoded. Receivers drop envelopes whose `app_hash`
/// does not match their own or whose `destination` is not them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub app_hash: String,
    pub origin: NodeId,
    pub destination: NodeId,
    pub msg_type: String,
    /// Sender clock, milliseconds since the Unix epoch.
    pub timestamp: Timestamp,
    pub payload: String,
}

impl MessageEnvelope {
    pub fn seal(app_hash: &AppHash, msg: &OutboundMessage) -> Self {
        Self {
            app_hash: hex::encode(app_hash),
            origin: msg.origin,
            destination: msg.destination,
            msg_type: msg.msg_type.clone(),
            timestamp: msg.sent_at,
            payload: hex::encode(&msg.payload),
        }
    }

    pub fn is_for_app(&self, app_hash: &AppHash) -> bool {
        self.app_hash == hex::encode(app_hash)
    }

    /// Turn a received envelope into a listener-facing message.
    pub fn open(self) -> Result<Message, WireError> {
        let payload = hex::decode(&self.payload).map_err(|_| WireError::BadPayloadEncoding)?;
        Ok(Message {
            origin: self.origin,
            msg_type: self.msg_type,
            payload: Bytes::from(payload),
            received_at: self.timestamp,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(data)?)
    }
}
