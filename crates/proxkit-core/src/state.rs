//! Connection state machine and subsystem states.
//!
//! Every lifecycle transition goes through [`ConnectionState::apply`]. It is
//! a pure function of (state, input), so the state machine can be tested
//! without a transport behind it.

use std::fmt;

use crate::error::FailureReason;

/// State of the single logical connection to the discovery backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Suspended,
    Failed(FailureReason),
}

/// Inputs that can move the connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleInput {
    /// Caller asked to connect.
    Connect,
    /// Backend acknowledged activation.
    Acknowledged,
    /// Backend temporarily lost its service connection.
    Suspended,
    /// Backend recovered from a suspension.
    Resumed,
    /// Backend dropped the connection for good.
    Lost,
    /// Backend could not connect, or failed while connected.
    Failed(FailureReason),
    /// Caller asked to disconnect.
    Disconnect,
}

/// Notification delivered to lifecycle listeners, one per transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected,
    ConnectionSuspended,
    ConnectionFailed(FailureReason),
    /// Backend-initiated disconnect. An explicit `disconnect()` emits nothing.
    Disconnected,
}

impl ConnectionState {
    /// Compute the transition for `input`.
    ///
    /// Returns `None` when the input does not apply in this state (for
    /// instance an ack arriving after a disconnect). Otherwise returns the
    /// next state and the notification it produces, if any.
    pub fn apply(&self, input: &LifecycleInput) -> Option<(ConnectionState, Option<LifecycleEvent>)> {
        use crate::state::ConnectionState as S;
        use crate::state::LifecycleInput as I;

        match (self, input) {
            (S::Disconnected | S::Failed(_), I::Connect) => Some((S::Connecting, None)),
            (S::Connecting, I::Acknowledged) => {
                Some((S::Connected, Some(LifecycleEvent::Connected)))
            }
            (S::Connected, I::Suspended) => {
                Some((S::Suspended, Some(LifecycleEvent::ConnectionSuspended)))
            }
            (S::Suspended, I::Resumed) => Some((S::Connected, Some(LifecycleEvent::Connected))),
            (S::Connected | S::Suspended, I::Lost) => {
                Some((S::Disconnected, Some(LifecycleEvent::Disconnected)))
            }
            (S::Connecting | S::Connected | S::Suspended, I::Failed(reason)) => Some((
                S::Failed(reason.clone()),
                Some(LifecycleEvent::ConnectionFailed(reason.clone())),
            )),
            (S::Disconnected, I::Disconnect) => None,
            (_, I::Disconnect) => Some((S::Disconnected, None)),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// States in which a backend session is alive.
    pub fn has_session(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Suspended)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Suspended => f.write_str("suspended"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Operating mode of a discovery or messaging subsystem, independent of the
/// connection state and of any peer-level event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ServiceState {
    #[default]
    Off,
    On,
    /// The subsystem wants to run but its radio/location source is unavailable.
    Unavailable,
}

impl ServiceState {
    pub fn code(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::On => 1,
            Self::Unavailable => 2,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("off"),
            Self::On => f.write_str("on"),
            Self::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// Result of the host availability check made before `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    Available,
    Unavailable(FailureReason),
}

impl ServiceStatus {
    /// 0 when available, otherwise the failure's status code.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Available => 0,
            Self::Unavailable(reason) => reason.status_code(),
        }
    }
}
