//! Connection lifecycle states.

use std::fmt;

/// Lifecycle of a [`Connection`](crate::Connection).
///
/// `Disconnected -> Connecting -> Connected -> Faulted | Closed`. `Faulted` and
/// `Closed` are terminal; a faulted connection is never reconnected in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
    Closed,
}

impl ConnectionState {
    /// Submissions are accepted only while connected.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Faulted | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Faulted => write!(f, "faulted"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}
