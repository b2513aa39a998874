//! Client error types.

use redpipe_protocol::ProtocolError;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::state::ConnectionState;

/// Errors surfaced to callers of submission operations.
///
/// Connection-level failures are broadcast to every pending request, so this
/// type is `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("batch already executed")]
    BatchAlreadyExecuted,

    #[error("too many pending requests (limit {limit})")]
    Backpressure { limit: usize },

    #[error("server error: {0}")]
    Server(String),

    #[error("request abandoned before it was sent")]
    Abandoned,
}

impl ClientError {
    /// Returns whether this error left the connection unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Protocol(_) | ClientError::Transport(_) | ClientError::ConnectionClosed
        )
    }

    /// Returns whether retrying on the same connection may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Timeout | ClientError::Backpressure { .. })
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// Errors raised while establishing a connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to resolve {endpoint}: {reason}")]
    Resolve { endpoint: String, reason: String },

    #[error("connection to {addr} refused")]
    Refused { addr: SocketAddr },

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("protocol error during handshake: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("cannot connect from state {0}")]
    InvalidState(ConnectionState),
}
