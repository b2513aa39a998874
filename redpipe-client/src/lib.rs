//! # redpipe-client
//!
//! Pipelining client for RESP servers.
//!
//! This crate provides:
//! - A connection that correlates replies to requests purely by position
//! - Eager single-request submission and batched submission with one flush per batch
//! - Fire-and-forget requests whose replies are drained but never surfaced
//! - Blocking and async forms of every operation
//! - Per-connection counters for issued, completed and flushed requests

pub mod batch;
pub mod connection;
pub mod counters;
pub mod error;
pub mod pending;
pub mod state;
mod transport;

#[cfg(test)]
mod test_support;

pub use batch::Batch;
pub use connection::{Connection, ConnectionConfig};
pub use counters::CounterSnapshot;
pub use error::{ClientError, ConnectError};
pub use pending::PendingReply;
pub use redpipe_protocol::{Command, Reply};
pub use state::ConnectionState;
pub use transport::Transport;
