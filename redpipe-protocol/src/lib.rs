//! # redpipe-protocol
//!
//! RESP2 wire codec for redpipe.
//!
//! This crate provides:
//! - Command encoding as RESP arrays of bulk strings
//! - Incremental reply decoding over a growable buffer
//! - Protocol error types and size limits
//!
//! It performs no I/O; the client crate owns the transport.

pub mod codec;
pub mod command;
pub mod error;
pub mod reply;

pub use codec::{Decoder, Encoder, PING_FRAME};
pub use command::Command;
pub use error::ProtocolError;
pub use reply::Reply;

/// Default port of a RESP server.
pub const DEFAULT_PORT: u16 = 6379;

/// Largest bulk string accepted by the decoder (512 MiB, the server-side limit).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Longest simple string, error or header line accepted, excluding CRLF.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Largest number of elements accepted in a single array reply.
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;
