//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding replies.
///
/// Every variant means the byte stream can no longer be trusted: reply
/// boundaries are positional, so the connection that produced it is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid reply type byte: {0:#04x}")]
    InvalidType(u8),

    #[error("invalid integer in reply header: {0:?}")]
    InvalidInteger(String),

    #[error("invalid length: {0}")]
    InvalidLength(i64),

    #[error("bulk string too large: {size} bytes (max {max})")]
    BulkTooLarge { size: usize, max: usize },

    #[error("array too large: {len} elements (max {max})")]
    ArrayTooLarge { len: usize, max: usize },

    #[error("missing CRLF terminator")]
    MissingCrlf,

    #[error("reply line longer than {max} bytes")]
    LineTooLong { max: usize },

    #[error("invalid UTF-8 in reply line")]
    InvalidUtf8,

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}
