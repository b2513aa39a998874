//! Decoded server replies.

use bytes::Bytes;
use std::fmt;

/// A RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`
    Simple(String),
    /// `-ERR message`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$3\r\nfoo`, `None` for the null bulk string `$-1`.
    Bulk(Option<Bytes>),
    /// `*2\r\n...`, `None` for the null array `*-1`.
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Returns whether this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Returns the textual content of simple strings and UTF-8 bulk strings.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Simple(s) => Some(s),
            Reply::Bulk(Some(b)) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Returns whether this is the `PONG` answer to a `PING`.
    pub fn is_pong(&self) -> bool {
        matches!(self, Reply::Simple(s) if s == "PONG")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Simple(s) => write!(f, "{}", s),
            Reply::Error(e) => write!(f, "(error) {}", e),
            Reply::Integer(i) => write!(f, "(integer) {}", i),
            Reply::Bulk(None) | Reply::Array(None) => write!(f, "(nil)"),
            Reply::Bulk(Some(b)) => write!(f, "{:?}", String::from_utf8_lossy(b)),
            Reply::Array(Some(items)) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_helpers() {
        assert!(Reply::Simple("PONG".into()).is_pong());
        assert!(!Reply::Simple("OK".into()).is_pong());
        assert!(Reply::Error("ERR".into()).is_error());
        assert_eq!(Reply::Bulk(Some(Bytes::from("v"))).as_str(), Some("v"));
        assert_eq!(Reply::Integer(1).as_str(), None);
    }

    #[test]
    fn test_reply_display() {
        assert_eq!(Reply::Integer(3).to_string(), "(integer) 3");
        assert_eq!(Reply::Bulk(None).to_string(), "(nil)");
        let arr = Reply::Array(Some(vec![Reply::Integer(1), Reply::Simple("a".into())]));
        assert_eq!(arr.to_string(), "[(integer) 1, a]");
    }
}
