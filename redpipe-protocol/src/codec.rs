//! Encoder and decoder for RESP2 frames.

use crate::command::Command;
use crate::error::ProtocolError;
use crate::reply::Reply;
use crate::{MAX_ARRAY_LEN, MAX_BULK_LEN, MAX_LINE_LEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Pre-encoded `PING` command.
pub const PING_FRAME: &[u8] = b"*1\r\n$4\r\nPING\r\n";

/// Maximum depth of nested arrays accepted by the decoder.
const MAX_NESTING: usize = 64;

/// Encodes commands and replies into RESP2 frames.
pub struct Encoder;

impl Encoder {
    /// Appends a command to `dst` as an array of bulk strings.
    ///
    /// Existing bytes in `dst` are left untouched, so several commands can be
    /// accumulated in one buffer and flushed together.
    pub fn encode_command(command: &Command, dst: &mut BytesMut) {
        let args = command.args();
        put_header(dst, b'*', args.len() as i64);
        for arg in args {
            put_header(dst, b'$', arg.len() as i64);
            dst.put_slice(arg);
            dst.put_slice(b"\r\n");
        }
    }

    /// Encodes a single command into a fresh buffer.
    pub fn command_to_bytes(command: &Command) -> BytesMut {
        let mut buf = BytesMut::new();
        Self::encode_command(command, &mut buf);
        buf
    }

    /// Appends a reply to `dst`, as a server would send it.
    pub fn encode_reply(reply: &Reply, dst: &mut BytesMut) {
        match reply {
            Reply::Simple(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Reply::Error(e) => {
                dst.put_u8(b'-');
                dst.put_slice(e.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Reply::Integer(i) => put_header(dst, b':', *i),
            Reply::Bulk(None) => put_header(dst, b'$', -1),
            Reply::Bulk(Some(data)) => {
                put_header(dst, b'$', data.len() as i64);
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Reply::Array(None) => put_header(dst, b'*', -1),
            Reply::Array(Some(items)) => {
                put_header(dst, b'*', items.len() as i64);
                for item in items {
                    Self::encode_reply(item, dst);
                }
            }
        }
    }
}

fn put_header(dst: &mut BytesMut, kind: u8, value: i64) {
    dst.put_u8(kind);
    dst.put_slice(value.to_string().as_bytes());
    dst.put_slice(b"\r\n");
}

/// Incremental reply decoder.
///
/// Bytes are appended as they arrive; a reply is consumed from the buffer only
/// once it is complete, so partial frames are carried across reads. Progress
/// through an incomplete frame is remembered, so a large array arriving over
/// many reads is scanned once rather than from its start on every read.
pub struct Decoder {
    buffer: BytesMut,
    scan: Scan,
}

/// Resumable search for the end of the frame at the front of the buffer.
#[derive(Debug, Default)]
struct Scan {
    /// Offset of the next element header not yet scanned.
    pos: usize,
    /// Elements still expected by each open array, innermost last.
    open: Vec<usize>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_capacity(8192)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            scan: Scan::default(),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next reply.
    ///
    /// Returns `Ok(None)` while the buffer holds only an incomplete frame.
    pub fn decode_reply(&mut self) -> Result<Option<Reply>, ProtocolError> {
        let end = match scan_frame(&self.buffer, &mut self.scan)? {
            Some(end) => end,
            None => return Ok(None),
        };
        self.scan = Scan::default();

        match parse(&self.buffer[..end], 0, 0)? {
            Some((reply, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(reply))
            }
            None => Err(ProtocolError::UnexpectedReply(
                "frame ended early".to_string(),
            )),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan = Scan::default();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Advances `scan` through complete element headers and bulk payloads.
///
/// Returns the end offset of the first frame once it is complete. Only
/// lengths and framing are checked here; `parse` validates the contents.
fn scan_frame(buf: &[u8], scan: &mut Scan) -> Result<Option<usize>, ProtocolError> {
    loop {
        if scan.pos >= buf.len() {
            return Ok(None);
        }
        if scan.open.len() > MAX_NESTING {
            return Err(ProtocolError::UnexpectedReply(format!(
                "arrays nested deeper than {}",
                MAX_NESTING
            )));
        }

        let kind = buf[scan.pos];
        let (line, next) = match read_line(buf, scan.pos + 1)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let mut end = next;
        match kind {
            b'+' | b'-' | b':' => {}
            b'$' => {
                let len = parse_int(line)?;
                if len != -1 {
                    let len = checked_len(len)?;
                    if len > MAX_BULK_LEN {
                        return Err(ProtocolError::BulkTooLarge {
                            size: len,
                            max: MAX_BULK_LEN,
                        });
                    }
                    end = next + len + 2;
                    if buf.len() < end {
                        return Ok(None);
                    }
                }
            }
            b'*' => {
                let len = parse_int(line)?;
                if len > 0 {
                    let len = checked_len(len)?;
                    if len > MAX_ARRAY_LEN {
                        return Err(ProtocolError::ArrayTooLarge {
                            len,
                            max: MAX_ARRAY_LEN,
                        });
                    }
                    scan.open.push(len);
                    scan.pos = next;
                    continue;
                }
                if len < -1 {
                    return Err(ProtocolError::InvalidLength(len));
                }
            }
            other => return Err(ProtocolError::InvalidType(other)),
        }

        // One element done; close every array it completes.
        scan.pos = end;
        loop {
            match scan.open.last_mut() {
                None => return Ok(Some(scan.pos)),
                Some(remaining) => {
                    *remaining -= 1;
                    if *remaining > 0 {
                        break;
                    }
                    scan.open.pop();
                }
            }
        }
    }
}

/// Parses one reply starting at `pos`; returns it with the offset just past it.
fn parse(buf: &[u8], pos: usize, depth: usize) -> Result<Option<(Reply, usize)>, ProtocolError> {
    if pos >= buf.len() {
        return Ok(None);
    }
    if depth > MAX_NESTING {
        return Err(ProtocolError::UnexpectedReply(format!(
            "arrays nested deeper than {}",
            MAX_NESTING
        )));
    }

    let kind = buf[pos];
    let (line, next) = match read_line(buf, pos + 1)? {
        Some(found) => found,
        None => return Ok(None),
    };

    match kind {
        b'+' => Ok(Some((Reply::Simple(line_str(line)?.to_string()), next))),
        b'-' => Ok(Some((Reply::Error(line_str(line)?.to_string()), next))),
        b':' => Ok(Some((Reply::Integer(parse_int(line)?), next))),
        b'$' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some((Reply::Bulk(None), next)));
            }
            let len = checked_len(len)?;
            if len > MAX_BULK_LEN {
                return Err(ProtocolError::BulkTooLarge {
                    size: len,
                    max: MAX_BULK_LEN,
                });
            }
            let end = next + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(ProtocolError::MissingCrlf);
            }
            let data = Bytes::copy_from_slice(&buf[next..end]);
            Ok(Some((Reply::Bulk(Some(data)), end + 2)))
        }
        b'*' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some((Reply::Array(None), next)));
            }
            let len = checked_len(len)?;
            if len > MAX_ARRAY_LEN {
                return Err(ProtocolError::ArrayTooLarge {
                    len,
                    max: MAX_ARRAY_LEN,
                });
            }
            let mut items = Vec::with_capacity(len.min(1024));
            let mut cursor = next;
            for _ in 0..len {
                match parse(buf, cursor, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Reply::Array(Some(items)), cursor)))
        }
        other => Err(ProtocolError::InvalidType(other)),
    }
}

/// Finds the CRLF-terminated line starting at `pos`.
///
/// Lines longer than `MAX_LINE_LEN` are rejected without waiting for their end.
fn read_line(buf: &[u8], pos: usize) -> Result<Option<(&[u8], usize)>, ProtocolError> {
    let rest = match buf.get(pos..) {
        Some(rest) => rest,
        None => return Ok(None),
    };
    let window = &rest[..rest.len().min(MAX_LINE_LEN + 2)];
    match window.iter().position(|&b| b == b'\n') {
        None if rest.len() > MAX_LINE_LEN + 1 => Err(ProtocolError::LineTooLong {
            max: MAX_LINE_LEN,
        }),
        None => Ok(None),
        Some(i) => {
            if i == 0 || rest[i - 1] != b'\r' {
                return Err(ProtocolError::MissingCrlf);
            }
            Ok(Some((&rest[..i - 1], pos + i + 1)))
        }
    }
}

fn line_str(line: &[u8]) -> Result<&str, ProtocolError> {
    std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)
}

fn parse_int(line: &[u8]) -> Result<i64, ProtocolError> {
    let text = line_str(line)?;
    text.parse()
        .map_err(|_| ProtocolError::InvalidInteger(text.to_string()))
}

fn checked_len(len: i64) -> Result<usize, ProtocolError> {
    usize::try_from(len).map_err(|_| ProtocolError::InvalidLength(len))
}
