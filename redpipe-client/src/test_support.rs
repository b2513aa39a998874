//! In-process servers and streams for tests.

use crate::connection::Connection;
use crate::state::ConnectionState;
use bytes::BytesMut;
use redpipe_protocol::{Decoder, Encoder, Reply, PING_FRAME};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

/// Spawns a fake RESP server on one end of an in-memory pipe and returns the
/// client end.
///
/// Commands: `PING`, `ECHO x`, `AUTH`, `CLIENT`, `SELECT` behave like a real
/// server. `SLEEP ms` delays its `+OK`. `GARBAGE` answers with a malformed
/// frame, `DOUBLE` answers twice, `QUIT` hangs up without answering.
pub(crate) fn spawn_server() -> DuplexStream {
    let (client, server) = tokio::io::duplex(256 * 1024);
    tokio::spawn(serve(server));
    client
}

enum Action {
    Reply(Reply),
    Raw(&'static [u8]),
    Sleep(u64),
    Hangup,
}

async fn serve(mut stream: DuplexStream) {
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; 8192];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);

        let mut out = BytesMut::new();
        while let Ok(Some(request)) = decoder.decode_reply() {
            match handle(&request) {
                Action::Reply(reply) => Encoder::encode_reply(&reply, &mut out),
                Action::Raw(bytes) => out.extend_from_slice(bytes),
                Action::Sleep(ms) => {
                    if stream.write_all(&out).await.is_err() {
                        return;
                    }
                    out.clear();
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Encoder::encode_reply(&Reply::Simple("OK".into()), &mut out);
                }
                Action::Hangup => {
                    let _ = stream.write_all(&out).await;
                    return;
                }
            }
        }

        if stream.write_all(&out).await.is_err() {
            return;
        }
    }
}

fn handle(request: &Reply) -> Action {
    let args: Vec<&[u8]> = match request {
        Reply::Array(Some(items)) => items
            .iter()
            .filter_map(|item| match item {
                Reply::Bulk(Some(b)) => Some(b.as_ref()),
                _ => None,
            })
            .collect(),
        _ => return Action::Reply(Reply::Error("ERR malformed request".into())),
    };

    let name = args
        .first()
        .map(|n| String::from_utf8_lossy(n).to_ascii_uppercase())
        .unwrap_or_default();

    match name.as_str() {
        "PING" => Action::Reply(Reply::Simple("PONG".into())),
        "ECHO" if args.len() == 2 => {
            Action::Reply(Reply::Bulk(Some(bytes::Bytes::copy_from_slice(args[1]))))
        }
        "AUTH" | "CLIENT" | "SELECT" => Action::Reply(Reply::Simple("OK".into())),
        "SLEEP" => {
            let ms = args
                .get(1)
                .and_then(|v| std::str::from_utf8(v).ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            Action::Sleep(ms)
        }
        "GARBAGE" => Action::Raw(b"?bad\r\n"),
        "DOUBLE" => Action::Raw(b"+PONG\r\n+PONG\r\n"),
        "QUIT" => Action::Hangup,
        _ => Action::Reply(Reply::Error(format!("ERR unknown command '{}'", name))),
    }
}

/// Waits up to one second for `conn` to reach `state`.
pub(crate) async fn wait_for_state(conn: &Connection, state: ConnectionState) {
    for _ in 0..200 {
        if conn.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("connection stayed {} instead of {}", conn.state(), state);
}

/// Stream that answers the handshake PING, accepts `budget` more bytes, then
/// fails every write. Reads stall once the handshake reply is consumed.
pub(crate) struct FailingStream {
    inbound: Vec<u8>,
    budget: usize,
}

impl FailingStream {
    pub(crate) fn new(after_handshake: usize) -> Self {
        Self {
            inbound: b"+PONG\r\n".to_vec(),
            budget: PING_FRAME.len() + after_handshake,
        }
    }
}

impl AsyncRead for FailingStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.inbound.is_empty() {
            return Poll::Pending;
        }
        let n = self.inbound.len().min(buf.remaining());
        buf.put_slice(&self.inbound[..n]);
        self.inbound.drain(..n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for FailingStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.len() > self.budget {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated write failure",
            )));
        }
        self.budget -= buf.len();
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
