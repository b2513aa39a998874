//! Transport adapter: TCP setup and the reader/writer tasks.
//!
//! The core only needs ordered, reliable byte delivery in both directions, so
//! any `AsyncRead + AsyncWrite` stream can carry a connection.

use crate::connection::Shared;
use crate::error::{ClientError, ConnectError};
use bytes::Bytes;
use redpipe_protocol::{Decoder, DEFAULT_PORT};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

/// Byte stream a connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Transport for T {}

/// One transport write: the bytes of one direct request or one whole batch.
pub(crate) struct Flush {
    pub(crate) bytes: Bytes,
    /// Notified once the bytes were written, or with the write error.
    pub(crate) done: Option<oneshot::Sender<Result<(), ClientError>>>,
}

pub(crate) type FlushSender = mpsc::UnboundedSender<Flush>;
pub(crate) type FlushReceiver = mpsc::UnboundedReceiver<Flush>;

/// Appends the default port to an endpoint that names only a host.
pub(crate) fn with_default_port(endpoint: &str) -> String {
    if let Ok(ip) = endpoint.parse::<IpAddr>() {
        return SocketAddr::new(ip, DEFAULT_PORT).to_string();
    }
    match endpoint.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => endpoint.to_string(),
        _ => format!("{}:{}", endpoint, DEFAULT_PORT),
    }
}

/// Resolves `endpoint` and opens a TCP stream to the first address that accepts.
pub(crate) async fn open_tcp(endpoint: &str, timeout: Duration) -> Result<TcpStream, ConnectError> {
    let target = with_default_port(endpoint);
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&target)
        .await
        .map_err(|e| ConnectError::Resolve {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ConnectError::Resolve {
            endpoint: endpoint.to_string(),
            reason: "no addresses found".to_string(),
        });
    }

    let mut last_err = None;
    for addr in addrs {
        tracing::debug!("Connecting to {}...", addr);
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Err(_) => {
                tracing::debug!("Connection to {} timed out", addr);
                last_err = Some(ConnectError::Timeout(timeout));
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                tracing::debug!("Connection to {} refused", addr);
                last_err = Some(ConnectError::Refused { addr });
            }
            Ok(Err(e)) => {
                tracing::debug!("Connection to {} failed: {}", addr, e);
                last_err = Some(ConnectError::Io(e));
            }
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                return Ok(stream);
            }
        }
    }

    Err(last_err.unwrap_or(ConnectError::Timeout(timeout)))
}

/// Writes flushes in the order they were queued. Exits when every sender is
/// gone or the first write fails; flushes still queued then fail with the
/// same error.
pub(crate) async fn write_loop<W>(shared: Arc<Shared>, mut writer: W, mut rx: FlushReceiver)
where
    W: AsyncWrite + Unpin,
{
    while let Some(flush) = rx.recv().await {
        let result = async {
            writer.write_all(&flush.bytes).await?;
            writer.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                tracing::trace!("flushed {} bytes", flush.bytes.len());
                if let Some(done) = flush.done {
                    let _ = done.send(Ok(()));
                }
            }
            Err(e) => {
                let err = ClientError::from(e);
                shared.fault(err.clone());
                if let Some(done) = flush.done {
                    let _ = done.send(Err(err.clone()));
                }

                // Flushes queued behind the failed one never reach the wire.
                rx.close();
                while let Ok(queued) = rx.try_recv() {
                    if let Some(done) = queued.done {
                        let _ = done.send(Err(err.clone()));
                    }
                }
                return;
            }
        }
    }

    tracing::debug!("write_loop: all senders dropped, shutting down");
    let _ = writer.shutdown().await;
}

/// Feeds incoming bytes to the decoder and drains complete replies.
pub(crate) async fn read_loop<R>(shared: Arc<Shared>, mut reader: R, mut decoder: Decoder)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; shared.read_buffer_size()];

    // Replies that arrived together with the handshake's last reply.
    if decoder.buffered() > 0 && shared.drain_incoming(&mut decoder).is_err() {
        return;
    }

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("read_loop: connection closed by peer");
                shared.on_disconnected();
                return;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("read_loop: read failed: {}", e);
                shared.fault(ClientError::from(e));
                return;
            }
        };

        tracing::trace!("read_loop: received {} bytes", n);
        decoder.extend(&buf[..n]);

        if shared.drain_incoming(&mut decoder).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port_added_to_bare_host() {
        assert_eq!(with_default_port("localhost"), "localhost:6379");
        assert_eq!(with_default_port("10.0.0.5"), "10.0.0.5:6379");
        assert_eq!(with_default_port("::1"), "[::1]:6379");
    }

    #[test]
    fn test_explicit_port_kept() {
        assert_eq!(with_default_port("localhost:6380"), "localhost:6380");
        assert_eq!(with_default_port("[::1]:7000"), "[::1]:7000");
    }
}
