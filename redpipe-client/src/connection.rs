//! Connection management.

use crate::batch::Batch;
use crate::counters::{CounterSnapshot, Counters};
use crate::error::{ClientError, ConnectError};
use crate::pending::{PendingEntry, PendingQueue, PendingReply};
use crate::state::ConnectionState;
use crate::transport::{self, Flush, FlushSender, Transport};
use bytes::BytesMut;
use parking_lot::Mutex;
use redpipe_protocol::{Command, Decoder, Encoder, ProtocolError, Reply, PING_FRAME};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server endpoint as `host:port`. A bare host connects on the default port.
    pub endpoint: String,
    /// Bound on resolution, TCP connect and handshake together.
    pub connect_timeout: Duration,
    /// Deadline applied when waiting for a reply. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Maximum number of requests awaiting a reply. `None` is unbounded.
    pub max_pending: Option<usize>,
    /// ACL username sent with AUTH.
    pub username: Option<String>,
    /// Password sent with AUTH during the handshake.
    pub password: Option<String>,
    /// Name registered with CLIENT SETNAME.
    pub client_name: Option<String>,
    /// Logical database chosen with SELECT.
    pub database: Option<u32>,
}

impl ConnectionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_pending: None,
            username: None,
            password: None,
            client_name: None,
            database: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_max_pending(mut self, limit: usize) -> Self {
        self.max_pending = Some(limit);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    pub fn with_database(mut self, db: u32) -> Self {
        self.database = Some(db);
        self
    }
}

/// State shared between callers, the reader task and the writer task.
pub(crate) struct Shared {
    config: ConnectionConfig,
    counters: Counters,
    core: Mutex<Core>,
    /// Runtime the I/O tasks run on; blocking waits are driven through it.
    runtime: OnceLock<Handle>,
}

/// Everything mutated by more than one actor, behind one lock.
///
/// Pushing onto the pending queue and queueing the matching flush happen in
/// the same critical section, so queue order always equals wire order.
struct Core {
    state: ConnectionState,
    pending: PendingQueue,
    /// Accumulation buffer for direct submissions.
    out_buf: BytesMut,
    writer: Option<FlushSender>,
}

impl Core {
    fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.state.accepts_requests() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }
}

impl Shared {
    fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            counters: Counters::default(),
            core: Mutex::new(Core {
                state: ConnectionState::Disconnected,
                pending: PendingQueue::default(),
                out_buf: BytesMut::with_capacity(4096),
                writer: None,
            }),
            runtime: OnceLock::new(),
        }
    }

    pub(crate) fn read_buffer_size(&self) -> usize {
        self.config.read_buffer_size
    }

    /// Creates a pending entry carrying this connection's wait settings.
    pub(crate) fn new_entry(&self, fire_and_forget: bool) -> (PendingEntry, Option<PendingReply>) {
        PendingEntry::new(
            fire_and_forget,
            self.config.request_timeout,
            self.runtime.get().cloned(),
        )
    }

    fn check_capacity(&self, core: &Core, additional: usize) -> Result<(), ClientError> {
        if let Some(limit) = self.config.max_pending {
            if core.pending.len() + additional > limit {
                return Err(ClientError::Backpressure { limit });
            }
        }
        Ok(())
    }

    /// Eager single-request path: encode, enqueue and flush as one unit.
    fn submit_direct(
        &self,
        fire_and_forget: bool,
        encode: impl FnOnce(&mut BytesMut),
    ) -> Result<Option<PendingReply>, ClientError> {
        let mut core = self.core.lock();
        core.ensure_connected()?;
        self.check_capacity(&core, 1)?;

        encode(&mut core.out_buf);
        let bytes = core.out_buf.split().freeze();

        let (entry, reply) = self.new_entry(fire_and_forget);
        core.pending.push(entry);
        self.flush_locked(&mut core, Flush { bytes, done: None }, 1)?;

        Ok(reply)
    }

    /// Batched path: all entries and their bytes enter the pipeline together.
    ///
    /// Returns a receiver notified once the bytes were written, or `None` for
    /// an empty batch.
    pub(crate) fn submit_batch(
        &self,
        entries: &mut Vec<PendingEntry>,
        buf: &mut BytesMut,
    ) -> Result<Option<oneshot::Receiver<Result<(), ClientError>>>, ClientError> {
        let mut core = self.core.lock();
        core.ensure_connected()?;
        self.check_capacity(&core, entries.len())?;

        if entries.is_empty() {
            return Ok(None);
        }

        let count = entries.len();
        core.pending.extend(entries.drain(..));

        let (done, rx) = oneshot::channel();
        let flush = Flush {
            bytes: buf.split().freeze(),
            done: Some(done),
        };
        self.flush_locked(&mut core, flush, count)?;
        tracing::trace!("batch of {} requests queued for flush", count);

        Ok(Some(rx))
    }

    /// Hands one flush carrying `requests` requests to the writer task.
    ///
    /// Counters move only once the writer has accepted the flush. The caller
    /// still holds the lock, so no reply can be matched before they do.
    fn flush_locked(
        &self,
        core: &mut Core,
        flush: Flush,
        requests: usize,
    ) -> Result<(), ClientError> {
        let sent = match core.writer {
            Some(ref writer) => writer.send(flush).is_ok(),
            None => false,
        };
        if !sent {
            let err = ClientError::Transport("writer task is gone".to_string());
            self.fault_locked(core, err.clone());
            return Err(err);
        }
        self.counters.record_out(requests);
        self.counters.record_flush();
        Ok(())
    }

    /// Decodes every complete reply and resolves pending entries front first.
    pub(crate) fn drain_incoming(&self, decoder: &mut Decoder) -> Result<(), ClientError> {
        loop {
            let reply = match decoder.decode_reply() {
                Ok(Some(reply)) => reply,
                Ok(None) => return Ok(()),
                Err(e) => {
                    let err = ClientError::Protocol(e);
                    self.fault(err.clone());
                    return Err(err);
                }
            };

            let entry = self.core.lock().pending.pop_front();
            match entry {
                Some(entry) => {
                    self.counters.record_in();
                    if entry.is_fire_and_forget() {
                        tracing::trace!("discarding reply to fire-and-forget request");
                    }
                    entry.complete(reply);
                }
                None => {
                    let err = ClientError::Protocol(ProtocolError::UnexpectedReply(format!(
                        "reply with no pending request: {}",
                        reply
                    )));
                    self.fault(err.clone());
                    return Err(err);
                }
            }
        }
    }

    /// Marks the connection unusable and fails every pending request.
    pub(crate) fn fault(&self, error: ClientError) {
        let mut core = self.core.lock();
        self.fault_locked(&mut core, error);
    }

    fn fault_locked(&self, core: &mut Core, error: ClientError) {
        if !core.state.is_terminal() {
            tracing::warn!("connection to {} faulted: {}", self.config.endpoint, error);
            core.state = ConnectionState::Faulted;
        }
        core.writer = None;

        if !core.pending.is_empty() {
            tracing::debug!("failing {} pending request(s)", core.pending.len());
        }
        for entry in core.pending.drain_all() {
            entry.fail(error.clone());
        }
    }

    /// Peer closed the stream.
    pub(crate) fn on_disconnected(&self) {
        let mut core = self.core.lock();
        if core.state == ConnectionState::Closed {
            return;
        }
        self.fault_locked(&mut core, ClientError::ConnectionClosed);
    }
}

/// A pipelined connection to a RESP server.
///
/// Requests are answered strictly in send order, so replies are matched to
/// requests by position. Direct submissions flush eagerly, one write each;
/// requests grouped in a [`Batch`] share one write.
///
/// Blocking methods drive the connection's runtime and must be called from
/// outside an async context, on a multi-threaded runtime's connection.
pub struct Connection {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
            reader: Mutex::new(None),
        }
    }

    /// Creates a connection and connects it over TCP.
    pub async fn open(config: ConnectionConfig) -> Result<Self, ConnectError> {
        let conn = Self::new(config);
        conn.connect().await?;
        Ok(conn)
    }

    /// Creates a connection over an already established stream.
    pub async fn from_stream<S: Transport>(
        stream: S,
        config: ConnectionConfig,
    ) -> Result<Self, ConnectError> {
        let conn = Self::new(config);
        conn.connect_with(stream).await?;
        Ok(conn)
    }

    /// Resolves the endpoint, connects over TCP and performs the handshake.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.begin_connect()?;

        let config = &self.shared.config;
        match transport::open_tcp(&config.endpoint, config.connect_timeout).await {
            Ok(stream) => self.finish_connect(stream).await,
            Err(e) => {
                self.connect_failed(&e);
                Err(e)
            }
        }
    }

    /// Performs the handshake over a caller-supplied stream.
    pub async fn connect_with<S: Transport>(&self, stream: S) -> Result<(), ConnectError> {
        self.begin_connect()?;
        self.finish_connect(stream).await
    }

    fn begin_connect(&self) -> Result<(), ConnectError> {
        let mut core = self.shared.core.lock();
        if core.state != ConnectionState::Disconnected {
            return Err(ConnectError::InvalidState(core.state));
        }
        core.state = ConnectionState::Connecting;
        Ok(())
    }

    fn connect_failed(&self, error: &ConnectError) {
        tracing::debug!("Connect to {} failed: {}", self.shared.config.endpoint, error);
        let mut core = self.shared.core.lock();
        if core.state == ConnectionState::Connecting {
            core.state = ConnectionState::Faulted;
        }
    }

    async fn finish_connect<S: Transport>(&self, mut stream: S) -> Result<(), ConnectError> {
        let config = &self.shared.config;
        let mut decoder = Decoder::with_capacity(config.read_buffer_size);

        tracing::debug!("Starting handshake with {}...", config.endpoint);
        let result = tokio::time::timeout(
            config.connect_timeout,
            handshake(&mut stream, config, &mut decoder),
        )
        .await
        .unwrap_or(Err(ConnectError::Timeout(config.connect_timeout)));

        if let Err(e) = result {
            self.connect_failed(&e);
            return Err(e);
        }
        tracing::debug!("Handshake complete");

        self.install(stream, decoder)
    }

    /// Splits the stream and starts the reader and writer tasks.
    fn install<S: Transport>(&self, stream: S, decoder: Decoder) -> Result<(), ConnectError> {
        let _ = self.shared.runtime.set(Handle::current());
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut core = self.shared.core.lock();
            if core.state != ConnectionState::Connecting {
                // Closed while the handshake was in flight.
                return Err(ConnectError::InvalidState(core.state));
            }
            core.state = ConnectionState::Connected;
            core.writer = Some(tx);
        }

        tokio::spawn(transport::write_loop(self.shared.clone(), write_half, rx));
        let reader = tokio::spawn(transport::read_loop(
            self.shared.clone(),
            read_half,
            decoder,
        ));
        *self.reader.lock() = Some(reader);

        Ok(())
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.core.lock().state
    }

    /// Returns whether the connection accepts requests.
    pub fn is_connected(&self) -> bool {
        self.state().accepts_requests()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Requests handed to the transport.
    pub fn out_count(&self) -> u64 {
        self.shared.counters.out_count()
    }

    /// Replies matched back to a request.
    pub fn in_count(&self) -> u64 {
        self.shared.counters.in_count()
    }

    /// Discrete writes performed on the transport.
    pub fn flush_count(&self) -> u64 {
        self.shared.counters.flush_count()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    /// Returns the number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.core.lock().pending.len()
    }

    /// Submits a command and flushes it immediately.
    ///
    /// Returns the reply handle, or `None` for fire-and-forget requests.
    pub fn submit(
        &self,
        command: &Command,
        fire_and_forget: bool,
    ) -> Result<Option<PendingReply>, ClientError> {
        self.shared
            .submit_direct(fire_and_forget, |buf| Encoder::encode_command(command, buf))
    }

    /// Submits a command and waits for its reply without blocking a thread.
    pub async fn submit_async(
        &self,
        command: &Command,
        fire_and_forget: bool,
    ) -> Result<Option<Reply>, ClientError> {
        match self.submit(command, fire_and_forget)? {
            Some(reply) => reply.wait().await.map(Some),
            None => Ok(None),
        }
    }

    /// Submits a command and blocks the calling thread until its reply arrives.
    ///
    /// Fire-and-forget requests return as soon as they are queued.
    pub fn submit_blocking(
        &self,
        command: &Command,
        fire_and_forget: bool,
    ) -> Result<Option<Reply>, ClientError> {
        match self.submit(command, fire_and_forget)? {
            Some(reply) => reply.wait_blocking().map(Some),
            None => Ok(None),
        }
    }

    /// Sends a PING and blocks until the reply arrives (unless fire-and-forget).
    pub fn ping(&self, fire_and_forget: bool) -> Result<Option<Reply>, ClientError> {
        match self.submit_ping(fire_and_forget)? {
            Some(reply) => reply.wait_blocking().map(Some),
            None => Ok(None),
        }
    }

    /// Sends a PING and waits for the reply (unless fire-and-forget).
    pub async fn ping_async(&self, fire_and_forget: bool) -> Result<Option<Reply>, ClientError> {
        match self.submit_ping(fire_and_forget)? {
            Some(reply) => reply.wait().await.map(Some),
            None => Ok(None),
        }
    }

    fn submit_ping(&self, fire_and_forget: bool) -> Result<Option<PendingReply>, ClientError> {
        self.shared
            .submit_direct(fire_and_forget, |buf| buf.extend_from_slice(PING_FRAME))
    }

    /// Starts a batch. Nothing reaches the transport until it is executed.
    pub fn create_batch(&self) -> Batch<'_> {
        Batch::new(self)
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Closes the connection, failing every pending request.
    ///
    /// Requests already queued for writing are still flushed before the write
    /// side shuts down.
    pub fn close(&self) {
        {
            let mut core = self.shared.core.lock();
            if core.state == ConnectionState::Closed {
                return;
            }
            tracing::debug!("Closing connection to {}", self.shared.config.endpoint);
            core.state = ConnectionState::Closed;
            core.writer = None;

            let pending = core.pending.drain_all();
            tracing::debug!("Clearing {} pending requests", pending.len());
            for entry in pending {
                entry.fail(ClientError::ConnectionClosed);
            }
        }

        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sends the optional AUTH / CLIENT SETNAME / SELECT and a final PING in one
/// write, then reads their replies directly from the stream.
async fn handshake<S>(
    stream: &mut S,
    config: &ConnectionConfig,
    decoder: &mut Decoder,
) -> Result<(), ConnectError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut commands = Vec::new();
    if let Some(ref password) = config.password {
        commands.push(Command::auth(config.username.as_deref(), password));
    }
    if let Some(ref name) = config.client_name {
        commands.push(Command::client_setname(name));
    }
    if let Some(db) = config.database {
        commands.push(Command::select(db));
    }
    commands.push(Command::ping());

    let mut buf = BytesMut::new();
    for command in &commands {
        Encoder::encode_command(command, &mut buf);
    }
    tracing::debug!(
        "Sending {} handshake command(s) ({} bytes)",
        commands.len(),
        buf.len()
    );
    stream.write_all(&buf).await?;
    stream.flush().await?;

    let mut read_buf = vec![0u8; config.read_buffer_size];
    for command in &commands {
        let reply = read_single_reply(stream, decoder, &mut read_buf).await?;
        let name = String::from_utf8_lossy(command.name()).into_owned();
        match reply {
            Reply::Error(message) => {
                return Err(ConnectError::Handshake(format!(
                    "{} rejected: {}",
                    name, message
                )));
            }
            ref other if command.name() == b"PING" && !other.is_pong() => {
                return Err(ConnectError::Handshake(format!(
                    "unexpected PING reply: {}",
                    other
                )));
            }
            _ => tracing::debug!("{} accepted", name),
        }
    }

    Ok(())
}

/// Reads until one complete reply is decoded. Used before the reader task runs.
async fn read_single_reply<S>(
    stream: &mut S,
    decoder: &mut Decoder,
    buf: &mut [u8],
) -> Result<Reply, ConnectError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(reply) = decoder.decode_reply()? {
            return Ok(reply);
        }
        let n = stream.read(buf).await?;
        if n == 0 {
            return Err(ConnectError::Handshake(
                "connection closed during handshake".to_string(),
            ));
        }
        decoder.extend(&buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_server, wait_for_state};
    use bytes::Bytes;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("fake:6379")
    }

    fn echo(tag: &str) -> Command {
        Command::new("ECHO").arg(tag.to_string())
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new("127.0.0.1:6379");
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.max_pending, None);
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config = ConnectionConfig::new("127.0.0.1:6379").with_read_buffer_size(100);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config =
            ConnectionConfig::new("127.0.0.1:6379").with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_submit_while_disconnected() {
        let conn = Connection::new(config());
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        assert_eq!(conn.ping(false), Err(ClientError::NotConnected));
        assert_eq!(conn.ping(true), Err(ClientError::NotConnected));
        assert!(matches!(
            conn.submit(&Command::ping(), false),
            Err(ClientError::NotConnected)
        ));

        assert_eq!(conn.counters(), CounterSnapshot::default());
        assert_eq!(conn.pending_count(), 0);
    }

    #[test]
    fn test_submit_after_writer_gone_counts_nothing() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let conn = rt
            .block_on(async { Connection::from_stream(spawn_server(), config()).await })
            .unwrap();
        // Shutting the runtime down drops the writer task and its receiver.
        drop(rt);

        let result = conn.submit(&Command::ping(), true);
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert_eq!(conn.state(), ConnectionState::Faulted);
        assert_eq!(conn.counters(), CounterSnapshot::default());
        assert_eq!(conn.pending_count(), 0);
    }

    #[test]
    fn test_single_blocking_ping() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let conn = rt
            .block_on(async { Connection::from_stream(spawn_server(), config()).await })
            .unwrap();
        assert!(conn.is_connected());

        let reply = conn.ping(false).unwrap();
        assert_eq!(reply, Some(Reply::Simple("PONG".into())));

        let counters = conn.counters();
        assert_eq!(counters.out_count, 1);
        assert_eq!(counters.in_count, 1);
        assert_eq!(counters.flush_count, 1);
    }

    #[tokio::test]
    async fn test_direct_submissions_flush_each() {
        let conn = Connection::from_stream(spawn_server(), config())
            .await
            .unwrap();

        for _ in 0..50 {
            let reply = conn.ping_async(false).await.unwrap();
            assert!(reply.unwrap().is_pong());
        }

        assert_eq!(conn.out_count(), 50);
        assert_eq!(conn.in_count(), 50);
        assert_eq!(conn.flush_count(), 50);
    }

    #[tokio::test]
    async fn test_fire_and_forget_is_drained_but_not_surfaced() {
        let conn = Connection::from_stream(spawn_server(), config())
            .await
            .unwrap();

        for _ in 0..100 {
            assert_eq!(conn.ping_async(true).await.unwrap(), None);
        }
        conn.ping_async(false).await.unwrap();

        let counters = conn.counters();
        assert_eq!(counters.out_count, 101);
        assert_eq!(counters.in_count, 101);
        assert_eq!(counters.flush_count, 101);
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_pipelined_replies_match_in_order() {
        let conn = Connection::from_stream(spawn_server(), config())
            .await
            .unwrap();

        let replies: Vec<_> = (0..200)
            .map(|i| {
                conn.submit(&echo(&i.to_string()), false)
                    .unwrap()
                    .unwrap()
            })
            .collect();

        for (i, reply) in replies.into_iter().enumerate() {
            assert_eq!(
                reply.await.unwrap(),
                Reply::Bulk(Some(Bytes::from(i.to_string())))
            );
        }
        assert_eq!(conn.in_count(), 200);
    }

    #[tokio::test]
    async fn test_server_error_reply_is_local() {
        let conn = Connection::from_stream(spawn_server(), config())
            .await
            .unwrap();

        let result = conn.submit_async(&Command::new("NOSUCH"), false).await;
        assert!(matches!(result, Err(ClientError::Server(ref m)) if m.contains("unknown command")));

        assert!(conn.is_connected());
        assert!(conn.ping_async(false).await.unwrap().is_some());
        assert_eq!(conn.in_count(), 2);
    }

    #[tokio::test]
    async fn test_timeout_consumes_late_reply() {
        let conn = Connection::from_stream(
            spawn_server(),
            config().with_request_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();

        let slow = Command::new("SLEEP").arg("200");
        assert_eq!(
            conn.submit_async(&slow, false).await,
            Err(ClientError::Timeout)
        );
        assert!(conn.is_connected());

        // Queued behind the slow reply; must receive its own PONG, not the OK.
        let reply = conn
            .submit(&Command::ping(), false)
            .unwrap()
            .unwrap()
            .with_timeout(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(reply.is_pong());

        let counters = conn.counters();
        assert_eq!(counters.out_count, 2);
        assert_eq!(counters.in_count, 2);
    }

    #[tokio::test]
    async fn test_protocol_error_faults_all_pending() {
        let conn = Connection::from_stream(spawn_server(), config())
            .await
            .unwrap();

        let bad = conn.submit(&Command::new("GARBAGE"), false).unwrap().unwrap();
        let next = conn.submit(&Command::ping(), false).unwrap().unwrap();

        assert!(matches!(bad.await, Err(ClientError::Protocol(_))));
        assert!(matches!(next.await, Err(ClientError::Protocol(_))));
        assert_eq!(conn.state(), ConnectionState::Faulted);
        assert_eq!(
            conn.ping_async(false).await,
            Err(ClientError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_protocol_error_on_fire_and_forget_still_faults() {
        let conn = Connection::from_stream(spawn_server(), config())
            .await
            .unwrap();

        conn.submit(&Command::new("GARBAGE"), true).unwrap();
        wait_for_state(&conn, ConnectionState::Faulted).await;
        assert_eq!(conn.in_count(), 0);
    }

    #[tokio::test]
    async fn test_unsolicited_reply_faults() {
        let conn = Connection::from_stream(spawn_server(), config())
            .await
            .unwrap();

        let reply = conn.submit_async(&Command::new("DOUBLE"), false).await;
        assert!(reply.unwrap().unwrap().is_pong());

        wait_for_state(&conn, ConnectionState::Faulted).await;
        assert_eq!(conn.in_count(), 1);
    }

    #[tokio::test]
    async fn test_peer_hangup_fails_pending() {
        let conn = Connection::from_stream(spawn_server(), config())
            .await
            .unwrap();

        let result = conn.submit_async(&Command::new("QUIT"), false).await;
        assert_eq!(result, Err(ClientError::ConnectionClosed));
        assert_eq!(conn.state(), ConnectionState::Faulted);
    }

    #[tokio::test]
    async fn test_close_fails_pending() {
        let conn = Connection::from_stream(spawn_server(), config())
            .await
            .unwrap();

        let slow = conn
            .submit(&Command::new("SLEEP").arg("500"), false)
            .unwrap()
            .unwrap();
        conn.close();

        assert_eq!(slow.await, Err(ClientError::ConnectionClosed));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.ping_async(true).await, Err(ClientError::NotConnected));
        assert_eq!(conn.out_count(), 1);
    }

    #[tokio::test]
    async fn test_backpressure_limit() {
        let conn = Connection::from_stream(spawn_server(), config().with_max_pending(2))
            .await
            .unwrap();

        let slow = conn
            .submit(&Command::new("SLEEP").arg("100"), false)
            .unwrap()
            .unwrap();
        let ping = conn.submit(&Command::ping(), false).unwrap().unwrap();
        assert!(matches!(
            conn.submit(&Command::ping(), true),
            Err(ClientError::Backpressure { limit: 2 })
        ));
        assert_eq!(conn.out_count(), 2);

        slow.await.unwrap();
        ping.await.unwrap();
        assert!(conn.ping_async(false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_handshake_sends_setup_in_one_write() {
        let mut expected = BytesMut::new();
        Encoder::encode_command(&Command::auth(Some("app"), "secret"), &mut expected);
        Encoder::encode_command(&Command::client_setname("bench"), &mut expected);
        Encoder::encode_command(&Command::select(2), &mut expected);
        Encoder::encode_command(&Command::ping(), &mut expected);

        let mock = tokio_test::io::Builder::new()
            .write(&expected)
            .read(b"+OK\r\n+OK\r\n+OK\r\n+PONG\r\n")
            .build();

        let config = config()
            .with_username("app")
            .with_password("secret")
            .with_client_name("bench")
            .with_database(2);
        let conn = Connection::new(config);
        conn.connect_with(mock).await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let mut expected = BytesMut::new();
        Encoder::encode_command(&Command::auth(None, "wrong"), &mut expected);
        Encoder::encode_command(&Command::ping(), &mut expected);

        let mock = tokio_test::io::Builder::new()
            .write(&expected)
            .read(b"-WRONGPASS invalid password\r\n-NOAUTH Authentication required.\r\n")
            .build();

        let conn = Connection::new(config().with_password("wrong"));
        let err = conn.connect_with(mock).await.unwrap_err();
        assert!(matches!(err, ConnectError::Handshake(ref m) if m.contains("WRONGPASS")));
        assert_eq!(conn.state(), ConnectionState::Faulted);
        assert_eq!(conn.ping_async(false).await, Err(ClientError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_twice_rejected() {
        let conn = Connection::from_stream(spawn_server(), config())
            .await
            .unwrap();
        let err = conn.connect_with(spawn_server()).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectError::InvalidState(ConnectionState::Connected)
        ));
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_unresolvable_endpoint() {
        let conn = Connection::new(ConnectionConfig::new("missing-port"));
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, ConnectError::Resolve { .. }));
        assert_eq!(conn.state(), ConnectionState::Faulted);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to find a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = Connection::open(ConnectionConfig::new(addr.to_string())).await;
        assert!(matches!(
            result,
            Err(ConnectError::Refused { .. }) | Err(ConnectError::Io(_))
        ));
    }
}
