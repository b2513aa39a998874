//! Batch builder: requests that share one transport write.

use crate::connection::Connection;
use crate::error::ClientError;
use crate::pending::{PendingEntry, PendingReply};
use bytes::BytesMut;
use redpipe_protocol::{Command, Encoder, PING_FRAME};
use tokio::sync::oneshot;

/// A group of requests flushed together.
///
/// Enqueueing only encodes into the batch's private buffer; the connection's
/// counters and pending queue are untouched until [`execute`](Self::execute)
/// pushes every entry and writes every byte as one indivisible step, so no
/// other submitter can interleave between the batch's requests. A batch runs
/// at most once.
///
/// Dropping a batch without executing it resolves its reply handles with
/// [`ClientError::Abandoned`].
pub struct Batch<'a> {
    conn: &'a Connection,
    buf: BytesMut,
    entries: Vec<PendingEntry>,
    executed: bool,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            buf: BytesMut::new(),
            entries: Vec::new(),
            executed: false,
        }
    }

    /// Adds a command. Returns its reply handle unless fire-and-forget.
    pub fn enqueue(
        &mut self,
        command: &Command,
        fire_and_forget: bool,
    ) -> Result<Option<PendingReply>, ClientError> {
        self.push(fire_and_forget, |buf| Encoder::encode_command(command, buf))
    }

    /// Adds a PING.
    pub fn enqueue_ping(
        &mut self,
        fire_and_forget: bool,
    ) -> Result<Option<PendingReply>, ClientError> {
        self.push(fire_and_forget, |buf| buf.extend_from_slice(PING_FRAME))
    }

    fn push(
        &mut self,
        fire_and_forget: bool,
        encode: impl FnOnce(&mut BytesMut),
    ) -> Result<Option<PendingReply>, ClientError> {
        if self.executed {
            return Err(ClientError::BatchAlreadyExecuted);
        }
        encode(&mut self.buf);
        let (entry, reply) = self.conn.shared().new_entry(fire_and_forget);
        self.entries.push(entry);
        Ok(reply)
    }

    /// Number of requests enqueued and not yet executed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Executes the batch and blocks until its bytes were written.
    ///
    /// Does not wait for replies; use the handles returned by `enqueue`.
    /// Must not be called from within an async context.
    pub fn execute(&mut self) -> Result<(), ClientError> {
        match self.dispatch()? {
            Some(written) => written
                .blocking_recv()
                .unwrap_or(Err(ClientError::ConnectionClosed)),
            None => Ok(()),
        }
    }

    /// Executes the batch and waits until its bytes were written.
    pub async fn execute_async(&mut self) -> Result<(), ClientError> {
        match self.dispatch()? {
            Some(written) => written.await.unwrap_or(Err(ClientError::ConnectionClosed)),
            None => Ok(()),
        }
    }

    /// Hands the batch to the connection. A rejected batch (not connected,
    /// over the pending limit) stays unexecuted and may be retried.
    fn dispatch(
        &mut self,
    ) -> Result<Option<oneshot::Receiver<Result<(), ClientError>>>, ClientError> {
        if self.executed {
            return Err(ClientError::BatchAlreadyExecuted);
        }
        let written = self
            .conn
            .shared()
            .submit_batch(&mut self.entries, &mut self.buf)?;
        self.executed = true;
        Ok(written)
    }
}
