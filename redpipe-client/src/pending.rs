//! Pending queue: positional correlation of replies to requests.
//!
//! The server answers requests strictly in the order it received them, so the
//! Nth reply read from the transport always belongs to the Nth entry still in
//! the queue. No request identifiers are needed; correlation is a pop-front.

use crate::error::ClientError;
use redpipe_protocol::Reply;
use std::collections::VecDeque;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

type SlotResult = Result<Reply, ClientError>;

/// Who, if anyone, is told about the reply.
enum Waiter {
    Notify(oneshot::Sender<SlotResult>),
    Discard,
}

/// One outstanding request.
///
/// Holds no bytes, only the completion slot. A fire-and-forget entry still
/// occupies its position: the server replies to it like any other request.
pub(crate) struct PendingEntry {
    waiter: Waiter,
}

impl PendingEntry {
    /// Creates an entry and, unless fire-and-forget, the handle its caller waits on.
    pub(crate) fn new(
        fire_and_forget: bool,
        timeout: Option<Duration>,
        runtime: Option<Handle>,
    ) -> (Self, Option<PendingReply>) {
        if fire_and_forget {
            return (
                Self {
                    waiter: Waiter::Discard,
                },
                None,
            );
        }

        let (tx, rx) = oneshot::channel();
        let reply = PendingReply {
            rx,
            timeout,
            runtime,
        };
        (
            Self {
                waiter: Waiter::Notify(tx),
            },
            Some(reply),
        )
    }

    pub(crate) fn is_fire_and_forget(&self) -> bool {
        matches!(self.waiter, Waiter::Discard)
    }

    /// Resolves the slot with a decoded reply. Error replies fail the slot.
    pub(crate) fn complete(self, reply: Reply) {
        let result = match reply {
            Reply::Error(message) => Err(ClientError::Server(message)),
            other => Ok(other),
        };
        self.resolve(result);
    }

    pub(crate) fn fail(self, error: ClientError) {
        self.resolve(Err(error));
    }

    fn resolve(self, result: SlotResult) {
        if let Waiter::Notify(tx) = self.waiter {
            // The caller may have timed out or dropped its handle; the reply
            // has still been consumed, so the queue stays aligned.
            let _ = tx.send(result);
        }
    }
}

/// FIFO of outstanding requests. Callers serialize access with the
/// connection lock; push and pop-front are O(1).
#[derive(Default)]
pub(crate) struct PendingQueue {
    entries: VecDeque<PendingEntry>,
}

impl PendingQueue {
    pub(crate) fn push(&mut self, entry: PendingEntry) {
        self.entries.push_back(entry);
    }

    /// Appends a group of entries back to back, preserving their order.
    pub(crate) fn extend(&mut self, entries: impl IntoIterator<Item = PendingEntry>) {
        self.entries.extend(entries);
    }

    pub(crate) fn pop_front(&mut self) -> Option<PendingEntry> {
        self.entries.pop_front()
    }

    /// Removes every entry, oldest first.
    pub(crate) fn drain_all(&mut self) -> Vec<PendingEntry> {
        self.entries.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle to the eventual reply of a submitted request.
///
/// Await it (or call [`wait`](Self::wait)) from async code, or use
/// [`wait_blocking`](Self::wait_blocking) from a plain thread. Dropping it does
/// not cancel the request: the reply is still read and discarded.
pub struct PendingReply {
    rx: oneshot::Receiver<SlotResult>,
    timeout: Option<Duration>,
    runtime: Option<Handle>,
}

impl PendingReply {
    /// Overrides the deadline applied while waiting.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Waits for the reply without occupying a thread.
    pub async fn wait(self) -> Result<Reply, ClientError> {
        let received = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.rx)
                .await
                .map_err(|_| ClientError::Timeout)?,
            None => self.rx.await,
        };
        received.map_err(|_| ClientError::Abandoned)?
    }

    /// Blocks the calling thread until the reply arrives.
    ///
    /// Must not be called from within an async context.
    pub fn wait_blocking(self) -> Result<Reply, ClientError> {
        match self.runtime.clone() {
            Some(runtime) => runtime.block_on(self.wait()),
            None => self
                .rx
                .blocking_recv()
                .map_err(|_| ClientError::Abandoned)?,
        }
    }
}

impl IntoFuture for PendingReply {
    type Output = Result<Reply, ClientError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}
