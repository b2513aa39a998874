//! Per-connection throughput counters.
//!
//! Three independent rates: requests handed to the transport (`out`), replies
//! matched back to a pending request (`in`), and discrete flushes performed on
//! the transport (`flush`). With no requests in flight `out == in`; batching
//! is effective when `flush` stays far below `out`.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Counters {
    out: AtomicU64,
    incoming: AtomicU64,
    flush: AtomicU64,
}

impl Counters {
    pub(crate) fn record_out(&self, n: usize) {
        self.out.fetch_add(n as u64, Ordering::SeqCst);
    }

    pub(crate) fn record_in(&self) {
        self.incoming.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_flush(&self) {
        self.flush.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn out_count(&self) -> u64 {
        self.out.load(Ordering::SeqCst)
    }

    pub(crate) fn in_count(&self) -> u64 {
        self.incoming.load(Ordering::SeqCst)
    }

    pub(crate) fn flush_count(&self) -> u64 {
        self.flush.load(Ordering::SeqCst)
    }

    pub(crate) fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            out_count: self.out_count(),
            in_count: self.in_count(),
            flush_count: self.flush_count(),
        }
    }
}

/// Point-in-time copy of a connection's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub out_count: u64,
    pub in_count: u64,
    pub flush_count: u64,
}

impl CounterSnapshot {
    /// Returns the counts accumulated since `earlier`.
    pub fn delta(&self, earlier: &CounterSnapshot) -> CounterSnapshot {
        CounterSnapshot {
            out_count: self.out_count.saturating_sub(earlier.out_count),
            in_count: self.in_count.saturating_sub(earlier.in_count),
            flush_count: self.flush_count.saturating_sub(earlier.flush_count),
        }
    }

    /// Requests still waiting for a reply at the time of the snapshot.
    pub fn in_flight(&self) -> u64 {
        self.out_count.saturating_sub(self.in_count)
    }

    /// Average number of requests carried by one flush.
    pub fn requests_per_flush(&self) -> f64 {
        if self.flush_count == 0 {
            return 0.0;
        }
        self.out_count as f64 / self.flush_count as f64
    }
}
