//! Throughput runs comparing direct, batched and request/response submission.

use crate::config::WorkloadConfig;
use redpipe_client::{ClientError, Connection, CounterSnapshot};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

/// Counter deltas and elapsed time of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub delta: CounterSnapshot,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn ops_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.delta.out_count as f64 / secs
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out: {}, in: {}, flush: {}, {}ms; {:.0} ops/s",
            self.delta.out_count,
            self.delta.in_count,
            self.delta.flush_count,
            self.elapsed.as_millis(),
            self.ops_per_sec()
        )
    }
}

fn measure(
    conn: &Connection,
    run: impl FnOnce() -> Result<(), ClientError>,
) -> Result<RunReport, ClientError> {
    let before = conn.counters();
    let start = Instant::now();
    run()?;
    Ok(RunReport {
        elapsed: start.elapsed(),
        delta: conn.counters().delta(&before),
    })
}

async fn measure_async<F>(conn: &Connection, run: F) -> Result<RunReport, ClientError>
where
    F: Future<Output = Result<(), ClientError>>,
{
    let before = conn.counters();
    let start = Instant::now();
    run.await?;
    Ok(RunReport {
        elapsed: start.elapsed(),
        delta: conn.counters().delta(&before),
    })
}

/// Runs the three workloads with blocking calls.
///
/// Must be called from outside the runtime the connection runs on.
pub fn run_blocking(
    conn: &Connection,
    workload: &WorkloadConfig,
) -> Result<Vec<RunReport>, ClientError> {
    let mut reports = Vec::with_capacity(3);

    println!(
        "Sending {} pings synchronously fire-and-forget (pipelined) ...",
        workload.pipelined_count
    );
    let report = measure(conn, || {
        // The last ping is awaited so every earlier reply has been drained.
        for _ in 1..workload.pipelined_count {
            conn.ping(true)?;
        }
        conn.ping(false).map(drop)
    })?;
    println!("{}", report);
    reports.push(report);

    let batch_count = workload.batch_count();
    println!(
        "Sending {} pings synchronously fire-and-forget ({} batches of {}) ...",
        batch_count * workload.batch_size + 1,
        batch_count,
        workload.batch_size
    );
    let report = measure(conn, || {
        for _ in 0..batch_count {
            let mut batch = conn.create_batch();
            for _ in 0..workload.batch_size {
                batch.enqueue_ping(true)?;
            }
            batch.execute()?;
        }
        conn.ping(false).map(drop)
    })?;
    println!("{}", report);
    reports.push(report);

    println!(
        "Sending {} pings synchronously req/resp/req/resp/...",
        workload.request_response_count
    );
    let report = measure(conn, || {
        for _ in 0..workload.request_response_count {
            conn.ping(false)?;
        }
        Ok(())
    })?;
    println!("{}", report);
    reports.push(report);

    Ok(reports)
}

/// Runs the three workloads with async calls.
pub async fn run_async(
    conn: &Connection,
    workload: &WorkloadConfig,
) -> Result<Vec<RunReport>, ClientError> {
    let mut reports = Vec::with_capacity(3);

    println!(
        "Sending {} pings asynchronously fire-and-forget (pipelined) ...",
        workload.pipelined_count
    );
    let report = measure_async(conn, async {
        for _ in 1..workload.pipelined_count {
            conn.ping_async(true).await?;
        }
        conn.ping_async(false).await.map(drop)
    })
    .await?;
    println!("{}", report);
    reports.push(report);

    let batch_count = workload.batch_count();
    println!(
        "Sending {} pings asynchronously fire-and-forget ({} batches of {}) ...",
        batch_count * workload.batch_size + 1,
        batch_count,
        workload.batch_size
    );
    let report = measure_async(conn, async {
        for _ in 0..batch_count {
            let mut batch = conn.create_batch();
            for _ in 0..workload.batch_size {
                batch.enqueue_ping(true)?;
            }
            batch.execute_async().await?;
        }
        conn.ping_async(false).await.map(drop)
    })
    .await?;
    println!("{}", report);
    reports.push(report);

    println!(
        "Sending {} pings asynchronously req/resp/req/resp/...",
        workload.request_response_count
    );
    let report = measure_async(conn, async {
        for _ in 0..workload.request_response_count {
            conn.ping_async(false).await?;
        }
        Ok(())
    })
    .await?;
    println!("{}", report);
    reports.push(report);

    Ok(reports)
}
