//! redpipe - pipelining throughput driver
//!
//! Connects to a RESP server and compares eager per-request flushing, batched
//! flushing and strict request/response, first with blocking calls and then
//! with async calls.

mod config;
mod runs;

use clap::Parser;
use colored::Colorize;
use config::Config;
use redpipe_client::Connection;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "redpipe")]
#[command(about = "Pipelining and batching throughput driver for RESP servers")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "REDPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Server address (host:port)
    #[arg(short, long)]
    server: Option<String>,

    /// Password sent with AUTH
    #[arg(long, env = "REDPIPE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Pings sent by the pipelined and batched runs
    #[arg(long)]
    pipelined: Option<u64>,

    /// Pings sent by the request/response run
    #[arg(long)]
    req_resp: Option<u64>,

    /// Pings per batch
    #[arg(long)]
    batch_size: Option<u64>,

    /// Skip the blocking runs
    #[arg(long)]
    skip_sync: bool,

    /// Skip the async runs
    #[arg(long)]
    skip_async: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(ref server) = self.server {
            config.connection.server = server.clone();
        }
        if let Some(ref password) = self.password {
            config.connection.password = Some(password.clone());
        }
        if let Some(n) = self.pipelined {
            config.workload.pipelined_count = n;
        }
        if let Some(n) = self.req_resp {
            config.workload.request_response_count = n;
        }
        if let Some(n) = self.batch_size {
            config.workload.batch_size = n;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    cli.apply(&mut config);
    config.validate()?;

    tracing::info!("Starting redpipe");
    tracing::info!("  Server: {}", config.connection.server);
    tracing::info!(
        "  Workload: pipelined={}, batch_size={}, req_resp={}",
        config.workload.pipelined_count,
        config.workload.batch_size,
        config.workload.request_response_count
    );

    // Blocking runs drive the connection from this thread, so the runtime
    // needs its own worker threads.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let conn = match runtime.block_on(Connection::open(
        config.connection.to_connection_config(),
    )) {
        Ok(conn) => {
            println!("{}", "redpipe connected successfully".green());
            conn
        }
        Err(e) => {
            eprintln!("{} {}; is the server running?", "Failed to connect:".red(), e);
            return Err(e.into());
        }
    };

    if !cli.skip_sync {
        runs::run_blocking(&conn, &config.workload)?;
    }
    if !cli.skip_async {
        runtime.block_on(runs::run_async(&conn, &config.workload))?;
    }

    let totals = conn.counters();
    tracing::info!(
        "Totals: out={}, in={}, flush={} ({:.1} requests/flush)",
        totals.out_count,
        totals.in_count,
        totals.flush_count,
        totals.requests_per_flush()
    );

    conn.close();
    Ok(())
}
