//! Demo sidecar: watches its own heap and serves the control surface.
//!
//! With `--churn` the process allocates continuously so the limit is
//! crossed within a few seconds:
//!
//! ```text
//! heapwatch --churn --limit 5242880 --interval-ms 1000
//! curl localhost:8000/            # list snapshots
//! curl -O -J localhost:8000/latest
//! ```

use anyhow::Context;
use clap::Parser;
use heapwatch::{Watcher, WatcherConfig, condition};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[derive(Parser)]
#[command(name = "heapwatch", version, about)]
struct Args {
    /// Control-surface listen address.
    #[arg(long, default_value = "127.0.0.1:8000")]
    listen: String,

    /// Snapshot directory.
    #[arg(long, default_value = "./profiles")]
    directory: PathBuf,

    /// Milliseconds between condition checks.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Heap byte count that triggers a capture when exceeded.
    #[arg(long, default_value_t = 5 * 1024 * 1024)]
    limit: u64,

    /// Maximum snapshots kept on disk.
    #[arg(long, default_value_t = 3)]
    max_records: usize,

    /// Allocate junk continuously to drive the heap over the limit.
    #[arg(long)]
    churn: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = WatcherConfig::new(&args.directory)
        .interval(Duration::from_millis(args.interval_ms))
        .max_records(args.max_records)
        .check(condition::memory_limit(args.limit));
    let watcher = Arc::new(Watcher::new(config)?);

    let watcher_task = tokio::spawn({
        let watcher = watcher.clone();
        async move {
            if let Err(err) = watcher.run_until(shutdown_signal()).await {
                tracing::error!(error = %err, "watcher failed");
            }
        }
    });

    if args.churn {
        tokio::spawn(churn());
    }

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;
    tracing::info!(
        addr = %args.listen,
        directory = %args.directory.display(),
        limit = args.limit,
        "heapwatch listening"
    );

    let app = heapwatch::web::router(watcher).layer(TraceLayer::new_for_http());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    watcher_task.await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Grows a junk buffer by ~2.5 KiB every 10ms until the process exits.
async fn churn() {
    let mut junk: Vec<u8> = Vec::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(10));
    loop {
        ticker.tick().await;
        junk.resize(junk.len() + 2500, 0);
    }
}
