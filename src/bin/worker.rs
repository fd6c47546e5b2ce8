//! CacheQueue Worker Binary
//!
//! Polls one channel of a server for jobs and runs them with the built-in tasks.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cachequeue::network::RemoteStorage;
use cachequeue::worker::{register_builtin, LogMask};
use cachequeue::{Config, JobOutcome, TaskRegistry, Worker};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// CacheQueue Worker
#[derive(Parser, Debug)]
#[command(name = "cachequeue-worker")]
#[command(about = "Runs queued jobs from a CacheQueue server")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7420")]
    server: String,

    /// Channel to take jobs from
    #[arg(short, long, default_value = "1")]
    channel: u32,

    /// Sleep between polls of an empty queue (milliseconds)
    #[arg(short, long, default_value = "1000")]
    idle_ms: u64,

    /// Socket read/write timeout (milliseconds)
    #[arg(long, default_value = "30000")]
    timeout_ms: u64,

    /// Worker id (random when omitted)
    #[arg(long)]
    id: Option<String>,

    /// Task log levels: 1 = error, 2 = notice, 4 = debug (add to combine)
    #[arg(long, default_value = "7")]
    log_mask: u8,

    /// Exit once the queue is empty
    #[arg(long)]
    once: bool,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cachequeue=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let mut registry = TaskRegistry::new();
    register_builtin(&mut registry);

    let config = Config::builder()
        .log_mask(LogMask::from_bits(args.log_mask))
        .build();

    let storage = Arc::new(
        RemoteStorage::new(&args.server).with_timeout(Duration::from_millis(args.timeout_ms)),
    );
    let mut worker = Worker::new(storage, registry).with_config(&config);
    if let Some(id) = args.id {
        worker = worker.with_id(id);
    }

    tracing::info!(
        "CacheQueue Worker v{} ({}) polling channel {} on {}",
        cachequeue::VERSION,
        worker.id(),
        args.channel,
        args.server
    );

    let idle = Duration::from_millis(args.idle_ms);
    let mut worked = 0u64;

    loop {
        match worker.work_next(args.channel) {
            Ok(Some(outcome)) => {
                worked += 1;
                match outcome {
                    JobOutcome::Buried { seconds } => tracing::info!(seconds, "Job buried"),
                    JobOutcome::Requeued { delay, .. } => tracing::info!(delay, "Job requeued"),
                    _ => tracing::debug!("Job done"),
                }
            }
            Ok(None) => {
                if args.once {
                    break;
                }
                thread::sleep(idle);
            }
            Err(e) if e.is_configuration() => {
                // The job's claim is already cleared; keep serving other jobs
                tracing::error!("Job failed: {}", e);
            }
            Err(e) if e.is_transient() => {
                tracing::warn!("Server unavailable: {}", e);
                if args.once {
                    std::process::exit(1);
                }
                thread::sleep(idle);
            }
            Err(e) => tracing::warn!("Job failed: {}", e),
        }
    }

    tracing::info!(worked, "Queue drained");
}
