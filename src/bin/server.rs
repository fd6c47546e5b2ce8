//! CacheQueue Server Binary
//!
//! Opens a durable store and serves it over TCP.

use std::sync::Arc;

use cachequeue::config::WalSyncStrategy;
use cachequeue::network::Server;
use cachequeue::{Config, DurableStorage};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// CacheQueue Server
#[derive(Parser, Debug)]
#[command(name = "cachequeue-server")]
#[command(about = "Cache and job queue store server")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./cachequeue_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7420")]
    listen: String,

    /// Maximum connections waiting for a connection thread
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Number of connection threads
    #[arg(short = 't', long, default_value = "16")]
    threads: usize,

    /// Drop clients idle for this long (milliseconds, 0 = never)
    #[arg(long, default_value = "5000")]
    idle_timeout_ms: u64,

    /// WAL records between checkpoints
    #[arg(short, long, default_value = "10000")]
    checkpoint: u64,

    /// fsync the WAL after every write
    #[arg(long)]
    sync_every_write: bool,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cachequeue=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("CacheQueue Server v{}", cachequeue::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);
    tracing::info!("Listen address: {}", args.listen);

    let sync = if args.sync_every_write {
        WalSyncStrategy::EveryWrite
    } else {
        WalSyncStrategy::EveryNEntries { count: 100 }
    };

    // Build config from args
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .connection_threads(args.threads)
        .read_timeout_ms(args.idle_timeout_ms)
        .checkpoint_threshold(args.checkpoint)
        .wal_sync_strategy(sync)
        .build();

    let storage = match DurableStorage::open(&config) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            tracing::error!("Failed to open storage: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(entries = storage.len(), "Storage opened");

    let server = match Server::bind(config, storage) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", args.listen, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
