//! CacheQueue CLI Client
//!
//! Command-line interface for inspecting and administering a CacheQueue server.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use cachequeue::network::RemoteStorage;
use cachequeue::{tags, Client, FreshFor, FreshnessFilter, QueueOptions, WriteOptions};
use clap::{Parser, Subcommand, ValueEnum};

/// CacheQueue CLI
#[derive(Parser, Debug)]
#[command(name = "cachequeue-cli")]
#[command(about = "CLI for the CacheQueue cache and job queue")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7420")]
    server: String,

    /// Socket read/write timeout (milliseconds)
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get the data stored under a key
    Get {
        key: String,

        /// Treat stale data as missing
        #[arg(long)]
        fresh: bool,
    },

    /// Store data under a key
    Set {
        key: String,
        value: String,

        /// Seconds the data stays fresh (omit for forever)
        #[arg(short = 'f', long)]
        fresh_for: Option<u64>,

        /// Overwrite fresh data
        #[arg(long)]
        force: bool,

        /// Tags to attach
        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// Queue a task for a key
    Queue {
        key: String,
        task: String,
        params: String,

        #[arg(short = 'f', long, default_value = "60")]
        fresh_for: u64,

        #[arg(short, long, default_value = "50")]
        priority: u8,

        #[arg(short, long, default_value = "0")]
        delay: u64,

        #[arg(short, long, default_value = "1")]
        channel: u32,

        #[arg(long)]
        force: bool,

        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// Queue a one-off task
    QueueTemp {
        task: String,
        params: String,

        #[arg(short, long, default_value = "50")]
        priority: u8,

        #[arg(short, long, default_value = "0")]
        delay: u64,

        #[arg(short, long, default_value = "1")]
        channel: u32,
    },

    /// Count entries
    Count {
        #[arg(value_enum, default_value = "any")]
        filter: Filter,

        /// Only entries carrying one of these tags
        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// Count waiting jobs
    QueueCount {
        /// Channel (all channels when omitted)
        channel: Option<u32>,
    },

    /// Mark entries as stale
    Outdate {
        /// Key (use --all or --tag instead to outdate many)
        key: Option<String>,

        #[arg(long)]
        all: bool,

        #[arg(short, long)]
        tag: Vec<String>,

        #[arg(long)]
        force: bool,
    },

    /// Delete entries
    Remove {
        /// Key (use --all or --tag instead to remove many)
        key: Option<String>,

        #[arg(long)]
        all: bool,

        #[arg(short, long)]
        tag: Vec<String>,

        #[arg(long)]
        force: bool,
    },

    /// Reset waiting jobs
    ClearQueue {
        /// Channel (all channels when omitted)
        channel: Option<u32>,
    },

    /// Purge entries stale for at least the given seconds
    Cleanup {
        #[arg(default_value = "0")]
        outdated_for: u64,
    },

    /// Ping the server
    Ping,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Filter {
    Any,
    Fresh,
    Stale,
}

impl From<Filter> for FreshnessFilter {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Any => FreshnessFilter::Any,
            Filter::Fresh => FreshnessFilter::Fresh,
            Filter::Stale => FreshnessFilter::Stale,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let storage =
        RemoteStorage::new(&args.server).with_timeout(Duration::from_millis(args.timeout_ms));

    if let Commands::Ping = args.command {
        return match storage.ping() {
            Ok(()) => {
                println!("PONG");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let client = Client::new(Arc::new(storage));
    match run(&client, args.command) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(client: &Client, command: Commands) -> cachequeue::Result<String> {
    let output = match command {
        Commands::Get { key, fresh } => match client.get(&key, fresh)? {
            Some(data) => String::from_utf8_lossy(&data).into_owned(),
            None => "(nil)".to_string(),
        },
        Commands::Set {
            key,
            value,
            fresh_for,
            force,
            tag,
        } => {
            let fresh_for = fresh_for.map(FreshFor::Seconds).unwrap_or(FreshFor::Forever);
            let options = WriteOptions { force, tags: tags(tag) };
            written(client.set(&key, value, fresh_for, &options)?)
        }
        Commands::Queue {
            key,
            task,
            params,
            fresh_for,
            priority,
            delay,
            channel,
            force,
            tag,
        } => {
            let options = QueueOptions::default()
                .force(force)
                .tags(tags(tag))
                .priority(priority)
                .delay(delay)
                .channel(channel);
            queued(client.queue(&key, &task, params, fresh_for, &options)?)
        }
        Commands::QueueTemp {
            task,
            params,
            priority,
            delay,
            channel,
        } => {
            let options = QueueOptions::default()
                .priority(priority)
                .delay(delay)
                .channel(channel);
            queued(client.queue_temporary(&task, params, &options)?)
        }
        Commands::Count { filter, tag } => {
            let count = if tag.is_empty() {
                client.count_all(filter.into())?
            } else {
                client.count_by_tag(&tags(tag), filter.into())?
            };
            count.to_string()
        }
        Commands::QueueCount { channel } => client.queue_count(channel)?.to_string(),
        Commands::Outdate {
            key,
            all,
            tag,
            force,
        } => match (key, all) {
            (Some(key), _) => written(client.outdate(&key, force)?),
            (None, true) => client.outdate_all(force)?.to_string(),
            (None, false) => client.outdate_by_tag(&tags(tag), force)?.to_string(),
        },
        Commands::Remove {
            key,
            all,
            tag,
            force,
        } => match (key, all) {
            (Some(key), _) => written(client.remove(&key, force)?),
            (None, true) => client.remove_all(force)?.to_string(),
            (None, false) => client.remove_by_tag(&tags(tag), force)?.to_string(),
        },
        Commands::ClearQueue { channel } => client.clear_queue(channel)?.to_string(),
        Commands::Cleanup { outdated_for } => client.cleanup(outdated_for)?.to_string(),
        Commands::Ping => "PONG".to_string(),
    };
    Ok(output)
}

fn written(done: bool) -> String {
    if done { "OK" } else { "SKIPPED" }.to_string()
}

fn queued(key: Option<String>) -> String {
    key.unwrap_or_else(|| "SKIPPED".to_string())
}
