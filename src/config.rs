//! Configuration for CacheQueue
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::worker::LogMask;

/// Freshness used for "forever": ten years in seconds
pub const FOREVER_SECS: u64 = 315_360_000;

/// Main configuration for a CacheQueue instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for the durable backend
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal.log          (write-ahead log)
    ///     └── snapshot.bin     (latest checkpoint)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// Number of WAL records after which a snapshot is written and the WAL truncated
    pub checkpoint_threshold: u64,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max connections waiting for or being served by a connection thread
    pub max_connections: usize,

    /// Number of threads serving connections
    pub connection_threads: usize,

    /// Connection read timeout (milliseconds, 0 = none)
    ///
    /// Also the idle limit: a client silent for this long is disconnected so
    /// its connection thread can serve a waiting client.
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Cache / Queue Configuration
    // -------------------------------------------------------------------------
    /// Sleep between two lock acquisition attempts (milliseconds)
    pub lock_poll_interval_ms: u64,

    /// Channel used when none is given
    pub default_channel: u32,

    /// Priority used when none is given (0 = highest, 100 = lowest)
    pub default_priority: u8,

    /// Which task log messages are forwarded to tracing
    pub log_mask: LogMask,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./cachequeue_data"),
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            checkpoint_threshold: 10_000,
            listen_addr: "127.0.0.1:7420".to_string(),
            max_connections: 1024,
            connection_threads: 16,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
            lock_poll_interval_ms: 50,
            default_channel: 1,
            default_priority: 50,
            log_mask: LogMask::ALL,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Lock polling interval as a Duration
    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set how many WAL records trigger a checkpoint
    pub fn checkpoint_threshold(mut self, records: u64) -> Self {
        self.config.checkpoint_threshold = records;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the number of connection threads
    pub fn connection_threads(mut self, count: usize) -> Self {
        self.config.connection_threads = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the lock polling interval (in milliseconds)
    pub fn lock_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.lock_poll_interval_ms = ms;
        self
    }

    /// Set the default queue channel
    pub fn default_channel(mut self, channel: u32) -> Self {
        self.config.default_channel = channel;
        self
    }

    /// Set the default queue priority
    pub fn default_priority(mut self, priority: u8) -> Self {
        self.config.default_priority = priority;
        self
    }

    /// Set the task log mask
    pub fn log_mask(mut self, mask: LogMask) -> Self {
        self.config.log_mask = mask;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
