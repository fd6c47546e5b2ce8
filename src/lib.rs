//! # CacheQueue
//!
//! A read-through cache combined with a priority job queue:
//! - One entry model for cached data and queued work, with conditional writes
//! - Atomic, lease-based job claiming across concurrent workers
//! - Stampede-safe recomputation through locks stored as entries
//! - Pluggable storage: in-memory, WAL-backed durable, remote over TCP
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │            Client            │─────▶│            Worker            │
//! │ get_or_set / queue / run ... │      │ claim → task → outcome       │
//! └──────┬───────────────┬───────┘      └──────────────┬───────────────┘
//!        │               │                             │
//!        │        ┌──────▼──────┐                      │
//!        │        │ LockManager │                      │
//!        │        └──────┬──────┘                      │
//!        ▼               ▼                             ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           Storage (trait)                           │
//! ├────────────────┬──────────────────────┬─────────────────────────────┤
//! │ MemoryStorage  │ DurableStorage       │ RemoteStorage ──TCP──▶ Server│
//! │ (RwLock table) │ (table + WAL + snap) │                             │
//! └────────────────┴──────────────────────┴─────────────────────────────┘
//! ```
//!
//! Clients and workers never share in-process state; all coordination goes
//! through the store.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod config;
pub mod entry;
pub mod error;

pub mod client;
pub mod lock;
pub mod network;
pub mod protocol;
pub mod storage;
pub mod wal;
pub mod worker;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use client::{CacheOptions, Client, FreshFor, LockOptions, QueueOptions, WriteOptions};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, FOREVER_SECS};
pub use entry::{tags, Entry, EntrySnapshot, FreshnessFilter, Job, QueueKey, QueueRequest, Tags};
pub use error::{CacheQueueError, Result};
pub use lock::{LockManager, ReleaseToken};
pub use storage::{DurableStorage, MemoryStorage, NullStorage, Storage};
pub use worker::{JobOutcome, Task, TaskConfig, TaskOutcome, TaskRegistry, Worker, WorkerContext};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of CacheQueue
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
