//! Storage Module
//!
//! The [`Storage`] trait is the persistence contract every backend fulfils:
//! conditional reads and writes of entries, tag queries, atomic job claiming,
//! counts and bulk invalidation. Locks are built on top of it (see [`crate::lock`]).
//!
//! ## Backends
//! - [`MemoryStorage`]: in-process table, conditional writes under one write lock
//! - [`DurableStorage`]: same table, every commit logged to a WAL and checkpointed
//!   into snapshot files
//! - [`RemoteStorage`](crate::network::RemoteStorage): forwards every call to a
//!   server, so several processes share one store
//! - [`NullStorage`]: stores nothing
//!
//! ## Freshness
//! An entry is fresh while `fresh_until > now`, with `now` taken from the
//! backend's own clock ([`Storage::now`]).

mod durable;
mod local;
mod null;
mod snapshot;
mod table;

use std::time::Duration;

use bytes::Bytes;

use crate::entry::{EntrySnapshot, FreshnessFilter, Job, QueueRequest, Tags};
use crate::error::{CacheQueueError, Result};
use crate::lock::{LockManager, ReleaseToken};

pub use durable::{DurableStorage, WalLog};
pub use local::{ChangeLog, MemoryStorage, NoLog, TableStorage};
pub use null::NullStorage;
pub use snapshot::Snapshot;
pub use table::{Changes, EntryTable};

/// Persistence contract shared by all backends
///
/// Every write that takes `force` is conditional on freshness when `force` is
/// false, and the check and the write happen atomically inside the backend.
pub trait Storage: Send + Sync {
    /// Current time of the backend, in unix seconds
    fn now(&self) -> Result<i64>;

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Entry under `key`; with `only_fresh`, stale entries count as missing
    fn get(&self, key: &str, only_fresh: bool) -> Result<Option<EntrySnapshot>>;

    /// Entries carrying any of `tags`
    fn get_by_tag(&self, tags: &Tags, only_fresh: bool) -> Result<Vec<EntrySnapshot>>;

    // -------------------------------------------------------------------------
    // Cache writes
    // -------------------------------------------------------------------------

    /// Upsert data; returns false when skipped because the entry is still fresh
    fn set(&self, key: &str, data: Bytes, fresh_for: u64, force: bool, tags: &Tags) -> Result<bool>;

    /// Move `fresh_until` of an existing entry, data untouched
    fn refresh(&self, key: &str, fresh_for: u64, force: bool) -> Result<bool>;

    // -------------------------------------------------------------------------
    // Queue
    // -------------------------------------------------------------------------

    /// Schedule work; returns the key written, `None` when skipped
    fn queue(&self, request: &QueueRequest) -> Result<Option<String>>;

    /// Atomically claim one eligible job of `channel` for `worker_id`
    fn get_job(&self, worker_id: &str, channel: u32) -> Result<Option<Job>>;

    /// Clear (0) or re-arm (> 0 seconds) the claim held by `worker_id`
    fn update_job_status(&self, key: &str, worker_id: &str, new_queue_fresh_for: u64) -> Result<bool>;

    /// Entries waiting in `channel`, or in all channels for `None`
    fn queue_count(&self, channel: Option<u32>) -> Result<u64>;

    /// Reset queue state of waiting entries in `channel` (all for `None`)
    fn clear_queue(&self, channel: Option<u32>) -> Result<u64>;

    // -------------------------------------------------------------------------
    // Counts
    // -------------------------------------------------------------------------

    fn count_all(&self, filter: FreshnessFilter) -> Result<u64>;

    fn count_by_tag(&self, tags: &Tags, filter: FreshnessFilter) -> Result<u64>;

    // -------------------------------------------------------------------------
    // Removal and invalidation
    // -------------------------------------------------------------------------

    /// Delete `key` unless fresh (any state with `force`)
    fn remove(&self, key: &str, force: bool) -> Result<bool>;

    /// Delete `key` only while its data equals `data`
    fn remove_if_data(&self, key: &str, data: &Bytes) -> Result<bool>;

    fn remove_all(&self, force: bool) -> Result<u64>;

    fn remove_by_tag(&self, tags: &Tags, force: bool) -> Result<u64>;

    /// Push freshness and queue window into the past and dequeue; only fresh
    /// entries unless `force`
    fn outdate(&self, key: &str, force: bool) -> Result<bool>;

    fn outdate_all(&self, force: bool) -> Result<u64>;

    fn outdate_by_tag(&self, tags: &Tags, force: bool) -> Result<u64>;

    /// Purge entries stale for at least `outdated_for` seconds that are not queued
    fn cleanup(&self, outdated_for: u64) -> Result<u64>;

    // -------------------------------------------------------------------------
    // Locks
    // -------------------------------------------------------------------------

    /// Try to take the exclusion lock for `key`; `None` when the timeout ran out
    ///
    /// `timeout` defaults to `lock_for` seconds.
    fn obtain_lock(&self, key: &str, lock_for: u64, timeout: Option<Duration>) -> Result<Option<String>> {
        LockManager::new(self).obtain(key, lock_for, timeout)
    }

    /// Release the lock for `key`; returns whether a lock entry was deleted
    fn release_lock(&self, key: &str, token: &ReleaseToken) -> Result<bool> {
        LockManager::new(self).release(key, token)
    }
}

/// Channel 0 means "not queued" and cannot be used as a queue partition
pub(crate) fn check_channel(channel: u32) -> Result<()> {
    if channel == crate::entry::NOT_QUEUED {
        return Err(CacheQueueError::Config(
            "channel 0 is reserved for unqueued entries".to_string(),
        ));
    }
    Ok(())
}
