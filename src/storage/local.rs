//! In-process table storage
//!
//! [`TableStorage`] runs every operation against an [`EntryTable`] behind a
//! `parking_lot::RwLock`. Reads share the read lock; writes take the write lock,
//! decide, hand the resulting operations to a [`ChangeLog`] and only then apply
//! them. The log decides durability: [`NoLog`] gives [`MemoryStorage`], the WAL
//! gives [`DurableStorage`](super::DurableStorage).

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::entry::{EntrySnapshot, FreshnessFilter, Job, QueueRequest, Tags};
use crate::error::Result;
use crate::wal::Operation;

use super::table::{Changes, EntryTable};
use super::{check_channel, Storage};

/// Receives every committed batch of operations
pub trait ChangeLog: Send + Sync {
    /// Called with the table write lock held, before `operations` are applied.
    /// An error aborts the write.
    fn record(&self, operations: &[Operation]) -> Result<()>;

    /// Called with the table write lock held, after a batch was applied
    fn applied(&self, _table: &EntryTable) {}
}

/// Change log that keeps nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLog;

impl ChangeLog for NoLog {
    fn record(&self, _operations: &[Operation]) -> Result<()> {
        Ok(())
    }
}

/// Entry table plus a change log and a clock
pub struct TableStorage<L: ChangeLog> {
    pub(super) table: RwLock<EntryTable>,
    pub(super) log: L,
    pub(super) clock: Arc<dyn Clock>,
}

/// Volatile storage living in this process only
pub type MemoryStorage = TableStorage<NoLog>;

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Memory storage reading time from `clock`
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        TableStorage::from_parts(EntryTable::new(), NoLog, Arc::new(clock))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ChangeLog> TableStorage<L> {
    pub(super) fn from_parts(table: EntryTable, log: L, clock: Arc<dyn Clock>) -> Self {
        Self {
            table: RwLock::new(table),
            log,
            clock,
        }
    }

    /// Number of stored records, vacant ones included
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    fn read<T>(&self, f: impl FnOnce(&EntryTable, i64) -> T) -> T {
        let table = self.table.read();
        f(&table, self.clock.now())
    }

    /// Decide, log and apply one write under the write lock
    fn commit<T>(&self, decide: impl FnOnce(&EntryTable, i64) -> Changes<T>) -> Result<T> {
        let mut table = self.table.write();
        let now = self.clock.now();
        let Changes { value, operations } = decide(&table, now);

        if !operations.is_empty() {
            self.log.record(&operations)?;
            table.apply(operations);
            self.log.applied(&table);
        }

        Ok(value)
    }
}

impl<L: ChangeLog> Storage for TableStorage<L> {
    fn now(&self) -> Result<i64> {
        Ok(self.clock.now())
    }

    fn get(&self, key: &str, only_fresh: bool) -> Result<Option<EntrySnapshot>> {
        Ok(self.read(|t, now| t.get(key, only_fresh, now)))
    }

    fn get_by_tag(&self, tags: &Tags, only_fresh: bool) -> Result<Vec<EntrySnapshot>> {
        Ok(self.read(|t, now| t.get_by_tag(tags, only_fresh, now)))
    }

    fn set(&self, key: &str, data: Bytes, fresh_for: u64, force: bool, tags: &Tags) -> Result<bool> {
        let written = self.commit(|t, now| t.set(key, data, fresh_for, force, tags, now))?;
        tracing::trace!(key, fresh_for, force, written, "set");
        Ok(written)
    }

    fn refresh(&self, key: &str, fresh_for: u64, force: bool) -> Result<bool> {
        self.commit(|t, now| t.refresh(key, fresh_for, force, now))
    }

    fn queue(&self, request: &QueueRequest) -> Result<Option<String>> {
        check_channel(request.channel)?;
        let key = self.commit(|t, now| t.queue(request, now))?;
        tracing::trace!(?key, task = %request.task, channel = request.channel, "queue");
        Ok(key)
    }

    fn get_job(&self, worker_id: &str, channel: u32) -> Result<Option<Job>> {
        check_channel(channel)?;
        let job = self.commit(|t, now| t.claim_job(worker_id, channel, now))?;
        if let Some(job) = &job {
            tracing::debug!(key = ?job.key, task = %job.task, worker_id, channel, "claimed job");
        }
        Ok(job)
    }

    fn update_job_status(&self, key: &str, worker_id: &str, new_queue_fresh_for: u64) -> Result<bool> {
        self.commit(|t, now| t.update_job_status(key, worker_id, new_queue_fresh_for, now))
    }

    fn queue_count(&self, channel: Option<u32>) -> Result<u64> {
        Ok(self.read(|t, _| t.queue_count(channel)))
    }

    fn clear_queue(&self, channel: Option<u32>) -> Result<u64> {
        self.commit(|t, now| t.clear_queue(channel, now))
    }

    fn count_all(&self, filter: FreshnessFilter) -> Result<u64> {
        Ok(self.read(|t, now| t.count(filter, None, now)))
    }

    fn count_by_tag(&self, tags: &Tags, filter: FreshnessFilter) -> Result<u64> {
        Ok(self.read(|t, now| t.count(filter, Some(tags), now)))
    }

    fn remove(&self, key: &str, force: bool) -> Result<bool> {
        self.commit(|t, now| t.remove(key, force, now))
    }

    fn remove_if_data(&self, key: &str, data: &Bytes) -> Result<bool> {
        self.commit(|t, _| t.remove_if_data(key, data))
    }

    fn remove_all(&self, force: bool) -> Result<u64> {
        self.commit(|t, now| t.remove_all(force, now))
    }

    fn remove_by_tag(&self, tags: &Tags, force: bool) -> Result<u64> {
        self.commit(|t, now| t.remove_by_tag(tags, force, now))
    }

    fn outdate(&self, key: &str, force: bool) -> Result<bool> {
        self.commit(|t, now| t.outdate(key, force, now))
    }

    fn outdate_all(&self, force: bool) -> Result<u64> {
        self.commit(|t, now| t.outdate_all(force, now))
    }

    fn outdate_by_tag(&self, tags: &Tags, force: bool) -> Result<u64> {
        self.commit(|t, now| t.outdate_by_tag(tags, force, now))
    }

    fn cleanup(&self, outdated_for: u64) -> Result<u64> {
        let purged = self.commit(|t, now| t.cleanup(outdated_for, now))?;
        if purged > 0 {
            tracing::debug!(purged, outdated_for, "cleanup");
        }
        Ok(purged)
    }
}
