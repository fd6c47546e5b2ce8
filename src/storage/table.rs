//! Entry table
//!
//! Ordered in-memory map of entries plus the decision logic of every storage
//! operation. Write operations never mutate the table directly: they inspect it
//! and return the [`Operation`]s that must be committed, so a backend can log them
//! before [`EntryTable::apply`] makes them visible. Callers hold the backend's
//! write lock from inspection to apply, which is what makes each conditional write
//! and each job claim atomic.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::clock;
use crate::entry::{
    Entry, EntrySnapshot, FreshnessFilter, Job, QueueKey, QueueRequest, Tags, MAX_PRIORITY,
    NOT_QUEUED,
};
use crate::wal::Operation;

/// Result of a write decision: the caller-visible value and the mutations to commit
#[derive(Debug)]
pub struct Changes<T> {
    pub value: T,
    pub operations: Vec<Operation>,
}

impl<T> Changes<T> {
    /// Nothing to write
    pub fn none(value: T) -> Self {
        Self {
            value,
            operations: Vec::new(),
        }
    }

    pub fn with(value: T, operations: Vec<Operation>) -> Self {
        Self { value, operations }
    }

    fn put(value: T, entry: Entry) -> Self {
        Self::with(value, vec![Operation::Put { entry }])
    }

    fn delete(value: T, key: &str) -> Self {
        Self::with(
            value,
            vec![Operation::Delete {
                key: key.to_string(),
            }],
        )
    }
}

/// In-memory table of entries, ordered by key
#[derive(Debug, Default, Clone)]
pub struct EntryTable {
    entries: BTreeMap<String, Entry>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from previously stored entries
    pub fn from_entries(entries: impl IntoIterator<Item = Entry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.key.clone(), e)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw stored record, including vacant ones
    pub fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// All stored records in key order
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Make committed operations visible
    pub fn apply(&mut self, operations: Vec<Operation>) {
        for operation in operations {
            match operation {
                Operation::Put { entry } => {
                    self.entries.insert(entry.key.clone(), entry);
                }
                Operation::Delete { key } => {
                    self.entries.remove(&key);
                }
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, key: &str, only_fresh: bool, now: i64) -> Option<EntrySnapshot> {
        self.entries
            .get(key)
            .filter(|e| !e.is_vacant())
            .filter(|e| !only_fresh || e.is_fresh(now))
            .map(|e| e.snapshot(now))
    }

    pub fn get_by_tag(&self, tags: &Tags, only_fresh: bool, now: i64) -> Vec<EntrySnapshot> {
        self.entries
            .values()
            .filter(|e| !e.is_vacant() && e.has_any_tag(tags))
            .filter(|e| !only_fresh || e.is_fresh(now))
            .map(|e| e.snapshot(now))
            .collect()
    }

    /// Count entries matching `filter`, optionally restricted to `tags`
    pub fn count(&self, filter: FreshnessFilter, tags: Option<&Tags>, now: i64) -> u64 {
        self.entries
            .values()
            .filter(|e| tags.map_or(true, |t| e.has_any_tag(t)))
            .filter(|e| filter.matches(e, now))
            .count() as u64
    }

    /// Entries waiting in `channel`, or in any channel for `None`
    pub fn queue_count(&self, channel: Option<u32>) -> u64 {
        self.entries
            .values()
            .filter(|e| in_channel(e, channel))
            .count() as u64
    }

    // =========================================================================
    // Cache writes
    // =========================================================================

    /// Upsert data unless the stored entry is still fresh (and not forced)
    pub fn set(
        &self,
        key: &str,
        data: Bytes,
        fresh_for: u64,
        force: bool,
        tags: &Tags,
        now: i64,
    ) -> Changes<bool> {
        let existing = self.entries.get(key);
        if !force && existing.is_some_and(|e| e.is_fresh(now)) {
            return Changes::none(false);
        }

        let mut entry = existing.cloned().unwrap_or_else(|| Entry::new(key));
        entry.data = Some(data);
        entry.fresh_until = clock::after(now, fresh_for);
        entry.tags = tags.clone();
        entry.date_set = now;
        Changes::put(true, entry)
    }

    /// Extend freshness of an existing entry without touching its data
    pub fn refresh(&self, key: &str, fresh_for: u64, force: bool, now: i64) -> Changes<bool> {
        let Some(existing) = self.entries.get(key) else {
            return Changes::none(false);
        };
        if !force && existing.is_fresh(now) {
            return Changes::none(false);
        }

        let mut entry = existing.clone();
        entry.fresh_until = clock::after(now, fresh_for);
        entry.date_set = now;
        Changes::put(true, entry)
    }

    // =========================================================================
    // Queue writes
    // =========================================================================

    /// Schedule work for an entry
    ///
    /// Without `force` the write is skipped when the data or an earlier queue
    /// window already covers the new start time. Returns the key written.
    pub fn queue(&self, request: &QueueRequest, now: i64) -> Changes<Option<String>> {
        let (key, force, fresh_for, temp) = match &request.key {
            QueueKey::Temporary => (temporary_key(), true, 0, true),
            QueueKey::Key(key) => (key.clone(), request.force, request.fresh_for, false),
        };

        let queue_start = clock::after(now, request.delay);
        let existing = self.entries.get(&key);
        if !force
            && existing.is_some_and(|e| e.fresh_until > queue_start || e.queue_fresh_until > queue_start)
        {
            return Changes::none(None);
        }

        let mut entry = existing.cloned().unwrap_or_else(|| Entry::new(key.clone()));
        entry.task = Some(request.task.clone());
        entry.params = Some(request.params.clone());
        entry.queue_tags = request.tags.clone();
        entry.queue_priority = request.priority.min(MAX_PRIORITY);
        entry.queue_start = queue_start;
        entry.queue_fresh_until = clock::after(queue_start, fresh_for);
        entry.queued = request.channel;
        entry.queued_worker = None;
        entry.is_temp = temp;
        Changes::put(Some(key), entry)
    }

    /// Claim the best eligible entry of `channel` for `worker_id`
    ///
    /// Eligible: waiting in `channel` with `queue_start <= now`. Best: lowest
    /// priority number, then earliest start, then key.
    pub fn claim_job(&self, worker_id: &str, channel: u32, now: i64) -> Changes<Option<Job>> {
        let candidate = self
            .entries
            .values()
            .filter(|e| e.queued == channel && e.queue_start <= now)
            .min_by(|a, b| {
                (a.queue_priority, a.queue_start, &a.key).cmp(&(b.queue_priority, b.queue_start, &b.key))
            });
        let Some(candidate) = candidate else {
            return Changes::none(None);
        };

        let job = Job {
            key: Some(candidate.key.clone()),
            fresh_until: candidate.queue_fresh_until,
            fresh_for: clock::seconds_between(candidate.queue_start, candidate.queue_fresh_until),
            tags: candidate.queue_tags.clone(),
            task: candidate.task.clone().unwrap_or_default(),
            params: candidate.params.clone().unwrap_or_default(),
            data: candidate.data.clone(),
            channel,
            priority: candidate.queue_priority,
            temp: candidate.is_temp,
            worker_id: worker_id.to_string(),
        };

        let mut entry = candidate.clone();
        entry.queued = NOT_QUEUED;
        entry.queued_worker = Some(worker_id.to_string());
        Changes::put(Some(job), entry)
    }

    /// Release (0) or re-arm (> 0 seconds) the claim held by `worker_id`
    pub fn update_job_status(
        &self,
        key: &str,
        worker_id: &str,
        new_queue_fresh_for: u64,
        now: i64,
    ) -> Changes<bool> {
        let Some(existing) = self.entries.get(key) else {
            return Changes::none(false);
        };
        if existing.queued_worker.as_deref() != Some(worker_id) {
            return Changes::none(false);
        }

        let mut entry = existing.clone();
        entry.queue_fresh_until = if new_queue_fresh_for > 0 {
            clock::after(now, new_queue_fresh_for)
        } else {
            0
        };
        entry.queued_worker = None;
        Changes::put(true, entry)
    }

    /// Reset the queue state of waiting entries; cache data is left alone
    pub fn clear_queue(&self, channel: Option<u32>, now: i64) -> Changes<u64> {
        self.update_many(|e| in_channel(e, channel), |e| {
            e.queue_fresh_until = now.saturating_sub(1);
            e.queued = NOT_QUEUED;
        })
    }

    // =========================================================================
    // Removal
    // =========================================================================

    pub fn remove(&self, key: &str, force: bool, now: i64) -> Changes<bool> {
        match self.entries.get(key) {
            Some(e) if force || !e.is_fresh(now) => Changes::delete(true, key),
            _ => Changes::none(false),
        }
    }

    /// Delete `key` only while it still holds exactly `data`
    pub fn remove_if_data(&self, key: &str, data: &Bytes) -> Changes<bool> {
        match self.entries.get(key) {
            Some(e) if e.data.as_ref() == Some(data) => Changes::delete(true, key),
            _ => Changes::none(false),
        }
    }

    pub fn remove_all(&self, force: bool, now: i64) -> Changes<u64> {
        self.delete_many(|e| force || !e.is_fresh(now))
    }

    pub fn remove_by_tag(&self, tags: &Tags, force: bool, now: i64) -> Changes<u64> {
        self.delete_many(|e| e.has_any_tag(tags) && (force || !e.is_fresh(now)))
    }

    /// Purge stale entries that no queue or claim still refers to
    pub fn cleanup(&self, outdated_for: u64, now: i64) -> Changes<u64> {
        let threshold = clock::before(now, outdated_for);
        self.delete_many(|e| {
            e.fresh_until < threshold && !e.is_queued() && !e.has_outstanding_claim(now)
        })
    }

    // =========================================================================
    // Outdating
    // =========================================================================

    pub fn outdate(&self, key: &str, force: bool, now: i64) -> Changes<bool> {
        match self.entries.get(key) {
            Some(e) if force || e.is_fresh(now) => {
                let mut entry = e.clone();
                mark_outdated(&mut entry, now);
                Changes::put(true, entry)
            }
            _ => Changes::none(false),
        }
    }

    pub fn outdate_all(&self, force: bool, now: i64) -> Changes<u64> {
        self.update_many(|e| force || e.is_fresh(now), |e| mark_outdated(e, now))
    }

    pub fn outdate_by_tag(&self, tags: &Tags, force: bool, now: i64) -> Changes<u64> {
        self.update_many(
            |e| e.has_any_tag(tags) && (force || e.is_fresh(now)),
            |e| mark_outdated(e, now),
        )
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn delete_many(&self, matches: impl Fn(&Entry) -> bool) -> Changes<u64> {
        let operations: Vec<Operation> = self
            .entries
            .values()
            .filter(|e| matches(e))
            .map(|e| Operation::Delete { key: e.key.clone() })
            .collect();
        Changes::with(operations.len() as u64, operations)
    }

    fn update_many(
        &self,
        matches: impl Fn(&Entry) -> bool,
        update: impl Fn(&mut Entry),
    ) -> Changes<u64> {
        let operations: Vec<Operation> = self
            .entries
            .values()
            .filter(|e| matches(e))
            .map(|e| {
                let mut entry = e.clone();
                update(&mut entry);
                Operation::Put { entry }
            })
            .collect();
        Changes::with(operations.len() as u64, operations)
    }
}

fn in_channel(entry: &Entry, channel: Option<u32>) -> bool {
    match channel {
        Some(channel) => entry.queued == channel,
        None => entry.is_queued(),
    }
}

fn mark_outdated(entry: &mut Entry, now: i64) {
    entry.fresh_until = now.saturating_sub(1);
    entry.queue_fresh_until = now.saturating_sub(1);
    entry.queued = NOT_QUEUED;
}

fn temporary_key() -> String {
    format!("temp_{}", uuid::Uuid::new_v4().simple())
}
