//! Client
//!
//! The public read/compute/queue API. A [`Client`] composes a [`Storage`], the
//! [`LockManager`] and optionally a [`Worker`]:
//!
//! - [`Client::get_or_set`]: read, or compute inline under the key's lock
//! - [`Client::get_or_queue`]: read, or schedule a job; never computes inline
//! - [`Client::get_or_run`]: read, or run the task through the worker's full
//!   job lifecycle under the key's lock
//!
//! Reads that find nothing and locks that stay taken yield `None`, not errors.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::clock;
use crate::config::{Config, FOREVER_SECS};
use crate::entry::{
    EntrySnapshot, FreshnessFilter, Job, QueueKey, QueueRequest, Tags, DEFAULT_PRIORITY,
};
use crate::error::{CacheQueueError, Result};
use crate::lock::{LockManager, ReleaseToken, DEFAULT_POLL_INTERVAL};
use crate::storage::Storage;
use crate::worker::{TaskOutcome, Worker};

// =============================================================================
// Options
// =============================================================================

/// How long data stays fresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshFor {
    Seconds(u64),
    /// Ten years
    Forever,
}

impl FreshFor {
    pub fn as_secs(self) -> u64 {
        match self {
            FreshFor::Seconds(seconds) => seconds,
            FreshFor::Forever => FOREVER_SECS,
        }
    }
}

impl From<u64> for FreshFor {
    fn from(seconds: u64) -> Self {
        FreshFor::Seconds(seconds)
    }
}

impl From<Duration> for FreshFor {
    fn from(duration: Duration) -> Self {
        FreshFor::Seconds(duration.as_secs())
    }
}

/// Options of a cache write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub force: bool,
    pub tags: Tags,
}

impl WriteOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }
}

/// Stampede protection for a compute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Seconds the lock is held at most
    pub lock_for: u64,
    /// How long to wait for the lock (default: `lock_for`)
    pub timeout: Option<Duration>,
}

impl LockOptions {
    pub fn new(lock_for: u64) -> Self {
        Self {
            lock_for,
            timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options of [`Client::get_or_set`] and [`Client::get_or_run`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    pub force: bool,
    pub tags: Tags,
    /// `None` computes without taking the key's lock
    pub lock: Option<LockOptions>,
}

impl CacheOptions {
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn lock(mut self, lock: LockOptions) -> Self {
        self.lock = Some(lock);
        self
    }
}

/// Options of queue writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    pub force: bool,
    pub tags: Tags,
    pub priority: u8,
    /// Seconds until the job becomes eligible
    pub delay: u64,
    pub channel: u32,
    /// Keep fresh data warm by queueing a refresh that starts when it expires
    pub ensure_fresh_queue: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            force: false,
            tags: Tags::new(),
            priority: DEFAULT_PRIORITY,
            delay: 0,
            channel: 1,
            ensure_fresh_queue: false,
        }
    }
}

impl QueueOptions {
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn delay(mut self, seconds: u64) -> Self {
        self.delay = seconds;
        self
    }

    pub fn channel(mut self, channel: u32) -> Self {
        self.channel = channel;
        self
    }

    pub fn ensure_fresh_queue(mut self, ensure: bool) -> Self {
        self.ensure_fresh_queue = ensure;
        self
    }

    fn request(&self, key: QueueKey, task: &str, params: Bytes, fresh_for: u64) -> QueueRequest {
        QueueRequest::new(key, task, params)
            .fresh_for(fresh_for)
            .force(self.force)
            .tags(self.tags.clone())
            .priority(self.priority)
            .delay(self.delay)
            .channel(self.channel)
    }
}

// =============================================================================
// Client
// =============================================================================

/// Cache and queue front end
pub struct Client {
    storage: Arc<dyn Storage>,
    worker: Option<Arc<Worker>>,
    lock_poll_interval: Duration,
    queue_defaults: QueueOptions,
}

impl Client {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            worker: None,
            lock_poll_interval: DEFAULT_POLL_INTERVAL,
            queue_defaults: QueueOptions::default(),
        }
    }

    /// Client using the lock and queue defaults of `config`
    pub fn with_config(storage: Arc<dyn Storage>, config: &Config) -> Self {
        let mut client = Self::new(storage);
        client.lock_poll_interval = config.lock_poll_interval();
        client.queue_defaults = QueueOptions::default()
            .priority(config.default_priority)
            .channel(config.default_channel);
        client
    }

    /// Attach the worker used by `run` and `get_or_run`
    pub fn with_worker(mut self, worker: impl Into<Arc<Worker>>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn worker(&self) -> Result<&Worker> {
        self.worker.as_deref().ok_or(CacheQueueError::NoWorker)
    }

    /// Queue options carrying the configured default priority and channel
    pub fn queue_options(&self) -> QueueOptions {
        self.queue_defaults.clone()
    }

    fn locks(&self) -> LockManager<'_, dyn Storage> {
        LockManager::new(self.storage.as_ref()).poll_interval(self.lock_poll_interval)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Data stored under `key`
    pub fn get(&self, key: &str, only_fresh: bool) -> Result<Option<Bytes>> {
        Ok(self.storage.get(key, only_fresh)?.and_then(|e| e.data))
    }

    /// Data of every entry carrying any of `tags`, by key
    pub fn get_by_tag(&self, tags: &Tags, only_fresh: bool) -> Result<BTreeMap<String, Bytes>> {
        Ok(self
            .storage
            .get_by_tag(tags, only_fresh)?
            .into_iter()
            .filter_map(|e| e.data.map(|data| (e.key, data)))
            .collect())
    }

    pub fn get_entry(&self, key: &str, only_fresh: bool) -> Result<Option<EntrySnapshot>> {
        self.storage.get(key, only_fresh)
    }

    pub fn get_entries_by_tag(
        &self,
        tags: &Tags,
        only_fresh: bool,
    ) -> Result<BTreeMap<String, EntrySnapshot>> {
        Ok(self
            .storage
            .get_by_tag(tags, only_fresh)?
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect())
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    pub fn set(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        fresh_for: impl Into<FreshFor>,
        options: &WriteOptions,
    ) -> Result<bool> {
        self.storage.set(
            key,
            data.into(),
            fresh_for.into().as_secs(),
            options.force,
            &options.tags,
        )
    }

    pub fn refresh(&self, key: &str, fresh_for: impl Into<FreshFor>, force: bool) -> Result<bool> {
        self.storage.refresh(key, fresh_for.into().as_secs(), force)
    }

    /// Schedule `task` for `key`; returns the key when queued
    pub fn queue(
        &self,
        key: &str,
        task: &str,
        params: impl Into<Bytes>,
        fresh_for: impl Into<FreshFor>,
        options: &QueueOptions,
    ) -> Result<Option<String>> {
        let request = options.request(
            QueueKey::from(key),
            task,
            params.into(),
            fresh_for.into().as_secs(),
        );
        self.storage.queue(&request)
    }

    /// Schedule a one-off job; its entry is deleted once the task ran
    ///
    /// Only priority, delay and channel of `options` apply.
    pub fn queue_temporary(
        &self,
        task: &str,
        params: impl Into<Bytes>,
        options: &QueueOptions,
    ) -> Result<Option<String>> {
        let request = QueueRequest::new(QueueKey::Temporary, task, params)
            .force(true)
            .priority(options.priority)
            .delay(options.delay)
            .channel(options.channel);
        self.storage.queue(&request)
    }

    // -------------------------------------------------------------------------
    // Compute
    // -------------------------------------------------------------------------

    /// Run `task` right now with nothing persisted
    ///
    /// An empty value counts as no result. Bury and requeue requests come back
    /// as [`CacheQueueError::Buried`] and [`CacheQueueError::Requeued`].
    pub fn run(&self, task: &str, params: impl Into<Bytes>) -> Result<Option<Bytes>> {
        let worker = self.worker()?;
        let job = worker.ephemeral_job(task, params.into());
        match worker.execute_task(task, &job.params, &job)? {
            TaskOutcome::Value(value) if value.is_empty() => Ok(None),
            TaskOutcome::Value(value) => Ok(Some(value)),
            TaskOutcome::NoUpdate => Ok(None),
            TaskOutcome::Bury(seconds) => Err(CacheQueueError::Buried { key: None, seconds }),
            TaskOutcome::Requeue { delay, fresh_for } => Err(CacheQueueError::Requeued {
                key: None,
                delay,
                fresh_for,
            }),
        }
    }

    /// Cached data of `key`, computing and storing it when missing or stale
    ///
    /// `compute` receives `params`, this client and the entry as it was read.
    /// With [`CacheOptions::lock`] at most one caller computes at a time; a
    /// caller that cannot get the lock in time gets `None`.
    pub fn get_or_set<F>(
        &self,
        key: &str,
        compute: F,
        params: impl Into<Bytes>,
        fresh_for: impl Into<FreshFor>,
        options: &CacheOptions,
    ) -> Result<Option<Bytes>>
    where
        F: FnOnce(&Bytes, &Client, Option<&EntrySnapshot>) -> Result<Bytes>,
    {
        let fresh_for = fresh_for.into().as_secs();
        let entry = self.storage.get(key, false)?;
        if !needs_update(entry.as_ref(), options.force) {
            return Ok(entry.and_then(|e| e.data));
        }

        let params = params.into();
        let Some(lock) = options.lock else {
            let data = compute(&params, self, entry.as_ref())?;
            self.storage
                .set(key, data.clone(), fresh_for, options.force, &options.tags)?;
            return Ok(Some(data));
        };

        let locks = self.locks();
        let Some(token) = locks.obtain(key, lock.lock_for, lock.timeout)? else {
            return Ok(None);
        };
        let release = ReleaseToken::Owner(token);

        // Someone may have stored the value while we waited for the lock
        let result = self.storage.get(key, false).and_then(|entry| {
            if !needs_update(entry.as_ref(), options.force) {
                return Ok(entry.and_then(|e| e.data));
            }
            let data = compute(&params, self, entry.as_ref())?;
            self.storage
                .set(key, data.clone(), fresh_for, options.force, &options.tags)?;
            Ok(Some(data))
        });
        unlock(&locks, key, &release);
        result
    }

    /// Cached data of `key`; queues `task` to produce it when missing or stale
    ///
    /// Nothing is queued while an earlier queue window is still open. With
    /// [`QueueOptions::ensure_fresh_queue`], fresh data gets a follow-up job
    /// starting one second after it expires.
    pub fn get_or_queue(
        &self,
        key: &str,
        task: &str,
        params: impl Into<Bytes>,
        fresh_for: impl Into<FreshFor>,
        options: &QueueOptions,
    ) -> Result<Option<Bytes>> {
        let fresh_for = fresh_for.into().as_secs();
        let entry = self.storage.get(key, false)?;

        match &entry {
            None => {
                self.storage
                    .queue(&options.request(key.into(), task, params.into(), fresh_for))?;
            }
            Some(e) if options.force || (!e.is_fresh && !e.queue_is_fresh) => {
                self.storage
                    .queue(&options.request(key.into(), task, params.into(), fresh_for))?;
            }
            Some(e) if options.ensure_fresh_queue && e.is_fresh && !e.queue_is_fresh => {
                let until_stale = clock::seconds_between(self.storage.now()?, e.fresh_until);
                let warm = QueueOptions {
                    delay: until_stale.saturating_add(1).saturating_add(options.delay),
                    ..options.clone()
                };
                self.storage
                    .queue(&warm.request(key.into(), task, params.into(), fresh_for))?;
            }
            Some(_) => {}
        }

        Ok(entry.and_then(|e| e.data))
    }

    /// Cached data of `key`, running `task` through the worker when missing or stale
    ///
    /// The run goes through the full job lifecycle, so the result is stored and
    /// bury/requeue requests are applied before they surface as errors.
    pub fn get_or_run(
        &self,
        key: &str,
        task: &str,
        params: impl Into<Bytes>,
        fresh_for: impl Into<FreshFor>,
        options: &CacheOptions,
    ) -> Result<Option<Bytes>> {
        let fresh_for = fresh_for.into().as_secs();
        let entry = self.storage.get(key, false)?;
        if !needs_update(entry.as_ref(), options.force) {
            return Ok(entry.and_then(|e| e.data));
        }

        let worker = self.worker()?;
        let params = params.into();

        let Some(lock) = options.lock else {
            let job = self.direct_job(worker, key, task, params, fresh_for, options, entry)?;
            return worker.work(&job)?.into_data(Some(key));
        };

        let locks = self.locks();
        let Some(token) = locks.obtain(key, lock.lock_for, lock.timeout)? else {
            return Ok(None);
        };
        let release = ReleaseToken::Owner(token);

        let result = self.storage.get(key, false).and_then(|entry| {
            if !needs_update(entry.as_ref(), options.force) {
                return Ok(entry.and_then(|e| e.data));
            }
            let job = self.direct_job(worker, key, task, params, fresh_for, options, entry)?;
            worker.work(&job)?.into_data(Some(key))
        });
        unlock(&locks, key, &release);
        result
    }

    /// Job for running `task` on `key` right now, outside the queue
    #[allow(clippy::too_many_arguments)]
    fn direct_job(
        &self,
        worker: &Worker,
        key: &str,
        task: &str,
        params: Bytes,
        fresh_for: u64,
        options: &CacheOptions,
        entry: Option<EntrySnapshot>,
    ) -> Result<Job> {
        Ok(Job {
            key: Some(key.to_string()),
            fresh_until: clock::after(self.storage.now()?, fresh_for),
            fresh_for,
            tags: options.tags.clone(),
            task: task.to_string(),
            params,
            data: entry.and_then(|e| e.data),
            channel: self.queue_defaults.channel,
            priority: self.queue_defaults.priority,
            temp: false,
            worker_id: worker.id().to_string(),
        })
    }

    // -------------------------------------------------------------------------
    // Invalidation and maintenance
    // -------------------------------------------------------------------------

    pub fn outdate(&self, key: &str, force: bool) -> Result<bool> {
        self.storage.outdate(key, force)
    }

    pub fn outdate_by_tag(&self, tags: &Tags, force: bool) -> Result<u64> {
        self.storage.outdate_by_tag(tags, force)
    }

    pub fn outdate_all(&self, force: bool) -> Result<u64> {
        self.storage.outdate_all(force)
    }

    pub fn remove(&self, key: &str, force: bool) -> Result<bool> {
        self.storage.remove(key, force)
    }

    pub fn remove_by_tag(&self, tags: &Tags, force: bool) -> Result<u64> {
        self.storage.remove_by_tag(tags, force)
    }

    pub fn remove_all(&self, force: bool) -> Result<u64> {
        self.storage.remove_all(force)
    }

    pub fn count_all(&self, filter: FreshnessFilter) -> Result<u64> {
        self.storage.count_all(filter)
    }

    pub fn count_by_tag(&self, tags: &Tags, filter: FreshnessFilter) -> Result<u64> {
        self.storage.count_by_tag(tags, filter)
    }

    pub fn queue_count(&self, channel: Option<u32>) -> Result<u64> {
        self.storage.queue_count(channel)
    }

    pub fn clear_queue(&self, channel: Option<u32>) -> Result<u64> {
        self.storage.clear_queue(channel)
    }

    pub fn cleanup(&self, outdated_for: u64) -> Result<u64> {
        self.storage.cleanup(outdated_for)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("worker", &self.worker)
            .field("lock_poll_interval", &self.lock_poll_interval)
            .finish()
    }
}

/// Missing, stale or forced entries get recomputed
/// Release a lock taken around a compute; the compute's result wins over a
/// failed release, and the lock then lapses on its own
fn unlock(locks: &LockManager<'_, dyn Storage>, key: &str, release: &ReleaseToken) {
    if let Err(e) = locks.release(key, release) {
        tracing::warn!(key, error = %e, "Failed to release lock");
    }
}

fn needs_update(entry: Option<&EntrySnapshot>, force: bool) -> bool {
    force || !entry.is_some_and(|e| e.is_fresh)
}
