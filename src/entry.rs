//! Entry data model
//!
//! An [`Entry`] is the single stored record type. Cache fields (`data`,
//! `fresh_until`, `tags`) and queue fields (`task`, `queued`, `queue_*`) live side
//! by side and are independent of each other. Locks are ordinary entries under a
//! `.lock` key, and jobs are a view materialized from an entry at claim time.

use std::collections::BTreeSet;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::clock;

/// A set of tags attached to an entry
pub type Tags = BTreeSet<String>;

/// Build a tag set from anything string-like
pub fn tags<I, S>(items: I) -> Tags
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Default queue priority (0 = served first, 100 = served last)
pub const DEFAULT_PRIORITY: u8 = 50;

/// Lowest possible priority
pub const MAX_PRIORITY: u8 = 100;

/// Channel value meaning "not queued"
pub const NOT_QUEUED: u32 = 0;

/// A stored cache/queue record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,

    // -------------------------------------------------------------------------
    // Cache fields
    // -------------------------------------------------------------------------
    pub data: Option<Bytes>,
    /// Unix seconds; 0 when never set
    pub fresh_until: i64,
    pub tags: Tags,
    pub date_set: i64,

    // -------------------------------------------------------------------------
    // Queue fields
    // -------------------------------------------------------------------------
    pub task: Option<String>,
    pub params: Option<Bytes>,
    /// Tags the result is stored with once the job completes
    pub queue_tags: Tags,
    pub queue_priority: u8,
    /// Earliest time the job may be claimed
    pub queue_start: i64,
    /// End of the queue window; doubles as the claim lease
    pub queue_fresh_until: i64,
    /// Channel the entry is waiting in, 0 when not queued
    pub queued: u32,
    /// Worker currently holding the claim
    pub queued_worker: Option<String>,
    /// Delete the entry once its task has run
    pub is_temp: bool,
}

impl Entry {
    /// An empty entry for `key`
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            data: None,
            fresh_until: 0,
            tags: Tags::new(),
            date_set: 0,
            task: None,
            params: None,
            queue_tags: Tags::new(),
            queue_priority: DEFAULT_PRIORITY,
            queue_start: 0,
            queue_fresh_until: 0,
            queued: NOT_QUEUED,
            queued_worker: None,
            is_temp: false,
        }
    }

    pub fn is_fresh(&self, now: i64) -> bool {
        self.fresh_until > now
    }

    pub fn queue_is_fresh(&self, now: i64) -> bool {
        self.queue_fresh_until > now
    }

    pub fn is_queued(&self) -> bool {
        self.queued != NOT_QUEUED
    }

    /// Claimed by a worker whose lease has not lapsed yet
    pub fn has_outstanding_claim(&self, now: i64) -> bool {
        self.queued_worker.is_some() && self.queue_is_fresh(now)
    }

    /// True when the entry carries any of `wanted`
    pub fn has_any_tag(&self, wanted: &Tags) -> bool {
        self.tags.iter().any(|tag| wanted.contains(tag))
    }

    /// Neither cache data nor a task: logically absent
    pub fn is_vacant(&self) -> bool {
        self.data.is_none() && self.task.is_none()
    }

    /// Read-side view of this entry as seen at `now`
    pub fn snapshot(&self, now: i64) -> EntrySnapshot {
        EntrySnapshot {
            key: self.key.clone(),
            data: self.data.clone(),
            fresh_until: self.fresh_until,
            is_fresh: self.is_fresh(now),
            date_set: self.date_set,
            queue_fresh_until: self.queue_fresh_until,
            queue_is_fresh: self.queue_is_fresh(now),
            tags: self.tags.clone(),
            task: self.task.clone(),
            params: self.params.clone(),
            read_at: now,
        }
    }
}

/// Entry as returned by reads, with freshness evaluated by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub key: String,
    pub data: Option<Bytes>,
    pub fresh_until: i64,
    pub is_fresh: bool,
    pub date_set: i64,
    pub queue_fresh_until: i64,
    pub queue_is_fresh: bool,
    pub tags: Tags,
    pub task: Option<String>,
    pub params: Option<Bytes>,
    /// Backend time the snapshot was taken at
    pub read_at: i64,
}

impl EntrySnapshot {
    /// Seconds of freshness left at read time (0 when stale)
    pub fn fresh_for(&self) -> u64 {
        clock::seconds_between(self.read_at, self.fresh_until)
    }
}

/// A claimed unit of work; never stored, built when an entry is claimed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// `None` for an ephemeral, non-persisted run
    pub key: Option<String>,
    /// Deadline of the queue window (the claim lease)
    pub fresh_until: i64,
    /// Length of the queue window in seconds
    pub fresh_for: u64,
    pub tags: Tags,
    pub task: String,
    pub params: Bytes,
    /// Cached data present at claim time
    pub data: Option<Bytes>,
    pub channel: u32,
    pub priority: u8,
    pub temp: bool,
    pub worker_id: String,
}

/// Which entries a count considers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FreshnessFilter {
    #[default]
    Any,
    Fresh,
    Stale,
}

impl FreshnessFilter {
    pub fn matches(self, entry: &Entry, now: i64) -> bool {
        match self {
            FreshnessFilter::Any => true,
            FreshnessFilter::Fresh => entry.is_fresh(now),
            FreshnessFilter::Stale => !entry.is_fresh(now),
        }
    }
}

/// Target of a queue write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueKey {
    /// Queue work for a named entry
    Key(String),
    /// Generate a random key, force the write and delete the entry after the run
    Temporary,
}

impl From<&str> for QueueKey {
    fn from(key: &str) -> Self {
        QueueKey::Key(key.to_string())
    }
}

impl From<String> for QueueKey {
    fn from(key: String) -> Self {
        QueueKey::Key(key)
    }
}

/// Everything a `queue` write needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRequest {
    pub key: QueueKey,
    pub task: String,
    pub params: Bytes,
    /// Seconds the produced data stays fresh, counted after `delay`
    pub fresh_for: u64,
    pub force: bool,
    pub tags: Tags,
    pub priority: u8,
    /// Seconds until the job becomes eligible
    pub delay: u64,
    pub channel: u32,
}

impl QueueRequest {
    /// A request with default priority, no delay, channel 1 and no tags
    pub fn new(key: impl Into<QueueKey>, task: impl Into<String>, params: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            task: task.into(),
            params: params.into(),
            fresh_for: 0,
            force: false,
            tags: Tags::new(),
            priority: DEFAULT_PRIORITY,
            delay: 0,
            channel: 1,
        }
    }

    pub fn fresh_for(mut self, seconds: u64) -> Self {
        self.fresh_for = seconds;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
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
}
