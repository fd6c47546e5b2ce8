//! Lock Manager
//!
//! Mutual exclusion built from ordinary entries. The lock for `key` is the entry
//! `<key>.lock`: its data holds the holder's random token, its `fresh_until` the
//! expiry. Acquisition is a bounded spin:
//!
//! 1. Non-forced `set` of the token (skipped by the store while another holder's
//!    entry is fresh)
//! 2. Read the entry back; our token means we hold the lock
//! 3. A stale entry belongs to a dead holder: evict it and retry at once
//! 4. Otherwise sleep for the poll interval and retry until the timeout runs out
//!
//! There is no fairness. Release compares the token so a late holder cannot free
//! a lock that has since been handed to someone else.

use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use uuid::Uuid;

use crate::entry::Tags;
use crate::error::Result;
use crate::storage::Storage;

/// Suffix appended to a key to form its lock key
pub const LOCK_SUFFIX: &str = ".lock";

/// Sleep between two acquisition attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Who is releasing a lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseToken {
    /// The token returned by `obtain`; only the matching holder's lock is deleted
    Owner(String),
    /// Delete whoever holds the lock
    Force,
}

impl From<String> for ReleaseToken {
    fn from(token: String) -> Self {
        ReleaseToken::Owner(token)
    }
}

impl From<&str> for ReleaseToken {
    fn from(token: &str) -> Self {
        ReleaseToken::Owner(token.to_string())
    }
}

/// Obtains and releases locks against a [`Storage`]
pub struct LockManager<'a, S: Storage + ?Sized> {
    storage: &'a S,
    poll_interval: Duration,
}

impl<'a, S: Storage + ?Sized> LockManager<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self {
            storage,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the sleep between attempts
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Key of the entry holding the lock for `key`
    pub fn lock_key(key: &str) -> String {
        format!("{}{}", key, LOCK_SUFFIX)
    }

    /// Try to take the lock for `key` for `lock_for` seconds
    ///
    /// Waits at most `timeout` (default: `lock_for` seconds). Returns the holder
    /// token, or `None` when the lock stayed taken.
    pub fn obtain(&self, key: &str, lock_for: u64, timeout: Option<Duration>) -> Result<Option<String>> {
        let lock_key = Self::lock_key(key);
        let token = Uuid::new_v4().to_string();
        let token_bytes = Bytes::from(token.clone());
        let timeout = timeout.unwrap_or_else(|| Duration::from_secs(lock_for));
        let started = Instant::now();
        let no_tags = Tags::new();
        let mut waited = false;

        loop {
            self.storage
                .set(&lock_key, token_bytes.clone(), lock_for, false, &no_tags)?;

            match self.storage.get(&lock_key, false)? {
                Some(entry) if entry.data.as_ref() == Some(&token_bytes) => {
                    if waited {
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        tracing::debug!(key, elapsed_ms, "Lock obtained after waiting");
                    }
                    return Ok(Some(token));
                }
                Some(entry) if !entry.is_fresh => {
                    // Expired holder: evict exactly that holder, then retry without sleeping
                    if let Some(stale) = &entry.data {
                        self.storage.remove_if_data(&lock_key, stale)?;
                    } else {
                        self.storage.remove(&lock_key, false)?;
                    }
                    tracing::debug!(key, "Evicted stale lock");
                    continue;
                }
                _ => {
                    if started.elapsed() >= timeout {
                        break;
                    }
                    if !waited {
                        tracing::debug!(key, "Waiting for lock");
                        waited = true;
                    }
                    thread::sleep(self.poll_interval);
                }
            }
        }

        tracing::warn!(key, timeout_ms = timeout.as_millis() as u64, "Lock not obtained");
        Ok(None)
    }

    /// Release the lock for `key`; returns whether a lock entry was deleted
    pub fn release(&self, key: &str, token: &ReleaseToken) -> Result<bool> {
        let lock_key = Self::lock_key(key);
        match token {
            ReleaseToken::Owner(token) => self
                .storage
                .remove_if_data(&lock_key, &Bytes::from(token.clone())),
            ReleaseToken::Force => self.storage.remove(&lock_key, true),
        }
    }
}
