//! Clock abstraction
//!
//! All freshness, lease and delay arithmetic runs on whole unix seconds taken from a
//! [`Clock`], so tests can move time forward instead of sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current unix time in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// `time` moved `seconds` into the future, clamped at the end of the timeline
pub fn after(time: i64, seconds: u64) -> i64 {
    time.saturating_add(i64::try_from(seconds).unwrap_or(i64::MAX))
}

/// `time` moved `seconds` into the past, clamped at the start of the timeline
pub fn before(time: i64, seconds: u64) -> i64 {
    time.saturating_sub(i64::try_from(seconds).unwrap_or(i64::MAX))
}

/// Whole seconds from `from` until `until`; 0 when `until` has passed
pub fn seconds_between(from: i64, until: i64) -> u64 {
    u64::try_from(until.saturating_sub(from)).unwrap_or(0)
}

/// Real wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Manually driven clock; clones share the same time
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<AtomicI64>,
}

impl ManualClock {
    /// Start at the given unix time
    pub fn new(start: i64) -> Self {
        Self {
            current: Arc::new(AtomicI64::new(start)),
        }
    }

    /// Start at the current wall-clock time
    pub fn starting_now() -> Self {
        Self::new(SystemClock.now())
    }

    /// Move time forward by `seconds`
    pub fn advance(&self, seconds: i64) {
        self.current.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set(&self, now: i64) {
        self.current.store(now, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_now()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.current.load(Ordering::SeqCst)
    }
}
