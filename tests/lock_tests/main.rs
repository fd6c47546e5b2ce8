//! Tests for locks taken through the Storage trait
//!
//! These tests verify:
//! - Mutual exclusion across threads
//! - Timeouts and takeover of expired locks
//! - Locks are ordinary entries visible to reads

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cachequeue::lock::LOCK_SUFFIX;
use cachequeue::{LockManager, ManualClock, MemoryStorage, ReleaseToken, Storage};

// =============================================================================
// Exclusion Tests
// =============================================================================

#[test]
fn test_concurrent_obtain_is_exclusive() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let storage = Arc::clone(&storage);
            let inside = Arc::clone(&inside);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                let token = storage
                    .obtain_lock("shared", 30, Some(Duration::from_secs(10)))
                    .unwrap()
                    .expect("lock within timeout");

                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                entered.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                inside.fetch_sub(1, Ordering::SeqCst);

                assert!(storage.release_lock("shared", &ReleaseToken::from(token)).unwrap());
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(entered.load(Ordering::SeqCst), 6);
}

#[test]
fn test_locks_on_different_keys_are_independent() {
    let storage = MemoryStorage::new();

    let a = storage.obtain_lock("a", 30, Some(Duration::ZERO)).unwrap();
    let b = storage.obtain_lock("b", 30, Some(Duration::ZERO)).unwrap();

    assert!(a.is_some());
    assert!(b.is_some());
}

// =============================================================================
// Timeout and Expiry Tests
// =============================================================================

#[test]
fn test_zero_timeout_fails_fast_while_held() {
    let storage = MemoryStorage::new();
    storage.obtain_lock("k", 30, None).unwrap().unwrap();

    let second = storage.obtain_lock("k", 30, Some(Duration::ZERO)).unwrap();
    assert!(second.is_none());
}

#[test]
fn test_expired_lock_taken_over() {
    let clock = ManualClock::new(1_000);
    let storage = MemoryStorage::with_clock(clock.clone());

    let old = storage.obtain_lock("k", 10, None).unwrap().unwrap();
    clock.advance(11);
    let new = storage.obtain_lock("k", 10, Some(Duration::ZERO)).unwrap().unwrap();

    assert!(!storage.release_lock("k", &ReleaseToken::Owner(old)).unwrap());
    assert!(storage.release_lock("k", &ReleaseToken::Owner(new)).unwrap());
}

#[test]
fn test_lock_freed_by_holder_can_be_retaken() {
    let storage = MemoryStorage::new();
    let locks = LockManager::new(&storage).poll_interval(Duration::from_millis(1));

    let first = locks.obtain("k", 30, None).unwrap().unwrap();
    assert!(locks.release("k", &first.into()).unwrap());

    assert!(locks.obtain("k", 30, Some(Duration::ZERO)).unwrap().is_some());
}

// =============================================================================
// Representation Tests
// =============================================================================

#[test]
fn test_lock_is_an_entry() {
    let clock = ManualClock::new(1_000);
    let storage = MemoryStorage::with_clock(clock);

    let token = storage.obtain_lock("report", 45, None).unwrap().unwrap();

    let entry = storage.get(&format!("report{}", LOCK_SUFFIX), true).unwrap().unwrap();
    assert_eq!(entry.data.as_deref(), Some(token.as_bytes()));
    assert_eq!(entry.fresh_until, 1_045);
}
