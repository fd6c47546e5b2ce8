//! Tests for the Client orchestration API
//!
//! These tests verify:
//! - Plain reads and writes with freshness windows
//! - get_or_set computes once per stale period, also under contention
//! - get_or_queue schedules instead of computing
//! - get_or_run and run go through the worker

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use cachequeue::worker::register_builtin;
use cachequeue::{
    tags, CacheOptions, CacheQueueError, Client, Config, EntrySnapshot, FreshFor, FreshnessFilter, Job,
    LockOptions, ManualClock, MemoryStorage, QueueOptions, QueueRequest, Result, Storage, Tags,
    TaskOutcome, TaskRegistry, Worker, WriteOptions,
};

// =============================================================================
// Helper Functions
// =============================================================================

const START: i64 = 1_700_000_000;

fn manual_client() -> (Client, Arc<MemoryStorage>, ManualClock) {
    let clock = ManualClock::new(START);
    let storage = Arc::new(MemoryStorage::with_clock(clock.clone()));
    (Client::new(storage.clone()), storage, clock)
}

/// Client with a worker whose `count` task reports how often it ran
fn client_with_worker() -> (Client, Arc<MemoryStorage>, ManualClock, Arc<AtomicUsize>) {
    let clock = ManualClock::new(START);
    let storage = Arc::new(MemoryStorage::with_clock(clock.clone()));
    let runs = Arc::new(AtomicUsize::new(0));

    let mut registry = TaskRegistry::new();
    register_builtin(&mut registry);
    let counter = Arc::clone(&runs);
    registry
        .register_fn("count", move |_, _, _, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TaskOutcome::value(format!("run-{}", n)))
        })
        .register_fn("empty", |_, _, _, _| Ok(TaskOutcome::value(Bytes::new())))
        .register_fn("bury", |_, _, _, _| Ok(TaskOutcome::Bury(Some(300))));

    let worker = Worker::new(storage.clone(), registry);
    let client = Client::new(storage.clone()).with_worker(worker);
    (client, storage, clock, runs)
}

/// Memory storage whose lock entries cannot be released
struct StuckLocks(MemoryStorage);

impl Storage for StuckLocks {
    fn now(&self) -> Result<i64> {
        self.0.now()
    }
    fn get(&self, key: &str, only_fresh: bool) -> Result<Option<EntrySnapshot>> {
        self.0.get(key, only_fresh)
    }
    fn get_by_tag(&self, tags: &Tags, only_fresh: bool) -> Result<Vec<EntrySnapshot>> {
        self.0.get_by_tag(tags, only_fresh)
    }
    fn set(&self, key: &str, data: Bytes, fresh_for: u64, force: bool, tags: &Tags) -> Result<bool> {
        self.0.set(key, data, fresh_for, force, tags)
    }
    fn refresh(&self, key: &str, fresh_for: u64, force: bool) -> Result<bool> {
        self.0.refresh(key, fresh_for, force)
    }
    fn queue(&self, request: &QueueRequest) -> Result<Option<String>> {
        self.0.queue(request)
    }
    fn get_job(&self, worker_id: &str, channel: u32) -> Result<Option<Job>> {
        self.0.get_job(worker_id, channel)
    }
    fn update_job_status(&self, key: &str, worker_id: &str, new_queue_fresh_for: u64) -> Result<bool> {
        self.0.update_job_status(key, worker_id, new_queue_fresh_for)
    }
    fn queue_count(&self, channel: Option<u32>) -> Result<u64> {
        self.0.queue_count(channel)
    }
    fn clear_queue(&self, channel: Option<u32>) -> Result<u64> {
        self.0.clear_queue(channel)
    }
    fn count_all(&self, filter: FreshnessFilter) -> Result<u64> {
        self.0.count_all(filter)
    }
    fn count_by_tag(&self, tags: &Tags, filter: FreshnessFilter) -> Result<u64> {
        self.0.count_by_tag(tags, filter)
    }
    fn remove(&self, key: &str, force: bool) -> Result<bool> {
        self.0.remove(key, force)
    }
    fn remove_if_data(&self, key: &str, data: &Bytes) -> Result<bool> {
        if key.ends_with(".lock") {
            return Err(CacheQueueError::Network("connection lost".to_string()));
        }
        self.0.remove_if_data(key, data)
    }
    fn remove_all(&self, force: bool) -> Result<u64> {
        self.0.remove_all(force)
    }
    fn remove_by_tag(&self, tags: &Tags, force: bool) -> Result<u64> {
        self.0.remove_by_tag(tags, force)
    }
    fn outdate(&self, key: &str, force: bool) -> Result<bool> {
        self.0.outdate(key, force)
    }
    fn outdate_all(&self, force: bool) -> Result<u64> {
        self.0.outdate_all(force)
    }
    fn outdate_by_tag(&self, tags: &Tags, force: bool) -> Result<u64> {
        self.0.outdate_by_tag(tags, force)
    }
    fn cleanup(&self, outdated_for: u64) -> Result<u64> {
        self.0.cleanup(outdated_for)
    }
}

fn stuck_lock_client() -> (Client, Arc<StuckLocks>) {
    let storage = Arc::new(StuckLocks(MemoryStorage::with_clock(ManualClock::new(START))));
    let mut registry = TaskRegistry::new();
    register_builtin(&mut registry);
    registry.register_fn("fail", |_, _, _, _| Err(CacheQueueError::task("fail", "boom")));
    let worker = Worker::new(storage.clone(), registry);
    (Client::new(storage.clone()).with_worker(worker), storage)
}

// =============================================================================
// Read / Write Tests
// =============================================================================

#[test]
fn test_set_get_with_expiry() {
    let (client, _storage, clock) = manual_client();

    assert!(client.set("a", "1", 60u64, &WriteOptions::default()).unwrap());
    assert_eq!(client.get("a", true).unwrap(), Some(Bytes::from("1")));

    clock.advance(61);
    assert_eq!(client.get("a", true).unwrap(), None);
    assert_eq!(client.get("a", false).unwrap(), Some(Bytes::from("1")));
}

#[test]
fn test_forever_and_forced_writes() {
    let (client, _storage, clock) = manual_client();

    client.set("a", "1", FreshFor::Forever, &WriteOptions::default()).unwrap();
    clock.advance(365 * 24 * 3600);
    assert!(!client.set("a", "2", 60u64, &WriteOptions::default()).unwrap());
    assert!(client.set("a", "3", 60u64, &WriteOptions::forced()).unwrap());
    assert_eq!(client.get("a", true).unwrap(), Some(Bytes::from("3")));
}

#[test]
fn test_get_by_tag_returns_data_by_key() {
    let (client, _storage, _clock) = manual_client();
    let options = WriteOptions::default().tags(tags(["news"]));
    client.set("b", "2", 60u64, &options).unwrap();
    client.set("a", "1", 60u64, &options).unwrap();
    client.set("c", "3", 60u64, &WriteOptions::default()).unwrap();

    let found = client.get_by_tag(&tags(["news"]), true).unwrap();
    let keys: Vec<_> = found.keys().cloned().collect();
    assert_eq!(keys, vec!["a", "b"]);
    assert_eq!(client.count_by_tag(&tags(["news"]), FreshnessFilter::Any).unwrap(), 2);

    let entries = client.get_entries_by_tag(&tags(["news"]), false).unwrap();
    assert!(entries["a"].is_fresh);
}

#[test]
fn test_invalidation_helpers() {
    let (client, _storage, _clock) = manual_client();
    client.set("a", "1", 60u64, &WriteOptions::default()).unwrap();

    assert!(client.outdate("a", false).unwrap());
    assert_eq!(client.get("a", true).unwrap(), None);
    assert!(client.refresh("a", 30u64, false).unwrap());
    assert!(client.get("a", true).unwrap().is_some());
    assert!(client.remove("a", true).unwrap());
    assert_eq!(client.count_all(FreshnessFilter::Any).unwrap(), 0);
}

// =============================================================================
// get_or_set Tests
// =============================================================================

#[test]
fn test_get_or_set_computes_when_missing_then_caches() {
    let (client, _storage, clock) = manual_client();
    let calls = AtomicUsize::new(0);
    let compute = |params: &Bytes,
                   _: &Client,
                   _: Option<&EntrySnapshot>|
     -> cachequeue::Result<Bytes> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(format!("computed:{}", String::from_utf8_lossy(params))))
    };

    let options = CacheOptions::default();
    let first = client.get_or_set("k", compute, "p", 60u64, &options).unwrap();
    let second = client.get_or_set("k", compute, "p", 60u64, &options).unwrap();

    assert_eq!(first, Some(Bytes::from("computed:p")));
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.advance(61);
    client.get_or_set("k", compute, "p", 60u64, &options).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_get_or_set_passes_stale_entry() {
    let (client, _storage, clock) = manual_client();
    client.set("k", "old", 10u64, &WriteOptions::default()).unwrap();
    clock.advance(11);

    let value = client
        .get_or_set(
            "k",
            |_, _, entry| {
                let mut value = entry.and_then(|e| e.data.clone()).unwrap_or_default().to_vec();
                value.extend_from_slice(b"+new");
                Ok(Bytes::from(value))
            },
            Bytes::new(),
            60u64,
            &CacheOptions::default(),
        )
        .unwrap();

    assert_eq!(value, Some(Bytes::from("old+new")));
}

#[test]
fn test_get_or_set_forced_recomputes_fresh_entry() {
    let (client, _storage, _clock) = manual_client();
    client.set("k", "cached", 60u64, &WriteOptions::default()).unwrap();

    let value = client
        .get_or_set(
            "k",
            |_, _, _| Ok(Bytes::from("recomputed")),
            Bytes::new(),
            60u64,
            &CacheOptions::default().force(true),
        )
        .unwrap();

    assert_eq!(value, Some(Bytes::from("recomputed")));
    assert_eq!(client.get("k", true).unwrap(), Some(Bytes::from("recomputed")));
}

#[test]
fn test_get_or_set_error_releases_lock() {
    let (client, storage, _clock) = manual_client();
    let options = CacheOptions::default().lock(LockOptions::new(30));

    let err = client
        .get_or_set(
            "k",
            |_, _, _| Err(CacheQueueError::task("compute", "boom")),
            Bytes::new(),
            60u64,
            &options,
        )
        .unwrap_err();
    assert!(matches!(err, CacheQueueError::Task { .. }));

    // The lock is free again
    assert!(storage.obtain_lock("k", 30, Some(Duration::ZERO)).unwrap().is_some());
}

#[test]
fn test_get_or_set_result_survives_failed_lock_release() {
    let (client, storage) = stuck_lock_client();
    let options = CacheOptions::default().lock(LockOptions::new(30));

    let value = client
        .get_or_set("k", |_, _, _| Ok(Bytes::from("computed")), Bytes::new(), 60u64, &options)
        .unwrap();
    assert_eq!(value, Some(Bytes::from("computed")));
    assert_eq!(storage.get("k", true).unwrap().unwrap().data, Some(Bytes::from("computed")));

    let err = client
        .get_or_set(
            "other",
            |_, _, _| Err(CacheQueueError::task("compute", "boom")),
            Bytes::new(),
            60u64,
            &options,
        )
        .unwrap_err();
    assert!(matches!(err, CacheQueueError::Task { .. }));
}

#[test]
fn test_get_or_set_gives_up_when_lock_held() {
    let (client, storage, _clock) = manual_client();
    storage.obtain_lock("k", 30, None).unwrap().unwrap();

    let options = CacheOptions::default().lock(LockOptions::new(30).timeout(Duration::ZERO));
    let value = client
        .get_or_set("k", |_, _, _| Ok(Bytes::from("x")), Bytes::new(), 60u64, &options)
        .unwrap();

    assert_eq!(value, None);
    assert_eq!(client.get("k", false).unwrap(), None);
}

#[test]
fn test_concurrent_get_or_set_computes_once() {
    let storage = Arc::new(MemoryStorage::new());
    let client = Client::with_config(
        storage,
        &Config::builder().lock_poll_interval_ms(5).build(),
    );
    let computed = AtomicUsize::new(0);
    let options = CacheOptions::default().lock(LockOptions::new(30).timeout(Duration::from_secs(10)));

    let results: Vec<Option<Bytes>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    client
                        .get_or_set(
                            "report",
                            |_, _, _| {
                                computed.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(50));
                                Ok(Bytes::from("expensive"))
                            },
                            Bytes::new(),
                            60u64,
                            &options,
                        )
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(computed.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| r.as_deref() == Some(&b"expensive"[..])));
}

// =============================================================================
// get_or_queue Tests
// =============================================================================

#[test]
fn test_get_or_queue_schedules_missing_entry_once() {
    let (client, storage, _clock) = manual_client();
    let options = QueueOptions::default();

    assert_eq!(client.get_or_queue("k", "store", "p", 60u64, &options).unwrap(), None);
    assert_eq!(client.get_or_queue("k", "store", "p", 60u64, &options).unwrap(), None);

    assert_eq!(storage.queue_count(Some(1)).unwrap(), 1);
}

#[test]
fn test_get_or_queue_returns_fresh_data_without_queueing() {
    let (client, storage, _clock) = manual_client();
    client.set("k", "cached", 60u64, &WriteOptions::default()).unwrap();

    let value = client
        .get_or_queue("k", "store", "p", 60u64, &QueueOptions::default())
        .unwrap();

    assert_eq!(value, Some(Bytes::from("cached")));
    assert_eq!(storage.queue_count(None).unwrap(), 0);
}

#[test]
fn test_get_or_queue_serves_stale_data_and_queues() {
    let (client, storage, clock) = manual_client();
    client.set("k", "stale", 10u64, &WriteOptions::default()).unwrap();
    clock.advance(11);

    let value = client
        .get_or_queue("k", "store", "p", 60u64, &QueueOptions::default().priority(5))
        .unwrap();

    assert_eq!(value, Some(Bytes::from("stale")));
    assert_eq!(storage.queue_count(Some(1)).unwrap(), 1);
}

#[test]
fn test_get_or_queue_ensure_fresh_queue_schedules_after_expiry() {
    let (client, storage, clock) = manual_client();
    client.set("k", "cached", 10u64, &WriteOptions::default()).unwrap();

    let options = QueueOptions::default().ensure_fresh_queue(true);
    let value = client.get_or_queue("k", "store", "next", 60u64, &options).unwrap();
    assert_eq!(value, Some(Bytes::from("cached")));
    assert_eq!(storage.queue_count(Some(1)).unwrap(), 1);

    // Eligible one second after the data goes stale
    clock.advance(10);
    assert!(storage.get_job("w", 1).unwrap().is_none());
    clock.advance(1);
    let job = storage.get_job("w", 1).unwrap().unwrap();
    assert_eq!(job.params, Bytes::from("next"));
}

// =============================================================================
// run / get_or_run Tests
// =============================================================================

#[test]
fn test_run_executes_without_storing() {
    let (client, storage, _clock, runs) = client_with_worker();

    assert_eq!(client.run("store", "direct").unwrap(), Some(Bytes::from("direct")));
    assert_eq!(client.run("empty", "").unwrap(), None);
    assert_eq!(client.run("count", "").unwrap(), Some(Bytes::from("run-1")));

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(storage.is_empty());
}

#[test]
fn test_run_unknown_task() {
    let (client, _storage, _clock, _runs) = client_with_worker();
    let err = client.run("nope", "").unwrap_err();
    assert!(matches!(err, CacheQueueError::UnknownTask(_)));
}

#[test]
fn test_get_or_run_stores_and_reuses() {
    let (client, _storage, clock, runs) = client_with_worker();
    let options = CacheOptions::default().tags(tags(["r"]));

    let first = client.get_or_run("k", "count", "", 60u64, &options).unwrap();
    let second = client.get_or_run("k", "count", "", 60u64, &options).unwrap();
    assert_eq!(first, Some(Bytes::from("run-1")));
    assert_eq!(second, first);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let entry = client.get_entry("k", true).unwrap().unwrap();
    assert_eq!(entry.fresh_until, START + 60);
    assert_eq!(entry.tags, tags(["r"]));

    clock.advance(61);
    let third = client.get_or_run("k", "count", "", 60u64, &options).unwrap();
    assert_eq!(third, Some(Bytes::from("run-2")));
}

#[test]
fn test_get_or_run_with_lock() {
    let (client, storage, _clock, _runs) = client_with_worker();
    let options = CacheOptions::default().lock(LockOptions::new(30));

    let value = client.get_or_run("k", "store", "locked", 60u64, &options).unwrap();

    assert_eq!(value, Some(Bytes::from("locked")));
    assert!(storage.obtain_lock("k", 30, Some(Duration::ZERO)).unwrap().is_some());
}

#[test]
fn test_get_or_run_result_survives_failed_lock_release() {
    let (client, _storage) = stuck_lock_client();
    let options = CacheOptions::default().lock(LockOptions::new(30));

    let value = client.get_or_run("k", "store", "locked", 60u64, &options).unwrap();
    assert_eq!(value, Some(Bytes::from("locked")));

    let err = client.get_or_run("other", "fail", "", 60u64, &options).unwrap_err();
    assert!(matches!(err, CacheQueueError::Task { .. }));
}

#[test]
fn test_get_or_run_bury_surfaces_as_error() {
    let (client, _storage, _clock, _runs) = client_with_worker();

    let err = client
        .get_or_run("k", "bury", "", 60u64, &CacheOptions::default())
        .unwrap_err();

    assert!(matches!(err, CacheQueueError::Buried { seconds: Some(300), ref key } if key.as_deref() == Some("k")));
}

#[test]
fn test_get_or_run_requires_worker() {
    let (client, _storage, _clock) = manual_client();
    let err = client
        .get_or_run("k", "store", "", 60u64, &CacheOptions::default())
        .unwrap_err();
    assert!(matches!(err, CacheQueueError::NoWorker));
}

// =============================================================================
// Queue Tests
// =============================================================================

#[test]
fn test_queue_temporary_removed_after_completion() {
    let (client, storage, _clock, _runs) = client_with_worker();
    let key = client
        .queue_temporary("store", "once", &QueueOptions::default())
        .unwrap()
        .unwrap();
    assert!(storage.get(&key, false).unwrap().is_some());

    let outcome = client.worker().unwrap().work_next(1).unwrap().unwrap();
    assert_eq!(outcome.into_data(None).unwrap(), Some(Bytes::from("once")));
    assert!(storage.get(&key, false).unwrap().is_none());
}

#[test]
fn test_queue_then_worker_fills_cache() {
    let (client, _storage, _clock, _runs) = client_with_worker();
    let options = QueueOptions::default().tags(tags(["q"]));

    assert_eq!(
        client.queue("k", "store", "payload", 60u64, &options).unwrap(),
        Some("k".to_string())
    );
    assert_eq!(client.queue_count(None).unwrap(), 1);

    client.worker().unwrap().work_next(1).unwrap();
    assert_eq!(client.get("k", true).unwrap(), Some(Bytes::from("payload")));
    assert_eq!(client.get_by_tag(&tags(["q"]), true).unwrap().len(), 1);
}

#[test]
fn test_config_defaults_apply_to_queue_options() {
    let storage = Arc::new(MemoryStorage::new());
    let config = Config::builder().default_channel(4).default_priority(9).build();
    let client = Client::with_config(storage, &config);

    let options = client.queue_options();
    assert_eq!(options.channel, 4);
    assert_eq!(options.priority, 9);

    client.queue("k", "store", "p", 60u64, &options).unwrap();
    assert_eq!(client.queue_count(Some(4)).unwrap(), 1);
    assert_eq!(client.clear_queue(Some(4)).unwrap(), 1);
}
