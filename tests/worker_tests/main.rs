//! Tests for the worker and job lifecycle
//!
//! These tests verify:
//! - Each task outcome leaves the entry in the expected state
//! - Claims are always cleared, also when the handler fails
//! - Temporary jobs disappear after their run
//! - Bury and requeue timing against a manual clock

use std::sync::Arc;

use bytes::Bytes;
use cachequeue::worker::{register_builtin, LogMask};
use cachequeue::{
    tags, CacheQueueError, Config, Job, JobOutcome, ManualClock, MemoryStorage, QueueKey, QueueRequest,
    Result, Storage, Tags, Task, TaskConfig, TaskOutcome, TaskRegistry, Worker, WorkerContext,
};

// =============================================================================
// Helper Functions
// =============================================================================

const START: i64 = 1_700_000_000;

fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    register_builtin(&mut registry);
    registry
        .register_fn("bury", |_, _, _, _| Ok(TaskOutcome::Bury(Some(120))))
        .register_fn("bury_default", |_, _, _, _| Ok(TaskOutcome::Bury(None)))
        .register_fn("requeue", |_, _, _, _| {
            Ok(TaskOutcome::Requeue {
                delay: Some(30),
                fresh_for: None,
            })
        })
        .register_fn("fail", |_, _, job, _| {
            Err(CacheQueueError::task(job.task.clone(), "upstream unavailable"))
        })
        .register_fn("peek", |_, _, job, ctx| {
            let key = job.key.as_deref().unwrap_or_default();
            let seen = ctx.storage().get(key, false)?.is_some();
            Ok(TaskOutcome::value(if seen { "seen" } else { "unseen" }))
        });
    registry.register("greet", GreetTask);
    registry
}

/// Needs a `greeting` setting from its registration
struct GreetTask;

impl Task for GreetTask {
    fn execute(
        &self,
        params: &Bytes,
        config: &TaskConfig,
        _job: &Job,
        _ctx: &WorkerContext<'_>,
    ) -> Result<TaskOutcome> {
        let greeting = config.require("greeting")?;
        Ok(TaskOutcome::value(format!(
            "{}, {}",
            greeting,
            String::from_utf8_lossy(params)
        )))
    }
}

fn setup() -> (Arc<MemoryStorage>, ManualClock, Worker) {
    let clock = ManualClock::new(START);
    let storage = Arc::new(MemoryStorage::with_clock(clock.clone()));
    let worker = Worker::new(storage.clone(), registry()).with_id("worker-1");
    (storage, clock, worker)
}

fn queue(storage: &MemoryStorage, key: &str, task: &str, fresh_for: u64) {
    let request = QueueRequest::new(key, task, "params")
        .fresh_for(fresh_for)
        .tags(tags(["job"]));
    assert!(storage.queue(&request).unwrap().is_some());
}

// =============================================================================
// Outcome Tests
// =============================================================================

#[test]
fn test_value_outcome_stores_data_and_clears_claim() {
    let (storage, _clock, worker) = setup();
    queue(&storage, "a", "store", 60);

    let outcome = worker.work_next(1).unwrap().unwrap();
    assert_eq!(outcome, JobOutcome::Completed(Bytes::from("params")));

    let entry = storage.get("a", true).unwrap().unwrap();
    assert_eq!(entry.data, Some(Bytes::from("params")));
    assert_eq!(entry.fresh_until, START + 60);
    assert_eq!(entry.tags, tags(["job"]));
    assert!(!entry.queue_is_fresh);
    assert_eq!(storage.queue_count(None).unwrap(), 0);
}

#[test]
fn test_no_update_refreshes_existing_data() {
    let (storage, clock, worker) = setup();
    storage.set("a", Bytes::from("old"), 10, false, &Tags::new()).unwrap();
    clock.advance(20);
    queue(&storage, "a", "refresh", 60);

    let outcome = worker.work_next(1).unwrap().unwrap();
    assert_eq!(outcome, JobOutcome::Refreshed(Some(Bytes::from("old"))));

    let entry = storage.get("a", true).unwrap().unwrap();
    assert_eq!(entry.data, Some(Bytes::from("old")));
    assert_eq!(entry.fresh_until, START + 20 + 60);
}

#[test]
fn test_failure_clears_claim_and_surfaces_error() {
    let (storage, _clock, worker) = setup();
    queue(&storage, "a", "fail", 60);

    let err = worker.work_next(1).unwrap_err();
    assert!(matches!(err, CacheQueueError::Task { ref message, .. } if message == "upstream unavailable"));

    // Claim released: the key can be queued again right away
    let entry = storage.get("a", false).unwrap().unwrap();
    assert!(!entry.queue_is_fresh);
    assert!(storage.queue(&QueueRequest::new("a", "fail", "p")).unwrap().is_some());
}

#[test]
fn test_unknown_task_clears_claim() {
    let (storage, _clock, worker) = setup();
    queue(&storage, "a", "missing", 60);

    let err = worker.work_next(1).unwrap_err();
    assert!(matches!(err, CacheQueueError::UnknownTask(ref name) if name == "missing"));
    assert!(!storage.get("a", false).unwrap().unwrap().queue_is_fresh);
}

#[test]
fn test_task_config_reaches_handler() {
    let clock = ManualClock::new(START);
    let storage = Arc::new(MemoryStorage::with_clock(clock));
    let mut registry = TaskRegistry::new();
    registry.register_with_config(
        "greet",
        GreetTask,
        TaskConfig::new().with("greeting", "hello"),
    );
    let worker = Worker::new(storage.clone(), registry);
    queue(&storage, "g", "greet", 60);

    let outcome = worker.work_next(1).unwrap().unwrap();
    assert_eq!(outcome, JobOutcome::Completed(Bytes::from("hello, params")));
}

#[test]
fn test_missing_config_is_configuration_error() {
    let (_storage, _clock, worker) = setup();
    let job = worker.ephemeral_job("greet", Bytes::from("x"));

    let err = worker.work(&job).unwrap_err();
    assert!(matches!(err, CacheQueueError::MissingParameter(ref name) if name == "greeting"));
    assert!(err.is_configuration());
}

#[test]
fn test_handler_sees_storage_through_context() {
    let (storage, _clock, worker) = setup();
    queue(&storage, "p", "peek", 60);

    let outcome = worker.work_next(1).unwrap().unwrap();
    assert_eq!(outcome, JobOutcome::Completed(Bytes::from("seen")));
}

// =============================================================================
// Bury and Requeue Tests
// =============================================================================

#[test]
fn test_bury_blocks_requeue_until_lapsed() {
    let (storage, clock, worker) = setup();
    queue(&storage, "a", "bury", 60);

    let outcome = worker.work_next(1).unwrap().unwrap();
    assert_eq!(outcome, JobOutcome::Buried { seconds: 120 });

    let entry = storage.get("a", false).unwrap().unwrap();
    assert_eq!(entry.queue_fresh_until, START + 120);
    assert!(worker.work_next(1).unwrap().is_none());

    clock.advance(100);
    assert!(storage.queue(&QueueRequest::new("a", "store", "p")).unwrap().is_none());

    clock.advance(21);
    assert!(storage.queue(&QueueRequest::new("a", "store", "p")).unwrap().is_some());
}

#[test]
fn test_bury_defaults_to_rest_of_window() {
    let (storage, clock, worker) = setup();
    queue(&storage, "a", "bury_default", 90);
    clock.advance(30);

    let outcome = worker.work_next(1).unwrap().unwrap();
    assert_eq!(outcome, JobOutcome::Buried { seconds: 60 });
}

#[test]
fn test_requeue_with_delay() {
    let (storage, clock, worker) = setup();
    let request = QueueRequest::new("a", "requeue", "params")
        .fresh_for(45)
        .priority(20)
        .channel(3);
    storage.queue(&request).unwrap();

    let outcome = worker.work_next(3).unwrap().unwrap();
    assert_eq!(outcome, JobOutcome::Requeued { delay: 30, fresh_for: 45 });
    assert_eq!(storage.queue_count(Some(3)).unwrap(), 1);

    // Not eligible before the delay has passed
    assert!(worker.work_next(3).unwrap().is_none());
    clock.advance(30);
    let job = worker.get_job(3).unwrap().unwrap();
    assert_eq!(job.key.as_deref(), Some("a"));
    assert_eq!(job.priority, 20);
    assert_eq!(job.fresh_until, START + 30 + 45);
}

#[test]
fn test_outcome_signals_as_errors() {
    let err = JobOutcome::Buried { seconds: 5 }.into_data(Some("k")).unwrap_err();
    assert!(err.is_signal());
    assert!(matches!(err, CacheQueueError::Buried { seconds: Some(5), .. }));

    let data = JobOutcome::Refreshed(None).into_data(None).unwrap();
    assert_eq!(data, None);
}

// =============================================================================
// Temporary Job Tests
// =============================================================================

#[test]
fn test_temporary_job_removed_after_run() {
    let (storage, _clock, worker) = setup();
    let key = storage
        .queue(&QueueRequest::new(QueueKey::Temporary, "store", "once"))
        .unwrap()
        .unwrap();

    let outcome = worker.work_next(1).unwrap().unwrap();
    assert_eq!(outcome, JobOutcome::Completed(Bytes::from("once")));
    assert!(storage.get(&key, false).unwrap().is_none());
    assert!(storage.is_empty());
}

#[test]
fn test_temporary_job_removed_after_failure() {
    let (storage, _clock, worker) = setup();
    storage
        .queue(&QueueRequest::new(QueueKey::Temporary, "fail", "once"))
        .unwrap();

    assert!(worker.work_next(1).is_err());
    assert!(storage.is_empty());
}

#[test]
fn test_requeued_temporary_job_gets_new_key() {
    let (storage, clock, worker) = setup();
    let first = storage
        .queue(&QueueRequest::new(QueueKey::Temporary, "requeue", "again"))
        .unwrap()
        .unwrap();

    worker.work_next(1).unwrap().unwrap();
    assert!(storage.get(&first, false).unwrap().is_none());
    assert_eq!(storage.queue_count(Some(1)).unwrap(), 1);

    clock.advance(30);
    let job = worker.get_job(1).unwrap().unwrap();
    assert!(job.temp);
    assert_ne!(job.key.as_deref(), Some(first.as_str()));
}

// =============================================================================
// Ephemeral Runs
// =============================================================================

#[test]
fn test_ephemeral_job_touches_no_storage() {
    let (storage, _clock, worker) = setup();
    let job = worker.ephemeral_job("store", Bytes::from("direct"));

    let outcome = worker.work(&job).unwrap();

    assert_eq!(outcome, JobOutcome::Completed(Bytes::from("direct")));
    assert!(storage.is_empty());
}

#[test]
fn test_log_mask_from_config() {
    let (_storage, _clock, worker) = setup();
    let config = Config::builder().log_mask(LogMask::ERROR).build();

    let worker = worker.with_config(&config);

    assert!(worker.logger().enabled(LogMask::ERROR));
    assert!(!worker.logger().enabled(LogMask::DEBUG));
    assert_eq!(worker.id(), "worker-1");
}

#[test]
fn test_work_next_on_empty_queue() {
    let (_storage, _clock, worker) = setup();
    assert!(worker.work_next(1).unwrap().is_none());
}
