//! Task handlers and their registry
//!
//! A task is looked up by name in a [`TaskRegistry`] built at startup. Handlers
//! implement [`Task`] and report a [`TaskOutcome`]; an `Err` is a plain failure.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;

use crate::entry::Job;
use crate::error::{CacheQueueError, Result};
use crate::storage::Storage;

use super::logger::TaskLogger;

/// What a handler asks the worker to do with its job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Store the value
    Value(Bytes),
    /// Keep the existing data and extend its freshness
    NoUpdate,
    /// Keep the job from being claimed again for the given seconds
    /// (default: the rest of its queue window)
    Bury(Option<u64>),
    /// Queue the job again, optionally with a new delay or freshness
    Requeue {
        delay: Option<u64>,
        fresh_for: Option<u64>,
    },
}

impl TaskOutcome {
    pub fn value(value: impl Into<Bytes>) -> Self {
        TaskOutcome::Value(value.into())
    }
}

/// Static per-task settings given at registration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskConfig(BTreeMap<String, String>);

impl TaskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Value of a setting the task cannot run without
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| CacheQueueError::MissingParameter(name.to_string()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TaskConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        TaskConfig(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// What a running handler can reach besides its own inputs
pub struct WorkerContext<'a> {
    storage: &'a dyn Storage,
    worker_id: &'a str,
    logger: &'a TaskLogger,
}

impl<'a> WorkerContext<'a> {
    pub(crate) fn new(storage: &'a dyn Storage, worker_id: &'a str, logger: &'a TaskLogger) -> Self {
        Self {
            storage,
            worker_id,
            logger,
        }
    }

    /// The store the worker runs against; handlers may cache or lock with it
    pub fn storage(&self) -> &'a dyn Storage {
        self.storage
    }

    pub fn worker_id(&self) -> &'a str {
        self.worker_id
    }

    pub fn logger(&self) -> &'a TaskLogger {
        self.logger
    }
}

/// A named unit of work
pub trait Task: Send + Sync {
    fn execute(
        &self,
        params: &Bytes,
        config: &TaskConfig,
        job: &Job,
        ctx: &WorkerContext<'_>,
    ) -> Result<TaskOutcome>;
}

/// Adapter running a closure as a [`Task`]
struct FnTask<F>(F);

impl<F> Task for FnTask<F>
where
    F: Fn(&Bytes, &TaskConfig, &Job, &WorkerContext<'_>) -> Result<TaskOutcome> + Send + Sync,
{
    fn execute(
        &self,
        params: &Bytes,
        config: &TaskConfig,
        job: &Job,
        ctx: &WorkerContext<'_>,
    ) -> Result<TaskOutcome> {
        (self.0)(params, config, job, ctx)
    }
}

struct Registered {
    task: Arc<dyn Task>,
    config: TaskConfig,
}

/// Task name to handler mapping, fixed before workers start
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Registered>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, task: impl Task + 'static) -> &mut Self {
        self.register_with_config(name, task, TaskConfig::default())
    }

    pub fn register_with_config(
        &mut self,
        name: impl Into<String>,
        task: impl Task + 'static,
        config: TaskConfig,
    ) -> &mut Self {
        self.tasks.insert(
            name.into(),
            Registered {
                task: Arc::new(task),
                config,
            },
        );
        self
    }

    /// Register a closure as a task
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Bytes, &TaskConfig, &Job, &WorkerContext<'_>) -> Result<TaskOutcome>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, FnTask(f))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Handler and settings for `name`
    pub fn resolve(&self, name: &str) -> Result<(&dyn Task, &TaskConfig)> {
        self.tasks
            .get(name)
            .map(|r| (r.task.as_ref(), &r.config))
            .ok_or_else(|| CacheQueueError::UnknownTask(name.to_string()))
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("TaskRegistry").field("tasks", &names).finish()
    }
}
