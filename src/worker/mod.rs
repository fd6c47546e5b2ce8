//! Worker and job lifecycle
//!
//! A [`Worker`] claims jobs from a [`Storage`] and runs them through the task
//! registered under the job's task name. The handler's [`TaskOutcome`] decides
//! what happens to the entry:
//!
//! | Outcome    | Entry (temp jobs are always deleted)                  |
//! |------------|-------------------------------------------------------|
//! | `Value`    | non-forced `set` of the value, claim cleared          |
//! | `NoUpdate` | non-forced `refresh`, claim cleared                   |
//! | `Bury`     | claim re-armed for the bury time, not queued          |
//! | `Requeue`  | claim cleared, forced `queue` with the job's settings |
//! | `Err`      | claim cleared, error returned                         |
//!
//! Claim bookkeeping always completes before the worker returns, so a job is
//! never left claimed because its handler failed.

mod builtin;
mod logger;
mod task;

use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::clock;
use crate::config::Config;
use crate::entry::{Job, QueueKey, QueueRequest, Tags, DEFAULT_PRIORITY};
use crate::error::{CacheQueueError, Result};
use crate::storage::Storage;

pub use builtin::{register_builtin, RefreshTask, StoreTask};
pub use logger::{LogMask, TaskLogger};
pub use task::{Task, TaskConfig, TaskOutcome, TaskRegistry, WorkerContext};

/// Final state of a worked job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The handler produced a value
    Completed(Bytes),
    /// The handler kept the existing data (carried here when there was any)
    Refreshed(Option<Bytes>),
    /// Reclaiming is suppressed for `seconds`
    Buried { seconds: u64 },
    /// The job was queued again
    Requeued { delay: u64, fresh_for: u64 },
}

impl JobOutcome {
    /// Data the caller sees, or the bury/requeue signal as an error
    pub fn into_data(self, key: Option<&str>) -> Result<Option<Bytes>> {
        match self {
            JobOutcome::Completed(value) => Ok(Some(value)),
            JobOutcome::Refreshed(data) => Ok(data),
            JobOutcome::Buried { seconds } => Err(CacheQueueError::Buried {
                key: key.map(str::to_string),
                seconds: Some(seconds),
            }),
            JobOutcome::Requeued { delay, fresh_for } => Err(CacheQueueError::Requeued {
                key: key.map(str::to_string),
                delay: Some(delay),
                fresh_for: Some(fresh_for),
            }),
        }
    }
}

/// Executes jobs against a shared store
pub struct Worker {
    storage: Arc<dyn Storage>,
    registry: Arc<TaskRegistry>,
    worker_id: String,
    logger: TaskLogger,
}

impl Worker {
    /// A worker with a random id
    pub fn new(storage: Arc<dyn Storage>, registry: impl Into<Arc<TaskRegistry>>) -> Self {
        let worker_id = Uuid::new_v4().to_string();
        Self {
            storage,
            registry: registry.into(),
            logger: TaskLogger::new(worker_id.clone(), LogMask::ALL),
            worker_id,
        }
    }

    /// Use an explicit worker id
    pub fn with_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self.logger = TaskLogger::new(self.worker_id.clone(), self.logger.mask());
        self
    }

    /// Filter the messages handlers log
    pub fn with_log_mask(mut self, mask: LogMask) -> Self {
        self.logger = TaskLogger::new(self.worker_id.clone(), mask);
        self
    }

    /// Apply the worker settings of `config`
    pub fn with_config(self, config: &Config) -> Self {
        self.with_log_mask(config.log_mask)
    }

    pub fn id(&self) -> &str {
        &self.worker_id
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn logger(&self) -> &TaskLogger {
        &self.logger
    }

    /// Claim the next job of `channel`
    pub fn get_job(&self, channel: u32) -> Result<Option<Job>> {
        self.storage.get_job(&self.worker_id, channel)
    }

    /// Claim and work one job; `None` when nothing was eligible
    pub fn work_next(&self, channel: u32) -> Result<Option<JobOutcome>> {
        match self.get_job(channel)? {
            Some(job) => self.work(&job).map(Some),
            None => Ok(None),
        }
    }

    /// A job that exists only for one direct run: no key, nothing persisted
    pub fn ephemeral_job(&self, task: &str, params: Bytes) -> Job {
        Job {
            key: None,
            fresh_until: 0,
            fresh_for: 0,
            tags: Tags::new(),
            task: task.to_string(),
            params,
            data: None,
            channel: 1,
            priority: DEFAULT_PRIORITY,
            temp: true,
            worker_id: self.worker_id.clone(),
        }
    }

    /// Run the handler registered for `task`, no storage bookkeeping
    pub fn execute_task(&self, task: &str, params: &Bytes, job: &Job) -> Result<TaskOutcome> {
        let (handler, config) = self.registry.resolve(task)?;
        let ctx = WorkerContext::new(self.storage.as_ref(), &self.worker_id, &self.logger);
        handler.execute(params, config, job, &ctx)
    }

    /// Run `job` and apply its outcome to the store
    pub fn work(&self, job: &Job) -> Result<JobOutcome> {
        self.logger
            .log_debug(format_args!("working {:?} (task {})", job.key, job.task));

        let result = self.execute_task(&job.task, &job.params, job);
        let remaining = clock::seconds_between(self.storage.now()?, job.fresh_until);

        match result {
            Ok(TaskOutcome::Value(value)) => {
                if let Some(key) = self.persistent_key(job)? {
                    self.storage.set(key, value.clone(), remaining, false, &job.tags)?;
                    self.release_claim(key, job)?;
                }
                Ok(JobOutcome::Completed(value))
            }
            Ok(TaskOutcome::NoUpdate) => {
                if let Some(key) = self.persistent_key(job)? {
                    self.storage.refresh(key, remaining, false)?;
                    self.release_claim(key, job)?;
                }
                Ok(JobOutcome::Refreshed(job.data.clone()))
            }
            Ok(TaskOutcome::Bury(seconds)) => {
                let seconds = seconds.unwrap_or(remaining);
                if let Some(key) = self.persistent_key(job)? {
                    self.storage.update_job_status(key, &job.worker_id, seconds)?;
                }
                self.logger
                    .log_notice(format_args!("buried {:?} for {}s", job.key, seconds));
                Ok(JobOutcome::Buried { seconds })
            }
            Ok(TaskOutcome::Requeue { delay, fresh_for }) => {
                let delay = delay.unwrap_or(remaining);
                let fresh_for = fresh_for.unwrap_or(job.fresh_for);
                if let Some(key) = self.persistent_key(job)? {
                    self.release_claim(key, job)?;
                }

                let target = match (&job.key, job.temp) {
                    (Some(key), false) => QueueKey::Key(key.clone()),
                    _ => QueueKey::Temporary,
                };
                let request = QueueRequest::new(target, job.task.clone(), job.params.clone())
                    .fresh_for(fresh_for)
                    .force(true)
                    .tags(job.tags.clone())
                    .priority(job.priority)
                    .delay(delay)
                    .channel(job.channel);
                self.storage.queue(&request)?;

                self.logger
                    .log_notice(format_args!("requeued {:?} in {}s", job.key, delay));
                Ok(JobOutcome::Requeued { delay, fresh_for })
            }
            Err(err) => {
                self.logger.log_exception(&err);
                if let Some(key) = self.persistent_key(job)? {
                    self.release_claim(key, job)?;
                }
                Err(err)
            }
        }
    }

    /// Key to write the outcome to; temp entries are deleted here and yield `None`
    fn persistent_key<'j>(&self, job: &'j Job) -> Result<Option<&'j str>> {
        match job.key.as_deref() {
            Some(key) if job.temp => {
                self.storage.remove(key, true)?;
                Ok(None)
            }
            key => Ok(key),
        }
    }

    fn release_claim(&self, key: &str, job: &Job) -> Result<()> {
        self.storage.update_job_status(key, &job.worker_id, 0)?;
        Ok(())
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("worker_id", &self.worker_id)
            .field("registry", &self.registry)
            .finish()
    }
}
