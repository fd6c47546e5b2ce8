//! Built-in tasks

use bytes::Bytes;

use crate::entry::Job;
use crate::error::Result;

use super::task::{Task, TaskConfig, TaskOutcome, TaskRegistry, WorkerContext};

/// Stores its params as the entry's data
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreTask;

impl Task for StoreTask {
    fn execute(
        &self,
        params: &Bytes,
        _config: &TaskConfig,
        _job: &Job,
        _ctx: &WorkerContext<'_>,
    ) -> Result<TaskOutcome> {
        Ok(TaskOutcome::Value(params.clone()))
    }
}

/// Keeps the data and extends its freshness
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshTask;

impl Task for RefreshTask {
    fn execute(
        &self,
        _params: &Bytes,
        _config: &TaskConfig,
        job: &Job,
        ctx: &WorkerContext<'_>,
    ) -> Result<TaskOutcome> {
        ctx.logger()
            .log_debug(format_args!("refreshing {}", job.key.as_deref().unwrap_or("<ephemeral>")));
        Ok(TaskOutcome::NoUpdate)
    }
}

/// Register `store` and `refresh`
pub fn register_builtin(registry: &mut TaskRegistry) -> &mut TaskRegistry {
    registry.register("store", StoreTask).register("refresh", RefreshTask)
}
