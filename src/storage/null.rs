//! Storage that keeps nothing
//!
//! Every write reports success without storing, every read finds nothing. Useful to
//! switch caching off without touching call sites.

use bytes::Bytes;

use crate::clock::{Clock, SystemClock};
use crate::entry::{EntrySnapshot, FreshnessFilter, Job, QueueRequest, Tags};
use crate::error::Result;

use super::{check_channel, Storage};

#[derive(Debug, Default, Clone, Copy)]
pub struct NullStorage;

impl NullStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Storage for NullStorage {
    fn now(&self) -> Result<i64> {
        Ok(SystemClock.now())
    }

    fn get(&self, _key: &str, _only_fresh: bool) -> Result<Option<EntrySnapshot>> {
        Ok(None)
    }

    fn get_by_tag(&self, _tags: &Tags, _only_fresh: bool) -> Result<Vec<EntrySnapshot>> {
        Ok(Vec::new())
    }

    fn set(&self, _key: &str, _data: Bytes, _fresh_for: u64, _force: bool, _tags: &Tags) -> Result<bool> {
        Ok(true)
    }

    fn refresh(&self, _key: &str, _fresh_for: u64, _force: bool) -> Result<bool> {
        Ok(false)
    }

    fn queue(&self, request: &QueueRequest) -> Result<Option<String>> {
        check_channel(request.channel)?;
        Ok(None)
    }

    fn get_job(&self, _worker_id: &str, channel: u32) -> Result<Option<Job>> {
        check_channel(channel)?;
        Ok(None)
    }

    fn update_job_status(&self, _key: &str, _worker_id: &str, _new_queue_fresh_for: u64) -> Result<bool> {
        Ok(false)
    }

    fn queue_count(&self, _channel: Option<u32>) -> Result<u64> {
        Ok(0)
    }

    fn clear_queue(&self, _channel: Option<u32>) -> Result<u64> {
        Ok(0)
    }

    fn count_all(&self, _filter: FreshnessFilter) -> Result<u64> {
        Ok(0)
    }

    fn count_by_tag(&self, _tags: &Tags, _filter: FreshnessFilter) -> Result<u64> {
        Ok(0)
    }

    fn remove(&self, _key: &str, _force: bool) -> Result<bool> {
        Ok(false)
    }

    fn remove_if_data(&self, _key: &str, _data: &Bytes) -> Result<bool> {
        Ok(false)
    }

    fn remove_all(&self, _force: bool) -> Result<u64> {
        Ok(0)
    }

    fn remove_by_tag(&self, _tags: &Tags, _force: bool) -> Result<u64> {
        Ok(0)
    }

    fn outdate(&self, _key: &str, _force: bool) -> Result<bool> {
        Ok(false)
    }

    fn outdate_all(&self, _force: bool) -> Result<u64> {
        Ok(0)
    }

    fn outdate_by_tag(&self, _tags: &Tags, _force: bool) -> Result<u64> {
        Ok(0)
    }

    fn cleanup(&self, _outdated_for: u64) -> Result<u64> {
        Ok(0)
    }
}
