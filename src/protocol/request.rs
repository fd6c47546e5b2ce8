//! Request definitions
//!
//! One variant per storage operation.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::entry::{FreshnessFilter, QueueRequest, Tags};

/// A storage call sent over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Health check
    Ping,

    /// Server clock
    Now,

    Get { key: String, only_fresh: bool },
    GetByTag { tags: Tags, only_fresh: bool },

    Set {
        key: String,
        data: Bytes,
        fresh_for: u64,
        force: bool,
        tags: Tags,
    },
    Refresh { key: String, fresh_for: u64, force: bool },

    Queue(QueueRequest),
    GetJob { worker_id: String, channel: u32 },
    UpdateJobStatus {
        key: String,
        worker_id: String,
        new_queue_fresh_for: u64,
    },
    QueueCount { channel: Option<u32> },
    ClearQueue { channel: Option<u32> },

    CountAll { filter: FreshnessFilter },
    CountByTag { tags: Tags, filter: FreshnessFilter },

    Remove { key: String, force: bool },
    RemoveIfData { key: String, data: Bytes },
    RemoveAll { force: bool },
    RemoveByTag { tags: Tags, force: bool },

    Outdate { key: String, force: bool },
    OutdateAll { force: bool },
    OutdateByTag { tags: Tags, force: bool },

    Cleanup { outdated_for: u64 },
}

impl Request {
    /// Operation name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Now => "now",
            Request::Get { .. } => "get",
            Request::GetByTag { .. } => "get_by_tag",
            Request::Set { .. } => "set",
            Request::Refresh { .. } => "refresh",
            Request::Queue(_) => "queue",
            Request::GetJob { .. } => "get_job",
            Request::UpdateJobStatus { .. } => "update_job_status",
            Request::QueueCount { .. } => "queue_count",
            Request::ClearQueue { .. } => "clear_queue",
            Request::CountAll { .. } => "count_all",
            Request::CountByTag { .. } => "count_by_tag",
            Request::Remove { .. } => "remove",
            Request::RemoveIfData { .. } => "remove_if_data",
            Request::RemoveAll { .. } => "remove_all",
            Request::RemoveByTag { .. } => "remove_by_tag",
            Request::Outdate { .. } => "outdate",
            Request::OutdateAll { .. } => "outdate_all",
            Request::OutdateByTag { .. } => "outdate_by_tag",
            Request::Cleanup { .. } => "cleanup",
        }
    }
}
