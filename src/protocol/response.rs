//! Response definitions
//!
//! Represents answers to requests.

use serde::{Deserialize, Serialize};

use crate::entry::{EntrySnapshot, Job};
use crate::error::{CacheQueueError, Result};

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    Error = 0x02,
}

impl Status {
    /// Parse a status byte
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(Status::Ok),
            0x02 => Ok(Status::Error),
            _ => Err(CacheQueueError::Protocol(format!(
                "Unknown response status: 0x{:02x}",
                byte
            ))),
        }
    }
}

/// A typed answer to a [`Request`](super::Request)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Pong,
    Time(i64),
    Entry(Option<EntrySnapshot>),
    Entries(Vec<EntrySnapshot>),
    /// Whether a single-key write happened
    Flag(bool),
    /// Number of entries counted or affected
    Count(u64),
    /// Key written by a queue call
    Key(Option<String>),
    Job(Option<Job>),
    /// The operation failed on the server
    Error(String),
}

impl Response {
    /// Create an ERROR response
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(message.into())
    }

    pub fn status(&self) -> Status {
        match self {
            Response::Error(_) => Status::Error,
            _ => Status::Ok,
        }
    }

    pub fn into_pong(self) -> Result<()> {
        match self {
            Response::Pong => Ok(()),
            other => Err(other.unexpected("pong")),
        }
    }

    pub fn into_time(self) -> Result<i64> {
        match self {
            Response::Time(now) => Ok(now),
            other => Err(other.unexpected("time")),
        }
    }

    pub fn into_entry(self) -> Result<Option<EntrySnapshot>> {
        match self {
            Response::Entry(entry) => Ok(entry),
            other => Err(other.unexpected("entry")),
        }
    }

    pub fn into_entries(self) -> Result<Vec<EntrySnapshot>> {
        match self {
            Response::Entries(entries) => Ok(entries),
            other => Err(other.unexpected("entries")),
        }
    }

    pub fn into_flag(self) -> Result<bool> {
        match self {
            Response::Flag(flag) => Ok(flag),
            other => Err(other.unexpected("flag")),
        }
    }

    pub fn into_count(self) -> Result<u64> {
        match self {
            Response::Count(count) => Ok(count),
            other => Err(other.unexpected("count")),
        }
    }

    pub fn into_key(self) -> Result<Option<String>> {
        match self {
            Response::Key(key) => Ok(key),
            other => Err(other.unexpected("key")),
        }
    }

    pub fn into_job(self) -> Result<Option<Job>> {
        match self {
            Response::Job(job) => Ok(job),
            other => Err(other.unexpected("job")),
        }
    }

    /// Server errors pass through; anything else is a protocol mismatch
    fn unexpected(self, expected: &str) -> CacheQueueError {
        match self {
            Response::Error(message) => CacheQueueError::Remote(message),
            other => CacheQueueError::Protocol(format!(
                "Expected {} response, got {:?}",
                expected, other
            )),
        }
    }
}
