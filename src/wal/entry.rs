//! WAL Entry definitions
//!
//! Defines the structure of individual WAL records and their byte encoding.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::entry::Entry;
use crate::error::{CacheQueueError, Result};

/// Record header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Upper bound for a single record body (64 MB)
pub const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

/// A single record in the WAL
#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The mutations committed together
    pub operations: Vec<Operation>,

    /// Timestamp (unix millis) when the record was created
    pub timestamp: u64,
}

/// Mutations that can be logged
///
/// Operations carry resulting state, not intent, so replay never depends on the
/// clock at replay time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Store the full entry under its key
    Put { entry: Entry },

    /// Delete a key
    Delete { key: String },
}

impl Operation {
    pub fn key(&self) -> &str {
        match self {
            Operation::Put { entry } => &entry.key,
            Operation::Delete { key } => key,
        }
    }
}

impl WalEntry {
    pub fn new(lsn: u64, operations: Vec<Operation>) -> Self {
        Self {
            lsn,
            operations,
            timestamp: now_millis(),
        }
    }

    /// Encode as `[lsn][crc][len][data]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Self::encode(self.lsn, self.timestamp, &self.operations)
    }

    pub(crate) fn encode(lsn: u64, timestamp: u64, operations: &[Operation]) -> Result<Vec<u8>> {
        let data = bincode::serialize(&(timestamp, operations))?;
        if data.len() > MAX_RECORD_SIZE as usize {
            return Err(CacheQueueError::WalWrite(format!(
                "Record too large: {} bytes (max {})",
                data.len(),
                MAX_RECORD_SIZE
            )));
        }

        let mut bytes = Vec::with_capacity(HEADER_SIZE + data.len());
        bytes.extend_from_slice(&lsn.to_le_bytes());
        bytes.extend_from_slice(&crc32fast::hash(&data).to_le_bytes());
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&data);
        Ok(bytes)
    }

    /// Decode one record from the front of `bytes`
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn deserialize(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < HEADER_SIZE {
            return Err(CacheQueueError::WalCorruption(format!(
                "Incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        let (lsn, crc, len) = Self::parse_header(&bytes[..HEADER_SIZE])?;
        let end = HEADER_SIZE + len as usize;
        if bytes.len() < end {
            return Err(CacheQueueError::WalCorruption(format!(
                "Incomplete record {}: expected {} bytes, got {}",
                lsn,
                end,
                bytes.len()
            )));
        }
        let entry = Self::decode_body(lsn, crc, &bytes[HEADER_SIZE..end])?;
        Ok((entry, end))
    }

    /// Split a header into `(lsn, crc, len)`
    pub(crate) fn parse_header(header: &[u8]) -> Result<(u64, u32, u32)> {
        let mut lsn = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        lsn.copy_from_slice(&header[0..8]);
        crc.copy_from_slice(&header[8..12]);
        len.copy_from_slice(&header[12..16]);

        let len = u32::from_le_bytes(len);
        if len > MAX_RECORD_SIZE {
            return Err(CacheQueueError::WalCorruption(format!(
                "Record length {} exceeds maximum {}",
                len, MAX_RECORD_SIZE
            )));
        }
        Ok((u64::from_le_bytes(lsn), u32::from_le_bytes(crc), len))
    }

    /// Verify the checksum and decode the body
    pub(crate) fn decode_body(lsn: u64, crc: u32, data: &[u8]) -> Result<Self> {
        let actual = crc32fast::hash(data);
        if actual != crc {
            return Err(CacheQueueError::WalCorruption(format!(
                "CRC mismatch in record {}: stored {:08x}, computed {:08x}",
                lsn, crc, actual
            )));
        }
        let (timestamp, operations): (u64, Vec<Operation>) = bincode::deserialize(data)
            .map_err(|e| CacheQueueError::WalCorruption(format!("Record {}: {}", lsn, e)))?;
        Ok(Self {
            lsn,
            operations,
            timestamp,
        })
    }
}

/// Wall-clock unix millis for record timestamps
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
