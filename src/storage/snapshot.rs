//! Snapshot files
//!
//! A snapshot is a full image of the entry table at a WAL position. Writing one
//! lets the WAL be truncated; on open the snapshot is loaded first and only WAL
//! records with a greater LSN are replayed.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (22 bytes)                                            │
//! │   Magic: "CQSN" (4) | Version: u16 (2) | Count: u64 (8)      │
//! │   LastLsn: u64 (8)                                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Body: bincode Vec<Entry> (variable)                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Footer (4 bytes)                                             │
//! │   BodyCRC: u32                                               │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::entry::Entry;
use crate::error::{CacheQueueError, Result};

use super::table::EntryTable;

/// Magic bytes identifying a snapshot file
const MAGIC: &[u8; 4] = b"CQSN";

/// Current snapshot format version
const VERSION: u16 = 1;

/// Magic (4) + Version (2) + Count (8) + LastLsn (8)
const HEADER_SIZE: usize = 22;

/// Body CRC
const FOOTER_SIZE: usize = 4;

/// Decoded snapshot file
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// WAL position the image corresponds to
    pub last_lsn: u64,
    pub entries: Vec<Entry>,
}

impl Snapshot {
    /// Write an image of `table` taken at `last_lsn`
    ///
    /// The file is written next to `path` and renamed into place, so a crash
    /// leaves either the old or the new snapshot.
    pub fn write(path: &Path, table: &EntryTable, last_lsn: u64) -> Result<u64> {
        let entries: Vec<&Entry> = table.entries().collect();
        let body = bincode::serialize(&entries)?;

        let tmp_path = path.with_extension("tmp");
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut writer = BufWriter::new(file);

            writer.write_all(MAGIC)?;
            writer.write_all(&VERSION.to_le_bytes())?;
            writer.write_all(&(entries.len() as u64).to_le_bytes())?;
            writer.write_all(&last_lsn.to_le_bytes())?;
            writer.write_all(&body)?;
            writer.write_all(&crc32fast::hash(&body).to_le_bytes())?;
            writer.flush()?;

            let file = writer.into_inner().map_err(|e| {
                CacheQueueError::Storage(format!("Failed to flush snapshot: {}", e))
            })?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        Ok((HEADER_SIZE + body.len() + FOOTER_SIZE) as u64)
    }

    /// Read and validate a snapshot file
    pub fn read(path: &Path) -> Result<Self> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;

        if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(CacheQueueError::Storage(format!(
                "Snapshot too short: {} bytes",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(CacheQueueError::Storage(format!(
                "Invalid snapshot magic: expected CQSN, got {:?}",
                &bytes[0..4]
            )));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(CacheQueueError::Storage(format!(
                "Unsupported snapshot version: {}",
                version
            )));
        }

        let count = read_u64(&bytes[6..14]);
        let last_lsn = read_u64(&bytes[14..22]);

        let body_end = bytes.len() - FOOTER_SIZE;
        let body = &bytes[HEADER_SIZE..body_end];
        let stored_crc = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        if crc32fast::hash(body) != stored_crc {
            return Err(CacheQueueError::Storage(
                "Snapshot checksum mismatch".to_string(),
            ));
        }

        let entries: Vec<Entry> = bincode::deserialize(body)?;
        if entries.len() as u64 != count {
            return Err(CacheQueueError::Storage(format!(
                "Snapshot entry count mismatch: header says {}, body has {}",
                count,
                entries.len()
            )));
        }

        Ok(Self { last_lsn, entries })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}
