//! WAL Writer
//!
//! Handles appending records to the WAL file.
//!
//! A record either lands whole or not at all: when an append fails part way, the
//! log is cut back to the end of the last complete record so later records are
//! never written behind a torn one.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{CacheQueueError, Result};

use super::entry::now_millis;
use super::{Operation, WalEntry, WalRecovery};

/// Destination of WAL bytes; the log file outside of tests
pub trait WalSink: Write {
    /// Current length in bytes
    fn byte_len(&self) -> io::Result<u64>;

    /// Cut (or extend) to `len` bytes; later writes go to the new end
    fn set_len(&self, len: u64) -> io::Result<()>;

    fn sync_data(&self) -> io::Result<()>;
}

impl WalSink for File {
    fn byte_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn sync_data(&self) -> io::Result<()> {
        File::sync_data(self)
    }
}

/// Writes records to the WAL file
pub struct WalWriter<S: WalSink = File> {
    path: PathBuf,
    sink: S,
    /// Length of the log up to the end of the last complete record
    committed_len: u64,
    /// Set when a failed append could not be rolled back
    broken: bool,
    /// LSN the next record will get
    next_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Records written since the last fsync
    unsynced: usize,
    /// Records written since the last truncate
    records: u64,
}

impl WalWriter<File> {
    /// Open or create a WAL file
    ///
    /// Appends after the existing content; the next LSN continues from the last
    /// valid record found in the file.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let next_lsn = if path.exists() {
            WalRecovery::verify(path)?.last_lsn + 1
        } else {
            1
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let mut writer = Self::with_sink(file, sync_strategy)?;
        writer.path = path.to_path_buf();
        writer.next_lsn = next_lsn;
        Ok(writer)
    }
}

impl<S: WalSink> WalWriter<S> {
    /// Write to an already opened sink, appending after its content
    pub fn with_sink(sink: S, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let committed_len = sink.byte_len()?;
        Ok(Self {
            path: PathBuf::new(),
            sink,
            committed_len,
            broken: false,
            next_lsn: 1,
            sync_strategy,
            unsynced: 0,
            records: 0,
        })
    }

    /// Make sure future LSNs are greater than `lsn`
    pub fn starting_after(mut self, lsn: u64) -> Self {
        self.next_lsn = self.next_lsn.max(lsn + 1);
        self
    }

    /// Append one record holding `operations`, returns its LSN
    pub fn append(&mut self, operations: &[Operation]) -> Result<u64> {
        if self.broken {
            return Err(CacheQueueError::WalWrite(
                "log has a torn record that could not be removed".to_string(),
            ));
        }

        let lsn = self.next_lsn;
        let bytes = WalEntry::encode(lsn, now_millis(), operations)?;

        let written = self.sink.write_all(&bytes).and_then(|()| self.sink.flush());
        if let Err(e) = written {
            self.roll_back();
            return Err(CacheQueueError::WalWrite(format!("record {}: {}", lsn, e)));
        }

        self.committed_len += bytes.len() as u64;
        self.next_lsn += 1;
        self.records += 1;
        self.unsynced += 1;

        let must_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count.max(1),
        };
        if must_sync {
            self.sync()?;
        }

        Ok(lsn)
    }

    /// Drop the bytes of a partially written record
    fn roll_back(&mut self) {
        if let Err(e) = self.sink.set_len(self.committed_len) {
            tracing::error!(
                path = %self.path.display(),
                error = %e,
                "Could not remove torn WAL record, refusing further writes"
            );
            self.broken = true;
        }
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.sink.flush()?;
        self.sink.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Drop all records (after their effects were checkpointed)
    ///
    /// LSNs keep increasing across truncation.
    pub fn truncate(&mut self) -> Result<()> {
        self.sink.flush()?;
        self.sink.set_len(0)?;
        self.sink.sync_data()?;
        self.committed_len = 0;
        self.broken = false;
        self.unsynced = 0;
        self.records = 0;
        Ok(())
    }

    /// LSN of the last record written, 0 if none
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn - 1
    }

    /// Records appended since open or the last truncate
    pub fn record_count(&self) -> u64 {
        self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
