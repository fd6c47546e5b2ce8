//! Durable storage
//!
//! [`DurableStorage`] is a [`TableStorage`] whose change log is the WAL.
//!
//! ## Write path
//! 1. Acquire the table write lock and decide the operations
//! 2. Append them as one WAL record (durability guarantee)
//! 3. Apply them to the table
//! 4. Every `checkpoint_threshold` records, write a snapshot and truncate the WAL
//!
//! ## Open
//! 1. Load `snapshot.bin` if present
//! 2. Replay WAL records newer than the snapshot, dropping a torn tail
//! 3. Checkpoint what was replayed so the WAL starts out empty

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{CacheQueueError, Result};
use crate::wal::{Operation, WalRecovery, WalWriter};

use super::local::{ChangeLog, TableStorage};
use super::snapshot::Snapshot;
use super::table::EntryTable;

/// Storage that survives restarts
pub type DurableStorage = TableStorage<WalLog>;

/// Change log backed by the write-ahead log and snapshot files
pub struct WalLog {
    wal: Mutex<WalWriter>,
    snapshot_path: PathBuf,
    data_dir: PathBuf,
    checkpoint_threshold: u64,
}

impl WalLog {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";
    const SNAPSHOT_FILENAME: &'static str = "snapshot.bin";

    /// Write a snapshot of `table` and truncate the WAL
    ///
    /// Called with the table lock held so no record can slip in between.
    fn checkpoint(&self, table: &EntryTable) -> Result<()> {
        let mut wal = self.wal.lock();
        let lsn = wal.current_lsn();
        let bytes = Snapshot::write(&self.snapshot_path, table, lsn)?;
        wal.truncate()?;
        tracing::info!(lsn, entries = table.len(), bytes, "Checkpoint written");
        Ok(())
    }
}

impl ChangeLog for WalLog {
    fn record(&self, operations: &[Operation]) -> Result<()> {
        self.wal.lock().append(operations)?;
        Ok(())
    }

    fn applied(&self, table: &EntryTable) {
        let due = self.wal.lock().record_count() >= self.checkpoint_threshold.max(1);
        if due {
            // The batch is already durable in the WAL; a failed checkpoint only
            // postpones truncation.
            if let Err(e) = self.checkpoint(table) {
                tracing::warn!(error = %e, "Checkpoint failed, WAL kept");
            }
        }
    }
}

impl TableStorage<WalLog> {
    /// Open or create a durable store in `config.data_dir`
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_with_clock(config, SystemClock)
    }

    /// Open with an explicit clock
    pub fn open_with_clock(config: &Config, clock: impl Clock + 'static) -> Result<Self> {
        // Step 1: Create data directory if it doesn't exist
        fs::create_dir_all(&config.data_dir)?;
        let wal_path = config.data_dir.join(WalLog::WAL_FILENAME);
        let snapshot_path = config.data_dir.join(WalLog::SNAPSHOT_FILENAME);

        // Step 2: Load the latest snapshot
        let (mut table, snapshot_lsn) = if snapshot_path.exists() {
            let snapshot = Snapshot::read(&snapshot_path)?;
            tracing::info!(
                entries = snapshot.entries.len(),
                lsn = snapshot.last_lsn,
                "Loaded snapshot"
            );
            (EntryTable::from_entries(snapshot.entries), snapshot.last_lsn)
        } else {
            (EntryTable::new(), 0)
        };

        // Step 3: Replay WAL records the snapshot does not cover
        let mut last_lsn = snapshot_lsn;
        let mut replayed = 0u64;
        if wal_path.exists() {
            let (records, result) = WalRecovery::recover(&wal_path)?;
            for record in records.into_iter().filter(|r| r.lsn > snapshot_lsn) {
                table.apply(record.operations);
                replayed += 1;
            }
            last_lsn = last_lsn.max(result.last_lsn);

            if result.entries_recovered > 0 || result.entries_corrupted > 0 {
                tracing::info!(
                    recovered = result.entries_recovered,
                    replayed,
                    corrupted = result.entries_corrupted,
                    last_lsn = result.last_lsn,
                    "WAL recovery"
                );
            }
        }

        // Step 4: Open the writer after every LSN seen so far
        let writer = WalWriter::open(&wal_path, config.wal_sync_strategy)?.starting_after(last_lsn);

        let log = WalLog {
            wal: Mutex::new(writer),
            snapshot_path,
            data_dir: config.data_dir.clone(),
            checkpoint_threshold: config.checkpoint_threshold,
        };

        // Step 5: Make replayed records part of a snapshot, then start with an empty WAL
        if replayed > 0 {
            log.checkpoint(&table)?;
        }

        Ok(TableStorage::from_parts(table, log, Arc::new(clock)))
    }

    /// Open with default config in `path`
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(&config)
    }

    /// Force a checkpoint now
    pub fn checkpoint(&self) -> Result<()> {
        let table = self.table.write();
        self.log.checkpoint(&table)
    }

    /// Sync the WAL to disk
    pub fn sync(&self) -> Result<()> {
        self.log.wal.lock().sync()
    }

    /// Close gracefully: checkpoint so the next open has nothing to replay
    pub fn close(self) -> Result<()> {
        self.checkpoint()
            .map_err(|e| CacheQueueError::Storage(format!("Checkpoint on close failed: {}", e)))
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.log.data_dir
    }

    /// Records in the WAL since the last checkpoint
    pub fn wal_record_count(&self) -> u64 {
        self.log.wal.lock().record_count()
    }
}
