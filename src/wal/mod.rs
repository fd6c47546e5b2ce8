//! Write-Ahead Log (WAL) Module
//!
//! Provides durability for [`DurableStorage`](crate::storage::DurableStorage).
//!
//! ## Responsibilities
//! - Append every committed mutation batch before it is applied
//! - CRC32 checksums for corruption detection
//! - Log Sequence Numbers (LSN) for ordering against snapshots
//! - Crash recovery and replay
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Record 1                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//!
//! `Data` is the bincode encoding of `(timestamp, operations)`; one record holds
//! every operation of one storage call, so bulk writes replay all-or-nothing.

mod entry;
mod writer;
mod reader;
mod recovery;

pub use entry::{WalEntry, Operation, HEADER_SIZE, MAX_RECORD_SIZE};
pub use writer::{WalSink, WalWriter};
pub use reader::{WalReader, WalIterator};
pub use recovery::{WalRecovery, RecoveryResult};
