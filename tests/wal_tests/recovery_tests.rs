//! Tests for WAL Recovery
//!
//! These tests verify:
//! - Recovery from a clean WAL
//! - Torn tails are cut off and counted
//! - Checksum mismatches stop recovery at the last good record
//! - Verify mode leaves the file untouched

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use bytes::Bytes;
use cachequeue::config::WalSyncStrategy;
use cachequeue::entry::Entry;
use cachequeue::wal::{Operation, WalEntry, WalRecovery, WalWriter};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("test.wal");
    (temp_dir, wal_path)
}

fn put(key: &str) -> Operation {
    let mut entry = Entry::new(key);
    entry.data = Some(Bytes::from(format!("data-{}", key)));
    Operation::Put { entry }
}

/// Write records using WalWriter (produces a well-formed WAL)
fn write_records_via_writer(path: &PathBuf, count: usize) {
    let mut writer = WalWriter::open(path, WalSyncStrategy::EveryWrite).unwrap();
    for i in 0..count {
        writer.append(&[put(&format!("key{}", i))]).unwrap();
    }
}

/// Write raw bytes directly to a file (for crafting damage)
fn write_raw(path: &PathBuf, chunks: &[&[u8]]) {
    let mut file = File::create(path).unwrap();
    for chunk in chunks {
        file.write_all(chunk).unwrap();
    }
    file.sync_all().unwrap();
}

fn record_bytes(lsn: u64, key: &str) -> Vec<u8> {
    WalEntry::new(lsn, vec![put(key)]).serialize().unwrap()
}

// =============================================================================
// Recover: Clean WAL Tests
// =============================================================================

#[test]
fn test_recover_empty_file() {
    let (_temp, wal_path) = setup_temp_wal();
    File::create(&wal_path).unwrap();

    let (records, result) = WalRecovery::recover(&wal_path).unwrap();

    assert!(records.is_empty());
    assert_eq!(result.entries_recovered, 0);
    assert_eq!(result.entries_corrupted, 0);
    assert_eq!(result.last_lsn, 0);
    assert!(!result.was_truncated);
}

#[test]
fn test_recover_multiple_records() {
    let (_temp, wal_path) = setup_temp_wal();
    write_records_via_writer(&wal_path, 10);

    let (records, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(records.len(), 10);
    assert_eq!(result.entries_recovered, 10);
    assert_eq!(result.last_lsn, 10);
    assert!(!result.was_truncated);

    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.lsn, (i + 1) as u64);
        assert_eq!(record.operations[0].key(), format!("key{}", i));
    }
}

#[test]
fn test_recover_preserves_entry_fields() {
    let (_temp, wal_path) = setup_temp_wal();

    let mut entry = Entry::new("job");
    entry.task = Some("store".to_string());
    entry.params = Some(Bytes::from_static(b"p"));
    entry.queue_priority = 10;
    entry.queued = 3;
    entry.queue_start = 500;
    entry.tags = cachequeue::tags(["a", "b"]);

    {
        let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
        writer.append(&[Operation::Put { entry: entry.clone() }]).unwrap();
    }

    let (records, _) = WalRecovery::recover(&wal_path).unwrap();
    assert_eq!(records[0].operations, vec![Operation::Put { entry }]);
}

// =============================================================================
// Recover: Torn Tail Tests
// =============================================================================

#[test]
fn test_recover_partial_header_at_tail() {
    let (_temp, wal_path) = setup_temp_wal();
    let good = record_bytes(1, "k");
    write_raw(&wal_path, &[&good, &[0u8; 8]]);

    let (records, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(result.last_lsn, 1);
    assert_eq!(result.entries_corrupted, 1);
    assert!(result.was_truncated);
    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), good.len() as u64);
}

#[test]
fn test_recover_partial_data_at_tail() {
    let (_temp, wal_path) = setup_temp_wal();
    let good = record_bytes(1, "k1");
    let mut torn = record_bytes(2, "k2");
    torn.truncate(20);
    write_raw(&wal_path, &[&good, &torn]);

    let (records, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(result.entries_recovered, 1);
    assert!(result.was_truncated);
}

#[test]
fn test_writer_appends_after_recovered_tail() {
    let (_temp, wal_path) = setup_temp_wal();
    let good = record_bytes(1, "k1");
    write_raw(&wal_path, &[&good, &[0xAB; 5]]);

    let (_, result) = WalRecovery::recover(&wal_path).unwrap();
    {
        let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite)
            .unwrap()
            .starting_after(result.last_lsn);
        writer.append(&[put("k2")]).unwrap();
    }

    let (records, result) = WalRecovery::recover(&wal_path).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(result.last_lsn, 2);
    assert!(!result.was_truncated);
}

// =============================================================================
// Recover: Corruption Tests (CRC mismatch)
// =============================================================================

#[test]
fn test_recover_corrupted_record() {
    let (_temp, wal_path) = setup_temp_wal();
    let good = record_bytes(1, "k1");
    let mut bad = record_bytes(2, "k2");
    if let Some(byte) = bad.last_mut() {
        *byte ^= 0xFF;
    }
    write_raw(&wal_path, &[&good, &bad]);

    let (records, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(result.entries_corrupted, 1);
    assert_eq!(result.last_lsn, 1);
    assert!(result.was_truncated);
}

#[test]
fn test_recover_corruption_at_first_record() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut bytes = record_bytes(1, "k");
    bytes[20] ^= 0xFF;
    write_raw(&wal_path, &[&bytes]);

    let (records, result) = WalRecovery::recover(&wal_path).unwrap();

    assert!(records.is_empty());
    assert_eq!(result.entries_corrupted, 1);
    assert_eq!(result.last_lsn, 0);
    assert!(result.was_truncated);
    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), 0);
}

// =============================================================================
// Verify Tests
// =============================================================================

#[test]
fn test_verify_does_not_truncate() {
    let (_temp, wal_path) = setup_temp_wal();
    let good = record_bytes(1, "k");
    write_raw(&wal_path, &[&good, &[0u8; 5]]);

    let result = WalRecovery::verify(&wal_path).unwrap();

    assert_eq!(result.entries_recovered, 1);
    assert_eq!(result.entries_corrupted, 1);
    assert!(!result.was_truncated);
    assert_eq!(
        std::fs::metadata(&wal_path).unwrap().len(),
        (good.len() + 5) as u64
    );
}

#[test]
fn test_recover_and_verify_agree_on_clean_wal() {
    let (_temp, wal_path) = setup_temp_wal();
    write_records_via_writer(&wal_path, 20);

    let verify_result = WalRecovery::verify(&wal_path).unwrap();
    let (records, recover_result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(records.len() as u64, recover_result.entries_recovered);
    assert_eq!(recover_result, verify_result);
}
