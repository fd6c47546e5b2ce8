//! WAL Reader
//!
//! Handles reading records from the WAL file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{CacheQueueError, Result};

use super::{WalEntry, HEADER_SIZE};

/// Reads records from the WAL file
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset just past the last record returned
    position: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Read the next record from the WAL
    ///
    /// - `Ok(None)` at a clean end of file
    /// - `Err(WalCorruption)` for a torn tail or a checksum mismatch
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        let mut header = [0u8; HEADER_SIZE];
        let read = read_up_to(&mut self.reader, &mut header)?;
        if read == 0 {
            return Ok(None);
        }
        if read < HEADER_SIZE {
            return Err(CacheQueueError::WalCorruption(format!(
                "Torn header at offset {}: {} of {} bytes",
                self.position, read, HEADER_SIZE
            )));
        }

        let (lsn, crc, len) = WalEntry::parse_header(&header)?;
        let mut data = vec![0u8; len as usize];
        let read = read_up_to(&mut self.reader, &mut data)?;
        if read < data.len() {
            return Err(CacheQueueError::WalCorruption(format!(
                "Torn record {} at offset {}: {} of {} bytes",
                lsn, self.position, read, len
            )));
        }

        let entry = WalEntry::decode_body(lsn, crc, &data)?;
        self.position += (HEADER_SIZE + data.len()) as u64;
        Ok(Some(entry))
    }

    /// Offset just past the last valid record read
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Iterate over all valid records, stopping at the first error
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }
}

/// Iterator over WAL records
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill as much of `buf` as the reader can provide
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
