//! Connection Handler
//!
//! Handles individual client connections.

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CacheQueueError, Result};
use crate::protocol::{read_request, write_response, Request, Response};
use crate::storage::Storage;

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    /// Store every request runs against
    storage: Arc<dyn Storage>,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Create a new connection handler
    ///
    /// Sets up buffered I/O and configures timeouts
    pub fn new(stream: TcpStream, storage: Arc<dyn Storage>) -> Result<Self> {
        // Get peer address for logging before we split the stream
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        // Clone stream for separate read/write handles
        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            storage,
            peer_addr,
        })
    }

    /// Configure connection timeouts (0 = none)
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        let read_stream = self.reader.get_ref();
        let write_stream = self.writer.get_ref();

        if read_ms > 0 {
            read_stream.set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            write_stream.set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }

        Ok(())
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Reads requests in a loop and sends responses.
    /// Returns when the client disconnects or an error occurs.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        loop {
            let request = match read_request(&mut self.reader) {
                Ok(request) => request,
                Err(CacheQueueError::Io(ref e)) if is_disconnect(e.kind()) => {
                    tracing::debug!("Client {} disconnected ({:?})", self.peer_addr, e.kind());
                    return Ok(());
                }
                Err(CacheQueueError::Io(ref e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    tracing::debug!("Read timeout for client {}", self.peer_addr);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    // The stream may be out of sync; answer once and close
                    let _ = write_response(&mut self.writer, &Response::error(e.to_string()));
                    return Err(e);
                }
            };

            tracing::trace!(peer = %self.peer_addr, op = request.name(), "request");
            let response = execute(self.storage.as_ref(), request);

            if let Err(e) = write_response(&mut self.writer, &response) {
                if let CacheQueueError::Io(ref io_err) = e {
                    if is_disconnect(io_err.kind()) {
                        tracing::debug!(
                            "Client {} disconnected before response could be sent: {}",
                            self.peer_addr,
                            e
                        );
                        return Ok(());
                    }
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                return Err(e);
            }
        }
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}

/// Run one request against `storage`
pub fn execute(storage: &dyn Storage, request: Request) -> Response {
    let result = match request {
        Request::Ping => Ok(Response::Pong),
        Request::Now => storage.now().map(Response::Time),
        Request::Get { key, only_fresh } => storage.get(&key, only_fresh).map(Response::Entry),
        Request::GetByTag { tags, only_fresh } => {
            storage.get_by_tag(&tags, only_fresh).map(Response::Entries)
        }
        Request::Set {
            key,
            data,
            fresh_for,
            force,
            tags,
        } => storage
            .set(&key, data, fresh_for, force, &tags)
            .map(Response::Flag),
        Request::Refresh {
            key,
            fresh_for,
            force,
        } => storage.refresh(&key, fresh_for, force).map(Response::Flag),
        Request::Queue(request) => storage.queue(&request).map(Response::Key),
        Request::GetJob { worker_id, channel } => {
            storage.get_job(&worker_id, channel).map(Response::Job)
        }
        Request::UpdateJobStatus {
            key,
            worker_id,
            new_queue_fresh_for,
        } => storage
            .update_job_status(&key, &worker_id, new_queue_fresh_for)
            .map(Response::Flag),
        Request::QueueCount { channel } => storage.queue_count(channel).map(Response::Count),
        Request::ClearQueue { channel } => storage.clear_queue(channel).map(Response::Count),
        Request::CountAll { filter } => storage.count_all(filter).map(Response::Count),
        Request::CountByTag { tags, filter } => {
            storage.count_by_tag(&tags, filter).map(Response::Count)
        }
        Request::Remove { key, force } => storage.remove(&key, force).map(Response::Flag),
        Request::RemoveIfData { key, data } => {
            storage.remove_if_data(&key, &data).map(Response::Flag)
        }
        Request::RemoveAll { force } => storage.remove_all(force).map(Response::Count),
        Request::RemoveByTag { tags, force } => {
            storage.remove_by_tag(&tags, force).map(Response::Count)
        }
        Request::Outdate { key, force } => storage.outdate(&key, force).map(Response::Flag),
        Request::OutdateAll { force } => storage.outdate_all(force).map(Response::Count),
        Request::OutdateByTag { tags, force } => {
            storage.outdate_by_tag(&tags, force).map(Response::Count)
        }
        Request::Cleanup { outdated_for } => storage.cleanup(outdated_for).map(Response::Count),
    };

    result.unwrap_or_else(|e| Response::error(e.to_string()))
}
