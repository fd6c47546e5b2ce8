//! Remote storage client
//!
//! [`RemoteStorage`] implements [`Storage`] by sending every call to a
//! [`Server`](super::Server). One connection per client, opened on first use and
//! dropped after a transport failure; the next call reconnects. The server
//! closes idle connections, so a request that finds its reused connection
//! closed is sent once more over a new one.

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::TcpStream;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::entry::{EntrySnapshot, FreshnessFilter, Job, QueueRequest, Tags};
use crate::error::{CacheQueueError, Result};
use crate::protocol::{read_response, write_request, Request, Response};
use crate::storage::Storage;

/// Socket read/write timeout unless [`RemoteStorage::with_timeout`] says otherwise
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

struct Link {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

/// Storage living in a server process
pub struct RemoteStorage {
    addr: String,
    timeout: Duration,
    link: Mutex<Option<Link>>,
}

impl RemoteStorage {
    /// Client for the server at `addr`; connects lazily
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_TIMEOUT,
            link: Mutex::new(None),
        }
    }

    /// Connect right away and check the server answers
    pub fn connect(addr: impl Into<String>) -> Result<Self> {
        let storage = Self::new(addr);
        storage.ping()?;
        Ok(storage)
    }

    /// Read/write timeout of the socket, applied to an open connection too
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        let failed = self.link.get_mut().as_ref().and_then(|link| {
            let stream = link.writer.get_ref();
            stream
                .set_read_timeout(Some(timeout))
                .and_then(|()| stream.set_write_timeout(Some(timeout)))
                .err()
        });
        if let Some(e) = failed {
            tracing::debug!(addr = %self.addr, error = %e, "Dropping connection");
            *self.link.get_mut() = None;
        }
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn ping(&self) -> Result<()> {
        self.call(Request::Ping)?.into_pong()
    }

    fn open_link(&self) -> Result<Link> {
        let stream = TcpStream::connect(&self.addr).map_err(|e| {
            CacheQueueError::Network(format!("Failed to connect to {}: {}", self.addr, e))
        })?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        tracing::debug!(addr = %self.addr, "Connected");

        Ok(Link {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        })
    }

    /// Send one request and wait for its response
    fn call(&self, request: Request) -> Result<Response> {
        let mut guard = self.link.lock();
        let reused = guard.is_some();

        let result = match self.exchange(&mut *guard, &request) {
            Err(CacheQueueError::Io(ref e)) if reused && is_closed_by_peer(e.kind()) => {
                tracing::debug!(addr = %self.addr, op = request.name(), "Connection was closed, reconnecting");
                self.exchange(&mut *guard, &request)
            }
            result => result,
        };

        result.map_err(|e| {
            tracing::warn!(addr = %self.addr, op = request.name(), error = %e, "Request failed");
            match e {
                CacheQueueError::Io(io) => {
                    CacheQueueError::Network(format!("{} to {}: {}", request.name(), self.addr, io))
                }
                other => other,
            }
        })
    }

    /// One write/read over the current link, opening it first when needed
    fn exchange(&self, slot: &mut Option<Link>, request: &Request) -> Result<Response> {
        if slot.is_none() {
            *slot = Some(self.open_link()?);
        }
        let Some(link) = slot.as_mut() else {
            return Err(CacheQueueError::Network("No connection".to_string()));
        };

        let exchanged =
            write_request(&mut link.writer, request).and_then(|()| read_response(&mut link.reader));
        if exchanged.is_err() {
            // The stream state is unknown after a failure
            *slot = None;
        }
        exchanged
    }
}

/// Errors seen when the server had already closed a kept-alive connection
fn is_closed_by_peer(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}

impl Storage for RemoteStorage {
    fn now(&self) -> Result<i64> {
        self.call(Request::Now)?.into_time()
    }

    fn get(&self, key: &str, only_fresh: bool) -> Result<Option<EntrySnapshot>> {
        self.call(Request::Get {
            key: key.to_string(),
            only_fresh,
        })?
        .into_entry()
    }

    fn get_by_tag(&self, tags: &Tags, only_fresh: bool) -> Result<Vec<EntrySnapshot>> {
        self.call(Request::GetByTag {
            tags: tags.clone(),
            only_fresh,
        })?
        .into_entries()
    }

    fn set(&self, key: &str, data: Bytes, fresh_for: u64, force: bool, tags: &Tags) -> Result<bool> {
        self.call(Request::Set {
            key: key.to_string(),
            data,
            fresh_for,
            force,
            tags: tags.clone(),
        })?
        .into_flag()
    }

    fn refresh(&self, key: &str, fresh_for: u64, force: bool) -> Result<bool> {
        self.call(Request::Refresh {
            key: key.to_string(),
            fresh_for,
            force,
        })?
        .into_flag()
    }

    fn queue(&self, request: &QueueRequest) -> Result<Option<String>> {
        self.call(Request::Queue(request.clone()))?.into_key()
    }

    fn get_job(&self, worker_id: &str, channel: u32) -> Result<Option<Job>> {
        self.call(Request::GetJob {
            worker_id: worker_id.to_string(),
            channel,
        })?
        .into_job()
    }

    fn update_job_status(&self, key: &str, worker_id: &str, new_queue_fresh_for: u64) -> Result<bool> {
        self.call(Request::UpdateJobStatus {
            key: key.to_string(),
            worker_id: worker_id.to_string(),
            new_queue_fresh_for,
        })?
        .into_flag()
    }

    fn queue_count(&self, channel: Option<u32>) -> Result<u64> {
        self.call(Request::QueueCount { channel })?.into_count()
    }

    fn clear_queue(&self, channel: Option<u32>) -> Result<u64> {
        self.call(Request::ClearQueue { channel })?.into_count()
    }

    fn count_all(&self, filter: FreshnessFilter) -> Result<u64> {
        self.call(Request::CountAll { filter })?.into_count()
    }

    fn count_by_tag(&self, tags: &Tags, filter: FreshnessFilter) -> Result<u64> {
        self.call(Request::CountByTag {
            tags: tags.clone(),
            filter,
        })?
        .into_count()
    }

    fn remove(&self, key: &str, force: bool) -> Result<bool> {
        self.call(Request::Remove {
            key: key.to_string(),
            force,
        })?
        .into_flag()
    }

    fn remove_if_data(&self, key: &str, data: &Bytes) -> Result<bool> {
        self.call(Request::RemoveIfData {
            key: key.to_string(),
            data: data.clone(),
        })?
        .into_flag()
    }

    fn remove_all(&self, force: bool) -> Result<u64> {
        self.call(Request::RemoveAll { force })?.into_count()
    }

    fn remove_by_tag(&self, tags: &Tags, force: bool) -> Result<u64> {
        self.call(Request::RemoveByTag {
            tags: tags.clone(),
            force,
        })?
        .into_count()
    }

    fn outdate(&self, key: &str, force: bool) -> Result<bool> {
        self.call(Request::Outdate {
            key: key.to_string(),
            force,
        })?
        .into_flag()
    }

    fn outdate_all(&self, force: bool) -> Result<u64> {
        self.call(Request::OutdateAll { force })?.into_count()
    }

    fn outdate_by_tag(&self, tags: &Tags, force: bool) -> Result<u64> {
        self.call(Request::OutdateByTag {
            tags: tags.clone(),
            force,
        })?
        .into_count()
    }

    fn cleanup(&self, outdated_for: u64) -> Result<u64> {
        self.call(Request::Cleanup { outdated_for })?.into_count()
    }
}

impl std::fmt::Debug for RemoteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStorage")
            .field("addr", &self.addr)
            .field("connected", &self.link.lock().is_some())
            .finish()
    }
}
