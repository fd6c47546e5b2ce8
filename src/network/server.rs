//! TCP Server
//!
//! Accepts connections and dispatches them to connection threads.
//!
//! The acceptor polls a non-blocking listener so it can notice shutdown. Accepted
//! sockets go through a bounded `crossbeam` channel to a fixed set of connection
//! threads; when the channel is full the socket is dropped. Shutdown stops the
//! acceptor; connections already being served run until their client leaves.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, TrySendError};

use crate::config::Config;
use crate::error::Result;
use crate::storage::Storage;

use super::connection::Connection;

/// Sleep of the acceptor between two empty polls
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Stops a running [`Server`] from another thread
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// TCP server exposing a [`Storage`]
pub struct Server {
    config: Config,
    storage: Arc<dyn Storage>,
    listener: TcpListener,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Bind to `config.listen_addr`
    pub fn bind(config: Config, storage: Arc<dyn Storage>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            config,
            storage,
            listener,
            shutdown: ShutdownHandle {
                flag: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// Serve until shut down (blocking)
    pub fn run(&self) -> Result<()> {
        let threads = self.config.connection_threads.max(1);
        let (tx, rx) = channel::bounded::<TcpStream>(self.config.max_connections.max(1));

        for i in 0..threads {
            let rx = rx.clone();
            let storage = Arc::clone(&self.storage);
            let (read_ms, write_ms) = (self.config.read_timeout_ms, self.config.write_timeout_ms);
            thread::Builder::new()
                .name(format!("cachequeue-conn-{}", i))
                .spawn(move || serve_connections(rx, storage, read_ms, write_ms))?;
        }
        drop(rx);

        tracing::info!(addr = %self.local_addr()?, threads, "Server listening");

        while !self.shutdown.is_shutdown() {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        tracing::warn!("Failed to configure socket for {}: {}", addr, e);
                        continue;
                    }
                    match tx.try_send(stream) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!("Connection limit reached, rejecting {}", addr);
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        tracing::info!("Server stopped accepting connections");
        Ok(())
    }
}

/// Body of one connection thread: serve sockets until the acceptor goes away
fn serve_connections(rx: Receiver<TcpStream>, storage: Arc<dyn Storage>, read_ms: u64, write_ms: u64) {
    for stream in rx.iter() {
        let mut connection = match Connection::new(stream, Arc::clone(&storage)) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!("Failed to set up connection: {}", e);
                continue;
            }
        };
        if let Err(e) = connection.set_timeouts(read_ms, write_ms) {
            tracing::warn!("Failed to set timeouts for {}: {}", connection.peer_addr(), e);
        }
        if let Err(e) = connection.handle() {
            tracing::debug!("Connection {} closed with error: {}", connection.peer_addr(), e);
        }
    }
}
