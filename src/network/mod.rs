//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single acceptor thread
//! - Fixed pool of connection threads fed by a bounded channel
//! - Requests run directly against the served [`Storage`](crate::storage::Storage)
//! - [`RemoteStorage`] is the client side, itself a `Storage`

mod client;
mod connection;
mod server;

pub use client::{RemoteStorage, DEFAULT_TIMEOUT};
pub use connection::{execute, Connection};
pub use server::{Server, ShutdownHandle};
