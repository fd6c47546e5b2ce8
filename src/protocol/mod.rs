//! Protocol Module
//!
//! Wire protocol between [`RemoteStorage`](crate::network::RemoteStorage) and
//! the [`Server`](crate::network::Server). Every [`Storage`](crate::storage::Storage)
//! call is one request frame answered by one response frame.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Tag (1)  │ Len (4)  │   Payload (bincode)         │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//! - Tag: `0x01` for a request; the [`Status`] byte for a response
//! - Len: payload length, big endian, at most 16 MiB
//!
//! ### Status Codes
//! - 0x00: OK
//! - 0x02: ERROR (payload is [`Response::Error`])

mod codec;
mod request;
mod response;

pub use codec::{
    decode_request, decode_response, encode_request, encode_response, read_request,
    read_response, write_request, write_response, HEADER_SIZE, MAX_PAYLOAD_SIZE, REQUEST_TAG,
};
pub use request::Request;
pub use response::{Response, Status};
