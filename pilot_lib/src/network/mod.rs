//! This module contains everything that's necessary to talk to the pilot daemon.
//!
//! ## Communication
//!
//! Sending and receiving raw bytes is handled via the
//! [send_bytes](crate::network::protocol::send_bytes)
//! and [receive_bytes](crate::network::protocol::receive_bytes) functions.
//!
//! Payloads are defined via the [`Request`](crate::Request) and [`Response`](crate::Response)
//! enums that can be found in the [`message`] module.
//! The serialization format is [`cbor`](::ciborium).
//!
//! ## Protocol
//!
//! - The client connects to the socket and sends a single request.
//! - The daemon answers with a single response.
//! - The client may send the next request on the same connection or just go away.

pub mod message;
pub mod protocol;
pub mod socket;

pub use protocol::{
    receive_message, receive_request, receive_response, send_message, send_request, send_response,
};
