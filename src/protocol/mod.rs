//! Protocol layer - wire format, packets, and frame parsing.
//!
//! Provides:
//! - [`Message`] - the fixed 32-byte header and its codec
//! - [`Packet`] - a decoded header plus owned payload
//! - [`FramedReader`] - pull-based frame parser over an `AsyncRead`
//! - [`operations`] - operation codes reserved by the transport

mod framed_reader;
mod packet;
mod wire_format;

pub use framed_reader::{FramedReader, DEFAULT_READ_CHUNK};
pub use packet::Packet;
pub use wire_format::{operations, Message, MESSAGE_SIZE, RESERVED_BYTES};
