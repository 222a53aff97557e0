//! Packet struct with typed accessors.
//!
//! A packet is a decoded header plus an owned payload. Payloads use
//! `bytes::Bytes` so queueing and handler dispatch never copy.

use bytes::Bytes;

use super::wire_format::Message;

/// A decoded message header together with its payload.
///
/// The payload is empty when `message.content_length == 0`. Every packet
/// produced by the reader worker satisfies
/// `content.len() as u64 == message.content_length`.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Decoded header.
    pub message: Message,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub content: Bytes,
}

impl Packet {
    /// Create a new packet from a header and payload.
    pub fn new(message: Message, content: Bytes) -> Self {
        Self { message, content }
    }

    /// Create a packet with no payload.
    pub fn empty(message: Message) -> Self {
        Self {
            message,
            content: Bytes::new(),
        }
    }

    /// Operation code of the header.
    #[inline]
    pub fn operation(&self) -> u32 {
        self.message.operation
    }

    /// Payload length in bytes.
    #[inline]
    pub fn content_len(&self) -> usize {
        self.content.len()
    }
}
