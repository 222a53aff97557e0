//! Wire format encoding and decoding.
//!
//! Implements the 32-byte message header:
//! ```text
//! ┌──────────┬─────────┬─────────┬─────────┬───────────┬───────────────┐
//! │ Reserved │ From    │ To      │ Id      │ Operation │ ContentLength │
//! │ 4 bytes  │ 4 bytes │ 4 bytes │ 8 bytes │ 4 bytes   │ 8 bytes       │
//! │ magic    │ u32 BE  │ u32 BE  │ u64 BE  │ u32 BE    │ u64 BE        │
//! └──────────┴─────────┴─────────┴─────────┴───────────┴───────────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. The reserved magic prefix is
//! written first and verified first on decode; this module is the sole
//! source of truth for offsets.

use crate::error::{Error, Result};

/// Header size in bytes (fixed, exactly 32).
pub const MESSAGE_SIZE: usize = 32;

/// Reserved magic prefix preceding every header on the wire.
pub const RESERVED_BYTES: [u8; 4] = *b"FRSB";

const RESERVED_OFFSET: usize = 0;
const FROM_OFFSET: usize = 4;
const TO_OFFSET: usize = 8;
const ID_OFFSET: usize = 12;
const OPERATION_OFFSET: usize = 20;
const CONTENT_LENGTH_OFFSET: usize = 24;

/// Operation codes reserved by the transport. All other values are
/// application-defined.
pub mod operations {
    /// Idle keepalive probe, echoed by the peer.
    pub const HEARTBEAT: u32 = 1;
    /// Carries sub-stream payload bytes; the header Id is the stream id.
    pub const STREAM: u32 = 2;
    /// Terminates the sub-stream identified by the header Id. Never carries
    /// a payload.
    pub const STREAMCLOSE: u32 = 3;
}

/// Decoded message header.
///
/// `from`, `to` and `id` are application-defined; `id` doubles as the stream
/// id for sub-stream frames. `content_length` must match the length of the
/// payload delivered with the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Message {
    /// Application-defined source id.
    pub from: u32,
    /// Application-defined destination id.
    pub to: u32,
    /// Application-defined sequence/key; stream id for sub-stream frames.
    pub id: u64,
    /// Operation code (see [`operations`]).
    pub operation: u32,
    /// Length in bytes of the payload that immediately follows; 0 means no
    /// payload.
    pub content_length: u64,
}

impl Message {
    /// Encode the header to its wire representation (Big Endian).
    pub fn encode(&self) -> [u8; MESSAGE_SIZE] {
        let mut buf = [0u8; MESSAGE_SIZE];
        buf[RESERVED_OFFSET..RESERVED_OFFSET + 4].copy_from_slice(&RESERVED_BYTES);
        buf[FROM_OFFSET..FROM_OFFSET + 4].copy_from_slice(&self.from.to_be_bytes());
        buf[TO_OFFSET..TO_OFFSET + 4].copy_from_slice(&self.to.to_be_bytes());
        buf[ID_OFFSET..ID_OFFSET + 8].copy_from_slice(&self.id.to_be_bytes());
        buf[OPERATION_OFFSET..OPERATION_OFFSET + 4].copy_from_slice(&self.operation.to_be_bytes());
        buf[CONTENT_LENGTH_OFFSET..CONTENT_LENGTH_OFFSET + 8]
            .copy_from_slice(&self.content_length.to_be_bytes());
        buf
    }

    /// Decode a header from its wire representation.
    ///
    /// The reserved prefix is verified first; a mismatch (or a short buffer)
    /// is a framing error.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < MESSAGE_SIZE {
            return Err(Error::InvalidFrame);
        }
        if buf[RESERVED_OFFSET..RESERVED_OFFSET + 4] != RESERVED_BYTES {
            return Err(Error::InvalidFrame);
        }
        Ok(Self {
            from: u32::from_be_bytes(buf[FROM_OFFSET..FROM_OFFSET + 4].try_into().unwrap()),
            to: u32::from_be_bytes(buf[TO_OFFSET..TO_OFFSET + 4].try_into().unwrap()),
            id: u64::from_be_bytes(buf[ID_OFFSET..ID_OFFSET + 8].try_into().unwrap()),
            operation: u32::from_be_bytes(
                buf[OPERATION_OFFSET..OPERATION_OFFSET + 4].try_into().unwrap(),
            ),
            content_length: u64::from_be_bytes(
                buf[CONTENT_LENGTH_OFFSET..CONTENT_LENGTH_OFFSET + 8]
                    .try_into()
                    .unwrap(),
            ),
        })
    }
}
