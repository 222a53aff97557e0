//! # frisbee
//!
//! A length-prefixed, message-oriented transport layered on a reliable
//! stream (TCP, optionally TLS). Frisbee delivers fixed-header messages
//! with optional payloads in both directions, multiplexes byte-oriented
//! sub-streams over the same connection, and dispatches inbound messages
//! through a user-supplied routing table.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): the 32-byte big-endian header codec and a
//!   pull-based frame parser.
//! - **Connection engine** ([`Conn`]): the full-duplex pipeline — a shared
//!   write buffer drained by a background flusher on coalesced wake
//!   signals, and a background reader demultiplexing frames into the
//!   incoming queue or per-stream receive buffers.
//! - **Sub-streams** ([`StreamConn`]): byte channels keyed by a stream id,
//!   sharing the parent's writer and lifecycle.
//! - **Router** ([`Router`]): operation-code dispatch with reply and
//!   [`Action`] semantics.
//! - **Client** ([`Client`]): dialing, the router loop, the idle heartbeat,
//!   and reconnection.
//!
//! ## Example
//!
//! ```ignore
//! use frisbee::{Action, Client, Message, Options, Packet, Router};
//!
//! const PING: u32 = 16;
//! const PONG: u32 = 17;
//!
//! #[tokio::main]
//! async fn main() -> frisbee::Result<()> {
//!     let router = Router::new().register(PONG, |message, _content| async move {
//!         (None, Action::None)
//!     });
//!
//!     let client = Client::new("127.0.0.1:8192", router, Options::new());
//!     client.connect().await?;
//!     client
//!         .write_message(&Message { operation: PING, id: 1, ..Default::default() }, None)
//!         .await?;
//!     client.join().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod options;
pub mod protocol;
pub mod router;

mod client;
mod conn;
mod queue;

pub use client::Client;
pub use conn::{BoxedStream, Conn, RawStream, StreamConn, DEFAULT_BUFFER_SIZE};
pub use error::{Error, Result};
pub use options::{Options, TlsOptions};
pub use protocol::{operations, Message, Packet, MESSAGE_SIZE};
pub use router::{Action, Handler, HandlerOutput, Router};
