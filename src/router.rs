//! Router - operation-code dispatch for inbound packets.
//!
//! A [`Router`] maps operation codes to handler functions. The
//! per-connection [`route`] loop pops packets, invokes the matching handler
//! serially, writes the optional reply, and reacts to the returned
//! [`Action`]. Packets without a registered handler are discarded.
//!
//! # Example
//!
//! ```ignore
//! use frisbee::{Action, Message, Packet, Router};
//! use bytes::Bytes;
//!
//! const PING: u32 = 16;
//! const PONG: u32 = 17;
//!
//! let router = Router::new().register(PING, |message: Message, _content: Bytes| async move {
//!     let reply = Message { operation: PONG, id: message.id, ..Default::default() };
//!     (Some(Packet::empty(reply)), Action::None)
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::Notify;

use crate::conn::Conn;
use crate::error::Result;
use crate::protocol::{operations, Message, Packet};

/// Boxed future returned by handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Directive a handler returns to the router loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Keep routing.
    #[default]
    None,
    /// Close this connection and stop routing.
    Close,
    /// Close this connection and signal the accept loop to stop.
    Shutdown,
}

/// What a handler produces: an optional reply packet and an action.
///
/// The reply is written only when its header's `content_length` matches the
/// reply payload length.
pub type HandlerOutput = (Option<Packet>, Action);

/// Trait for packet handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle one inbound packet.
    fn call(&self, message: Message, content: Bytes) -> BoxFuture<'static, HandlerOutput>;
}

struct FnHandler<F>(F);

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Message, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutput> + Send + 'static,
{
    fn call(&self, message: Message, content: Bytes) -> BoxFuture<'static, HandlerOutput> {
        Box::pin((self.0)(message, content))
    }
}

/// Mapping from operation code to handler.
#[derive(Default)]
pub struct Router {
    handlers: HashMap<u32, Box<dyn Handler>>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `operation`, replacing any previous one.
    pub fn register<F, Fut>(mut self, operation: u32, handler: F) -> Self
    where
        F: Fn(Message, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutput> + Send + 'static,
    {
        self.handlers.insert(operation, Box::new(FnHandler(handler)));
        self
    }

    /// Register the built-in HEARTBEAT handler that echoes every probe back
    /// to the sender. Accepting sides use this so clients can measure
    /// round trips.
    pub fn with_heartbeat_echo(self) -> Self {
        self.register(
            operations::HEARTBEAT,
            |message: Message, _content: Bytes| async move {
                let reply = Message {
                    content_length: 0,
                    ..message
                };
                (Some(Packet::empty(reply)), Action::None)
            },
        )
    }

    /// Whether a handler is registered for `operation`.
    pub fn contains(&self, operation: u32) -> bool {
        self.handlers.contains_key(&operation)
    }

    fn get(&self, operation: u32) -> Option<&dyn Handler> {
        self.handlers.get(&operation).map(|h| h.as_ref())
    }
}

/// Route inbound packets on `conn` until an action stops the loop or the
/// connection errors.
///
/// Handlers run serially; no two handlers execute concurrently on the same
/// connection. On [`Action::Shutdown`], `shutdown` is notified (when
/// supplied) before the connection closes — the accepting side passes its
/// listener's stop signal here. Returns `Ok(())` after an action-initiated
/// close; connection errors (including [`ConnectionPaused`]) bubble up to
/// the caller.
///
/// [`ConnectionPaused`]: crate::Error::ConnectionPaused
pub async fn route(conn: &Conn, router: &Router, shutdown: Option<&Notify>) -> Result<()> {
    loop {
        let packet = conn.read_message().await?;

        let Some(handler) = router.get(packet.operation()) else {
            tracing::debug!(
                operation = packet.operation(),
                "no handler registered, discarding packet"
            );
            continue;
        };

        let (reply, action) = handler.call(packet.message, packet.content).await;

        if let Some(reply) = reply {
            if reply.message.content_length == reply.content.len() as u64 {
                let content = (!reply.content.is_empty()).then_some(&reply.content[..]);
                conn.write_message(&reply.message, content).await?;
            }
        }

        match action {
            Action::None => {}
            Action::Close => {
                conn.close().await?;
                return Ok(());
            }
            Action::Shutdown => {
                if let Some(shutdown) = shutdown {
                    shutdown.notify_one();
                }
                conn.close().await?;
                return Ok(());
            }
        }
    }
}
