//! Client - dialing, routing, heartbeat, reconnection.
//!
//! A [`Client`] dials a frisbee server and runs the router loop over the
//! connection: every inbound packet is dispatched through the registered
//! [`Router`], replies are written back, and actions close the connection.
//!
//! When a heartbeat interval is configured, a built-in HEARTBEAT handler is
//! installed and a background worker probes the server whenever the
//! connection is otherwise idle, logging the observed round trip.
//!
//! When reconnection is enabled, a paused connection (EOF from the server)
//! is replaced by redialing with the original options and routing resumes
//! on the fresh engine. Sub-streams do not survive a reconnect.
//!
//! # Example
//!
//! ```ignore
//! use frisbee::{Action, Client, Message, Options, Router};
//!
//! const PONG: u32 = 17;
//!
//! #[tokio::main]
//! async fn main() -> frisbee::Result<()> {
//!     let router = Router::new().register(PONG, |message, _content| async move {
//!         println!("pong {}", message.id);
//!         (None, Action::None)
//!     });
//!
//!     let client = Client::new("127.0.0.1:8192", router, Options::new());
//!     client.connect().await?;
//!     client.join().await;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::conn::{BoxedStream, Conn};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::protocol::{operations, Message};
use crate::router::{self, Action, Router};

/// A frisbee client. Cheap to clone; all clones share the connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    addr: String,
    router: Router,
    options: Options,
    closed: AtomicBool,
    conn: RwLock<Option<Conn>>,
    heartbeat_rx: Mutex<Option<mpsc::Receiver<()>>>,
    run_task: Mutex<Option<JoinHandle<()>>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientInner {
    fn current_conn(&self) -> Option<Conn> {
        self.conn.read().unwrap().clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Client {
    /// Create an uninitialized client with the registered router.
    /// [`Client::connect`] must then be called to dial the server.
    ///
    /// When a heartbeat interval is configured, the reserved HEARTBEAT
    /// operation gets the built-in echo-tracking handler; a user handler
    /// registered for it is overwritten with a warning.
    pub fn new(addr: impl Into<String>, mut router: Router, options: Options) -> Client {
        let mut heartbeat_rx = None;
        if options.heartbeat().is_some() {
            if router.contains(operations::HEARTBEAT) {
                tracing::warn!(
                    operation = operations::HEARTBEAT,
                    "operation is reserved, its handler will be overwritten"
                );
            }
            let (tx, rx) = mpsc::channel(1);
            heartbeat_rx = Some(rx);
            router = router.register(
                operations::HEARTBEAT,
                move |_message: Message, _content: Bytes| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.try_send(());
                        (None, Action::None)
                    }
                },
            );
        }

        Client {
            inner: Arc::new(ClientInner {
                addr: addr.into(),
                router,
                options,
                closed: AtomicBool::new(false),
                conn: RwLock::new(None),
                heartbeat_rx: Mutex::new(heartbeat_rx),
                run_task: Mutex::new(None),
                heartbeat_task: Mutex::new(None),
            }),
        }
    }

    /// Dial the server and start the router loop (and the heartbeat worker,
    /// when configured).
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let span = inner.options.span();
        tracing::debug!(addr = %inner.addr, "connecting");
        let conn = Conn::connect(
            &inner.addr,
            inner.options.keep_alive(),
            span.clone(),
            inner.options.tls(),
        )
        .await?;
        tracing::info!(addr = %inner.addr, "connected");
        *inner.conn.write().unwrap() = Some(conn);

        let run = tokio::spawn(run_loop(inner.clone()).instrument(span.clone()));
        inner.run_task.lock().unwrap().replace(run);

        if let Some(interval) = inner.options.heartbeat() {
            if let Some(echo) = inner.heartbeat_rx.lock().unwrap().take() {
                let task =
                    tokio::spawn(heartbeat_loop(inner.clone(), interval, echo).instrument(span));
                inner.heartbeat_task.lock().unwrap().replace(task);
            }
        }
        Ok(())
    }

    /// Whether this client has been closed.
    pub fn closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// The error that paused or closed the current connection, if any.
    pub fn error(&self) -> Option<Error> {
        self.inner.current_conn().and_then(|c| c.error())
    }

    /// Send a message to the server.
    pub async fn write_message(&self, message: &Message, content: Option<&[u8]>) -> Result<()> {
        match self.inner.current_conn() {
            Some(conn) => conn.write_message(message, content).await,
            None => Err(Error::ConnectionNotInitialized),
        }
    }

    /// Flush buffered outbound messages immediately.
    pub async fn flush(&self) -> Result<()> {
        match self.inner.current_conn() {
            Some(conn) => conn.flush().await,
            None => Err(Error::ConnectionNotInitialized),
        }
    }

    /// Create (or look up) a locally-owned sub-stream with the given id.
    pub fn new_stream_conn(&self, id: u64) -> Result<crate::StreamConn> {
        match self.inner.current_conn() {
            Some(conn) => Ok(conn.new_stream_conn(id)),
            None => Err(Error::ConnectionNotInitialized),
        }
    }

    /// Wait for the next sub-stream opened by the server.
    pub async fn next_stream_conn(&self) -> Option<crate::StreamConn> {
        let conn = self.inner.current_conn()?;
        conn.next_stream_conn().await
    }

    /// Disable the engine and return the raw stream, for proxying and
    /// takeover scenarios.
    pub async fn raw(&self) -> Result<BoxedStream> {
        let conn = self
            .inner
            .current_conn()
            .ok_or(Error::ConnectionNotInitialized)?;
        self.inner.closed.store(true, Ordering::Release);
        conn.raw().await
    }

    /// Close the client and its connection, stopping the background
    /// workers.
    pub async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(task) = self.inner.heartbeat_task.lock().unwrap().take() {
            task.abort();
        }
        match self.inner.current_conn() {
            Some(conn) => conn.close().await,
            None => Ok(()),
        }
    }

    /// Wait until the router loop exits (connection closed or lost without
    /// reconnection).
    pub async fn join(&self) {
        let task = self.inner.run_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Router loop with the reconnection hook.
async fn run_loop(inner: Arc<ClientInner>) {
    loop {
        if inner.is_closed() {
            return;
        }
        let Some(conn) = inner.current_conn() else {
            return;
        };

        match router::route(&conn, &inner.router, None).await {
            Ok(()) => {
                // A handler action closed the connection.
                inner.closed.store(true, Ordering::Release);
                return;
            }
            Err(Error::ConnectionPaused) if inner.options.reconnect().is_some() => {
                if !reconnect(&inner).await {
                    inner.closed.store(true, Ordering::Release);
                    return;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "router loop ended");
                let _ = conn.close().await;
                inner.closed.store(true, Ordering::Release);
                return;
            }
        }
    }
}

/// Redial until it succeeds or the client closes. The paused engine is
/// closed first; its sub-streams are gone.
async fn reconnect(inner: &Arc<ClientInner>) -> bool {
    if let Some(old) = inner.current_conn() {
        let _ = old.close().await;
    }
    let backoff = inner
        .options
        .reconnect()
        .unwrap_or(crate::options::DEFAULT_RECONNECT_BACKOFF);

    let mut attempt = 0u32;
    while !inner.is_closed() {
        attempt += 1;
        tokio::time::sleep(backoff).await;
        match Conn::connect(
            &inner.addr,
            inner.options.keep_alive(),
            inner.options.span(),
            inner.options.tls(),
        )
        .await
        {
            Ok(conn) => {
                tracing::info!(addr = %inner.addr, attempt, "reconnected");
                *inner.conn.write().unwrap() = Some(conn);
                return true;
            }
            Err(e) => {
                tracing::warn!(addr = %inner.addr, attempt, error = %e, "reconnect failed");
            }
        }
    }
    false
}

/// Idle keepalive worker.
///
/// Every interval, if nothing is buffered for sending, emit a HEARTBEAT
/// frame and wait for the echo, logging the round trip. Ticks are skipped
/// while the write buffer is non-empty.
async fn heartbeat_loop(inner: Arc<ClientInner>, interval: Duration, mut echo: mpsc::Receiver<()>) {
    loop {
        tokio::time::sleep(interval).await;
        if inner.is_closed() {
            return;
        }
        let Some(conn) = inner.current_conn() else {
            return;
        };

        if conn.write_buffer_size().await > 0 {
            tracing::debug!("skipping heartbeat, write buffer is not empty");
            continue;
        }

        let message = Message {
            operation: operations::HEARTBEAT,
            ..Default::default()
        };
        if let Err(e) = conn.write_message(&message, None).await {
            if inner.options.reconnect().is_some() {
                tracing::debug!(error = %e, "heartbeat write failed, awaiting reconnect");
                continue;
            }
            tracing::error!(error = %e, "heartbeat write failed, closing");
            inner.closed.store(true, Ordering::Release);
            let _ = conn.close().await;
            return;
        }

        let start = Instant::now();
        match echo.recv().await {
            Some(()) => {
                tracing::debug!(rtt = ?start.elapsed(), "heartbeat echo received");
            }
            None => return,
        }
    }
}
