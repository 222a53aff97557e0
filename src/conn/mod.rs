//! Connection engine.
//!
//! A [`Conn`] owns one reliable byte stream and runs the full-duplex frame
//! pipeline on top of it: outbound messages are encoded into a shared write
//! buffer and drained by a background flusher on coalesced wake signals,
//! while a background reader parses inbound frames and demultiplexes them
//! into either the per-connection incoming queue (regular operations) or
//! per-stream receive buffers (STREAM frames).
//!
//! # Architecture
//!
//! ```text
//! write_message ──► write buffer ──► flusher task ──► stream
//!                        ▲ wake
//! stream ──► reader task ──► incoming queue ──► read_message
//!                       └──► sub-stream receive buffers
//! ```
//!
//! # State machine
//!
//! `CONNECTED → PAUSED` on a recoverable stream error (EOF, closed pipe),
//! `CONNECTED → CLOSED` on graceful close or any other I/O error,
//! `PAUSED → CLOSED` on close. Exactly one caller wins the transition,
//! stores the canonical error, and performs the shutdown work; afterwards
//! every API call returns the stored error without touching the stream.

mod stream;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use bytes::BytesMut;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::options::TlsOptions;
use crate::protocol::{operations, FramedReader, Message, Packet};
use crate::queue::{PacketQueue, DEFAULT_QUEUE_CAPACITY};

pub use stream::StreamConn;
use stream::StreamInner;

/// Size of the shared write buffer; writes past this point flush inline.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 19;

/// Capacity of the new-stream announcement channel. Announcements are
/// dropped, not blocked on, when the consumer is not listening.
const STREAM_CHANNEL_CAPACITY: usize = 1024;

const CONNECTED: u8 = 0;
const CLOSED: u8 = 1;
const PAUSED: u8 = 2;

/// Marker trait for streams the engine can drive.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawStream for T {}

/// Type-erased reliable byte stream.
pub type BoxedStream = Box<dyn RawStream>;

/// Which task is performing a shutdown; its own join handle is skipped when
/// waiting for the workers to exit.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Worker {
    App,
    Reader,
    Flusher,
}

struct WriteState {
    buf: BytesMut,
    stream: Option<WriteHalf<BoxedStream>>,
}

pub(crate) struct ConnCore {
    state: AtomicU8,
    last_error: RwLock<Error>,
    write: Mutex<WriteState>,
    flusher: StdMutex<Option<mpsc::Sender<()>>>,
    incoming: PacketQueue,
    streams: RwLock<HashMap<u64, Arc<StreamInner>>>,
    stream_tx: StdMutex<Option<mpsc::Sender<Arc<StreamInner>>>>,
    stream_rx: Mutex<mpsc::Receiver<Arc<StreamInner>>>,
    shutdown_tx: watch::Sender<bool>,
    read_half: Mutex<Option<ReadHalf<BoxedStream>>>,
    tasks: StdMutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
    span: tracing::Span,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

impl ConnCore {
    #[inline]
    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn connected(&self) -> bool {
        self.state() == CONNECTED
    }

    fn store_error(&self, err: Error) {
        *self.last_error.write().unwrap() = err;
    }

    pub(crate) fn stored_error(&self) -> Error {
        self.last_error.read().unwrap().clone()
    }

    fn wake_flusher(&self) {
        if let Some(tx) = self.flusher.lock().unwrap().as_ref() {
            let _ = tx.try_send(());
        }
    }

    /// Append one encoded frame (header, then payload) to the write buffer
    /// under the writer mutex and post a flush wake.
    ///
    /// `stream_guard`, when present, rejects the write if the sub-stream was
    /// closed; the check happens under the same mutex as the write so no
    /// frame can slip out after a close.
    pub(crate) async fn write_frame(
        &self,
        message: &Message,
        content: Option<&[u8]>,
        stream_guard: Option<&StreamInner>,
    ) -> Result<()> {
        let encoded = message.encode();

        let mut w = self.write.lock().await;
        if !self.connected() {
            return Err(self.stored_error());
        }
        if let Some(guard) = stream_guard {
            if guard.is_closed() {
                return Err(Error::ConnectionClosed);
            }
        }

        w.buf.extend_from_slice(&encoded);
        if let Some(content) = content {
            w.buf.extend_from_slice(content);
        }

        if w.buf.len() >= DEFAULT_BUFFER_SIZE {
            if let Err(e) = flush_write_state(&mut w).await {
                drop(w);
                return Err(self.fail(Error::write(e), Worker::App).await);
            }
        }
        drop(w);

        self.wake_flusher();
        Ok(())
    }

    /// Look up a sub-stream, creating and announcing it when a STREAM frame
    /// arrives for a previously-unseen id.
    fn stream_for_remote(&self, id: u64) -> Arc<StreamInner> {
        if let Some(inner) = self.streams.read().unwrap().get(&id) {
            return inner.clone();
        }
        let mut map = self.streams.write().unwrap();
        match map.entry(id) {
            std::collections::hash_map::Entry::Occupied(e) => e.get().clone(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let inner = Arc::new(StreamInner::new(id));
                e.insert(inner.clone());
                if let Some(tx) = self.stream_tx.lock().unwrap().as_ref() {
                    let _ = tx.try_send(inner.clone());
                }
                inner
            }
        }
    }

    /// Register a locally-created sub-stream. Not announced on the
    /// new-stream channel.
    fn stream_for_local(&self, id: u64) -> Arc<StreamInner> {
        let mut map = self.streams.write().unwrap();
        map.entry(id)
            .or_insert_with(|| Arc::new(StreamInner::new(id)))
            .clone()
    }

    pub(crate) fn remove_stream(&self, id: u64) -> Option<Arc<StreamInner>> {
        self.streams.write().unwrap().remove(&id)
    }

    /// Transition on an error and store the canonical result.
    ///
    /// EOF and closed-pipe pause the connection for a later reconnect; any
    /// other error closes it. Exactly one caller performs the shutdown;
    /// everyone else observes the stored error.
    async fn fail(&self, err: Error, from: Worker) -> Error {
        if err.is_recoverable() {
            if self.transition(CONNECTED, PAUSED) {
                self.store_error(Error::ConnectionPaused);
                self.span.in_scope(|| {
                    tracing::debug!(error = %err, "recoverable stream error, pausing connection");
                });
                self.kill_workers(from).await;
                Error::ConnectionPaused
            } else {
                self.stored_error()
            }
        } else if self.transition(CONNECTED, CLOSED) {
            self.store_error(err.clone());
            self.span.in_scope(|| {
                tracing::debug!(error = %err, "closing connection with error");
            });
            self.kill_workers(from).await;
            let mut w = self.write.lock().await;
            if let Some(stream) = w.stream.as_mut() {
                let _ = stream.shutdown().await;
            }
            err
        } else {
            self.stored_error()
        }
    }

    /// Shut the background workers down:
    ///
    /// 1. close the incoming queue (unblocks the consumer),
    /// 2. drop the flusher wake channel (the flusher returns),
    /// 3. signal the reader's cancellation channel,
    /// 4. wake every sub-stream waiter so it re-checks the state,
    /// 5. wait for both workers to exit (skipping the caller's own task).
    async fn kill_workers(&self, from: Worker) {
        self.incoming.close();
        drop(self.flusher.lock().unwrap().take());
        drop(self.stream_tx.lock().unwrap().take());
        let _ = self.shutdown_tx.send(true);
        for inner in self.streams.read().unwrap().values() {
            inner.wake_readers();
        }

        let taken = self.tasks.lock().unwrap().take();
        if let Some((flusher, reader)) = taken {
            if from != Worker::Flusher {
                let _ = flusher.await;
            }
            if from != Worker::Reader {
                let _ = reader.await;
            }
        }
    }
}

/// Drain the write buffer into the stream. Called under the writer mutex.
async fn flush_write_state(w: &mut WriteState) -> io::Result<()> {
    if w.buf.is_empty() {
        return Ok(());
    }
    let stream = w
        .stream
        .as_mut()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream detached"))?;
    let chunk = w.buf.split();
    stream.write_all(&chunk).await?;
    stream.flush().await
}

/// Flusher worker: drains the write buffer on each wake signal. Multiple
/// signals coalesce to one flush. Exits when the wake channel closes.
async fn flush_loop(core: Arc<ConnCore>, mut wake: mpsc::Receiver<()>) {
    while wake.recv().await.is_some() {
        let mut w = core.write.lock().await;
        if !w.buf.is_empty() {
            if let Err(e) = flush_write_state(&mut w).await {
                drop(w);
                core.fail(Error::write(e), Worker::Flusher).await;
                return;
            }
        }
    }
}

/// Reader worker: parses inbound frames until cancelled or the stream
/// errors, then hands the read half back for [`Conn::raw`].
async fn read_loop(
    core: Arc<ConnCore>,
    mut reader: FramedReader<ReadHalf<BoxedStream>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            res = process_frame(&core, &mut reader) => {
                if let Err(e) = res {
                    core.fail(e, Worker::Reader).await;
                    break;
                }
            }
        }
    }
    *core.read_half.lock().await = Some(reader.into_inner());
}

/// Parse and dispatch a single inbound frame.
///
/// A framing error (bad magic, STREAMCLOSE claiming a payload) is logged
/// and the parser resynchronizes; it does not end the worker. Everything
/// else that fails routes the error back to the caller.
async fn process_frame(
    core: &Arc<ConnCore>,
    reader: &mut FramedReader<ReadHalf<BoxedStream>>,
) -> Result<()> {
    let message = match reader.next_message().await {
        Ok(message) => message,
        Err(Error::InvalidFrame) => {
            tracing::error!("invalid frame prefix, resynchronizing");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    match message.operation {
        operations::STREAMCLOSE => {
            if message.content_length != 0 {
                tracing::error!(
                    id = message.id,
                    content_length = message.content_length,
                    "STREAMCLOSE with payload, resynchronizing"
                );
                reader.resync();
                return Ok(());
            }
            if let Some(inner) = core.remove_stream(message.id) {
                inner.mark_closed();
            }
        }
        operations::STREAM if message.content_length > 0 => {
            let len = usize::try_from(message.content_length)
                .map_err(|_| Error::InvalidBufferLength)?;
            let inner = core.stream_for_remote(message.id);
            reader
                .copy_payload(len, |chunk| inner.push_chunk(chunk))
                .await?;
        }
        _ => {
            let content = if message.content_length > 0 {
                let len = usize::try_from(message.content_length)
                    .map_err(|_| Error::InvalidBufferLength)?;
                reader.read_payload(len).await?
            } else {
                bytes::Bytes::new()
            };
            core.incoming.push(Packet { message, content }).await?;
        }
    }
    Ok(())
}

fn apply_keep_alive(stream: &TcpStream, interval: Duration) {
    let keepalive = TcpKeepalive::new()
        .with_time(interval)
        .with_interval(interval);
    let _ = SockRef::from(stream).set_tcp_keepalive(&keepalive);
}

/// A frisbee connection over a reliable byte stream.
///
/// Cheap to clone; all clones share the same engine. Not meant to be used
/// on its own so much as by the [`Client`](crate::Client) and by
/// server-side accept loops, but the full API is public.
#[derive(Clone)]
pub struct Conn {
    core: Arc<ConnCore>,
}

impl Conn {
    /// Dial `addr` over TCP (optionally completing a TLS handshake) and
    /// wrap the stream in a connection.
    ///
    /// TCP keepalive probes are enabled at `keep_alive`; `span` scopes all
    /// of the connection's log output.
    pub async fn connect(
        addr: &str,
        keep_alive: Duration,
        span: tracing::Span,
        tls: Option<&TlsOptions>,
    ) -> Result<Conn> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Dial(Arc::new(e)))?;
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();
        let _ = stream.set_nodelay(true);
        apply_keep_alive(&stream, keep_alive);

        let boxed: BoxedStream = match tls {
            Some(tls) => {
                let connector = TlsConnector::from(tls.config.clone());
                let stream = connector
                    .connect(tls.server_name.clone(), stream)
                    .await
                    .map_err(|e| Error::Dial(Arc::new(e)))?;
                Box::new(stream)
            }
            None => Box::new(stream),
        };

        Ok(Self::wrap_inner(boxed, span, local_addr, peer_addr))
    }

    /// Adopt an already-connected stream and spawn the engine workers.
    pub fn wrap(stream: BoxedStream, span: tracing::Span) -> Conn {
        Self::wrap_inner(stream, span, None, None)
    }

    /// Adopt an accepted TCP stream, capturing its addresses and enabling
    /// TCP_NODELAY.
    pub fn wrap_tcp(stream: TcpStream, span: tracing::Span) -> Conn {
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();
        let _ = stream.set_nodelay(true);
        Self::wrap_inner(Box::new(stream), span, local_addr, peer_addr)
    }

    fn wrap_inner(
        stream: BoxedStream,
        span: tracing::Span,
        local_addr: Option<SocketAddr>,
        peer_addr: Option<SocketAddr>,
    ) -> Conn {
        let (read_half, write_half) = split(stream);
        let (flush_tx, flush_rx) = mpsc::channel(1);
        let (stream_tx, stream_rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let core = Arc::new(ConnCore {
            state: AtomicU8::new(CONNECTED),
            last_error: RwLock::new(Error::ConnectionClosed),
            write: Mutex::new(WriteState {
                buf: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
                stream: Some(write_half),
            }),
            flusher: StdMutex::new(Some(flush_tx)),
            incoming: PacketQueue::new(DEFAULT_QUEUE_CAPACITY),
            streams: RwLock::new(HashMap::new()),
            stream_tx: StdMutex::new(Some(stream_tx)),
            stream_rx: Mutex::new(stream_rx),
            shutdown_tx,
            read_half: Mutex::new(None),
            tasks: StdMutex::new(None),
            span: span.clone(),
            local_addr,
            peer_addr,
        });

        let flusher = tokio::spawn(flush_loop(core.clone(), flush_rx).instrument(span.clone()));
        let reader = tokio::spawn(
            read_loop(core.clone(), FramedReader::new(read_half), shutdown_rx).instrument(span),
        );
        core.tasks.lock().unwrap().replace((flusher, reader));

        Conn { core }
    }

    /// Queue a message (and its optional payload) for asynchronous sending.
    ///
    /// `content` must be `None` exactly when `message.content_length == 0`,
    /// and its length must match `content_length` otherwise; a mismatch
    /// fails with [`Error::InvalidContentLength`] without side effects.
    /// Header and payload are written under one critical section, so frames
    /// never interleave on the wire.
    pub async fn write_message(&self, message: &Message, content: Option<&[u8]>) -> Result<()> {
        match content {
            Some(content) if content.len() as u64 != message.content_length => {
                return Err(Error::InvalidContentLength)
            }
            None if message.content_length != 0 => return Err(Error::InvalidContentLength),
            _ => {}
        }
        self.core.write_frame(message, content, None).await
    }

    /// Wait for the next inbound packet.
    ///
    /// Returns the stored connection error immediately when the connection
    /// is no longer CONNECTED.
    pub async fn read_message(&self) -> Result<Packet> {
        if !self.core.connected() {
            return Err(self.core.stored_error());
        }
        match self.core.incoming.pop().await {
            Ok(packet) => Ok(packet),
            Err(e) => {
                if !self.core.connected() {
                    Err(self.core.stored_error())
                } else {
                    Err(self.core.fail(e, Worker::App).await)
                }
            }
        }
    }

    /// Synchronously drain the write buffer. A no-op when nothing is
    /// buffered.
    pub async fn flush(&self) -> Result<()> {
        let mut w = self.core.write.lock().await;
        if w.buf.is_empty() {
            return Ok(());
        }
        if let Err(e) = flush_write_state(&mut w).await {
            drop(w);
            return Err(self.core.fail(Error::write(e), Worker::App).await);
        }
        Ok(())
    }

    /// Number of bytes currently sitting in the write buffer; 0 when the
    /// connection is not CONNECTED. The heartbeat uses this to suppress
    /// pings while data is already in flight.
    pub async fn write_buffer_size(&self) -> usize {
        let w = self.core.write.lock().await;
        if self.core.connected() {
            w.buf.len()
        } else {
            0
        }
    }

    /// Create (or look up) a locally-owned sub-stream with the given id.
    pub fn new_stream_conn(&self, id: u64) -> StreamConn {
        let inner = self.core.stream_for_local(id);
        StreamConn::new(self.core.clone(), inner)
    }

    /// Wait for the next sub-stream opened by the peer.
    ///
    /// Returns `None` once the connection has shut down and all pending
    /// announcements were delivered.
    pub async fn next_stream_conn(&self) -> Option<StreamConn> {
        let mut rx = self.core.stream_rx.lock().await;
        rx.recv()
            .await
            .map(|inner| StreamConn::new(self.core.clone(), inner))
    }

    /// Disable the engine and return the underlying stream.
    ///
    /// Transitions to CLOSED without closing the stream, flushes buffered
    /// writes, and reunites the split halves. Bytes the reader had buffered
    /// but not yet parsed are dropped.
    pub async fn raw(&self) -> Result<BoxedStream> {
        let core = &self.core;
        if core.transition(CONNECTED, CLOSED) {
            core.store_error(Error::ConnectionClosed);
            core.kill_workers(Worker::App).await;
        } else if core.transition(PAUSED, CLOSED) {
            core.store_error(Error::ConnectionClosed);
        }

        let read_half = core
            .read_half
            .lock()
            .await
            .take()
            .ok_or(Error::ConnectionNotInitialized)?;
        let mut w = core.write.lock().await;
        let _ = flush_write_state(&mut w).await;
        let write_half = w.stream.take().ok_or(Error::ConnectionNotInitialized)?;
        Ok(read_half.unsplit(write_half))
    }

    /// Close the connection gracefully. Idempotent: closing an already
    /// closed connection succeeds.
    ///
    /// Both background workers have exited by the time this returns.
    pub async fn close(&self) -> Result<()> {
        let core = &self.core;
        if core.transition(CONNECTED, CLOSED) {
            core.store_error(Error::ConnectionClosed);
            core.kill_workers(Worker::App).await;
            let mut w = core.write.lock().await;
            let _ = flush_write_state(&mut w).await;
            if let Some(stream) = w.stream.as_mut() {
                let _ = stream.shutdown().await;
            }
            Ok(())
        } else if core.transition(PAUSED, CLOSED) {
            core.store_error(Error::ConnectionClosed);
            let mut w = core.write.lock().await;
            if let Some(stream) = w.stream.as_mut() {
                let _ = stream.shutdown().await;
            }
            Ok(())
        } else {
            Ok(())
        }
    }

    /// The error that caused the connection to pause or close; `None` while
    /// CONNECTED.
    pub fn error(&self) -> Option<Error> {
        if self.core.connected() {
            None
        } else {
            Some(self.core.stored_error())
        }
    }

    /// Whether the connection is in the CONNECTED state.
    pub fn is_connected(&self) -> bool {
        self.core.connected()
    }

    /// Span scoping this connection's log output.
    pub fn span(&self) -> &tracing::Span {
        &self.core.span
    }

    /// Local address of the underlying TCP stream, when known.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.core.local_addr
    }

    /// Remote address of the underlying TCP stream, when known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.core.peer_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn pair() -> (Conn, Conn) {
        let (a, b) = tokio::io::duplex(1 << 20);
        (
            Conn::wrap(Box::new(a), tracing::Span::none()),
            Conn::wrap(Box::new(b), tracing::Span::none()),
        )
    }

    #[tokio::test]
    async fn test_message_roundtrip_in_order() {
        let (a, b) = pair();
        for id in 1..=20u64 {
            let message = Message {
                id,
                operation: 16,
                content_length: 0,
                ..Default::default()
            };
            a.write_message(&message, None).await.unwrap();
        }
        for id in 1..=20u64 {
            let packet = b.read_message().await.unwrap();
            assert_eq!(packet.message.id, id);
            assert!(packet.content.is_empty());
        }
        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_payload_roundtrip() {
        let (a, b) = pair();
        let payload: Vec<u8> = (0..4096).map(|i| (i % 256) as u8).collect();
        let message = Message {
            id: 42,
            operation: 17,
            content_length: payload.len() as u64,
            ..Default::default()
        };
        a.write_message(&message, Some(&payload)).await.unwrap();

        let packet = b.read_message().await.unwrap();
        assert_eq!(packet.message, message);
        assert_eq!(&packet.content[..], &payload[..]);
        a.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_content_length_has_no_side_effects() {
        let (a, b) = pair();
        let message = Message {
            operation: 16,
            content_length: 5,
            ..Default::default()
        };
        assert!(matches!(
            a.write_message(&message, Some(b"abc")).await,
            Err(Error::InvalidContentLength)
        ));
        assert!(matches!(
            a.write_message(&message, None).await,
            Err(Error::InvalidContentLength)
        ));

        // The connection is still usable.
        let ok = Message {
            id: 1,
            operation: 16,
            content_length: 0,
            ..Default::default()
        };
        a.write_message(&ok, None).await.unwrap();
        assert_eq!(b.read_message().await.unwrap().message.id, 1);
        a.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_stores_error() {
        let (a, _b) = pair();
        a.close().await.unwrap();
        a.close().await.unwrap();
        assert!(matches!(a.error(), Some(Error::ConnectionClosed)));
        assert!(matches!(
            a.write_message(&Message::default(), None).await,
            Err(Error::ConnectionClosed)
        ));
        assert!(matches!(
            a.read_message().await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_peer_drop_pauses_connection() {
        let (raw_a, b) = tokio::io::duplex(4096);
        let conn = Conn::wrap(Box::new(b), tracing::Span::none());

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.read_message().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        drop(raw_a);

        assert!(matches!(
            reader.await.unwrap(),
            Err(Error::ConnectionPaused)
        ));
        assert!(matches!(conn.error(), Some(Error::ConnectionPaused)));

        conn.close().await.unwrap();
        assert!(matches!(conn.error(), Some(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_flush_without_writes_is_noop() {
        let (a, _b) = pair();
        a.flush().await.unwrap();
        assert_eq!(a.write_buffer_size().await, 0);
        a.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_raw_recovers_stream() {
        let (a, raw_b) = tokio::io::duplex(4096);
        let conn = Conn::wrap(Box::new(a), tracing::Span::none());
        let mut peer = raw_b;

        let message = Message {
            id: 3,
            operation: 16,
            ..Default::default()
        };
        conn.write_message(&message, None).await.unwrap();
        conn.flush().await.unwrap();

        let mut stream = conn.raw().await.unwrap();
        stream.write_all(b"xyz").await.unwrap();
        stream.flush().await.unwrap();

        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; crate::protocol::MESSAGE_SIZE + 3];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[crate::protocol::MESSAGE_SIZE..], b"xyz");
    }

    #[tokio::test]
    async fn test_heartbeat_frame_delivered() {
        let (a, b) = pair();
        let message = Message {
            operation: operations::HEARTBEAT,
            ..Default::default()
        };
        a.write_message(&message, None).await.unwrap();
        let packet = b.read_message().await.unwrap();
        assert_eq!(packet.operation(), operations::HEARTBEAT);
        assert_eq!(packet.content, Bytes::new());
        a.close().await.unwrap();
    }
}
