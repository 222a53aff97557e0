//! Sub-streams multiplexed over a parent connection.
//!
//! A [`StreamConn`] is a byte-oriented endpoint keyed by a stream id. It
//! shares the parent connection's writer, flusher, and lifecycle but owns
//! its receive buffer and close flag. Each `write` emits exactly one STREAM
//! frame; `close` emits a STREAMCLOSE frame for the stream's id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

use super::{ConnCore, DEFAULT_BUFFER_SIZE};
use crate::error::{Error, Result};
use crate::protocol::{operations, Message};

/// Shared state of one sub-stream: the receive buffer the reader worker
/// appends into, and the close flag.
pub(crate) struct StreamInner {
    id: u64,
    closed: AtomicBool,
    recv: Mutex<BytesMut>,
    readable: Notify,
}

impl StreamInner {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            recv: Mutex::new(BytesMut::new()),
            readable: Notify::new(),
        }
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        self.readable.notify_waiters();
    }

    pub(crate) fn wake_readers(&self) {
        self.readable.notify_waiters();
    }

    /// Append received payload bytes, growing the buffer in fixed-size
    /// chunks, and wake blocked readers.
    pub(crate) fn push_chunk(&self, chunk: &[u8]) {
        {
            let mut recv = self.recv.lock().unwrap();
            if recv.capacity() - recv.len() < chunk.len() {
                recv.reserve(DEFAULT_BUFFER_SIZE.max(chunk.len()));
            }
            recv.extend_from_slice(chunk);
        }
        self.readable.notify_waiters();
    }
}

/// A byte-oriented logical channel multiplexed over a parent [`Conn`].
///
/// Cheap to clone; clones share the same receive buffer and close flag.
///
/// [`Conn`]: super::Conn
#[derive(Clone)]
pub struct StreamConn {
    core: Arc<ConnCore>,
    inner: Arc<StreamInner>,
}

impl StreamConn {
    pub(crate) fn new(core: Arc<ConnCore>, inner: Arc<StreamInner>) -> Self {
        Self { core, inner }
    }

    /// The stream id, carried in the Id field of every frame this stream
    /// sends and receives.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether the stream was closed, locally or by the peer.
    #[inline]
    pub fn closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Send `content` as a single STREAM frame.
    ///
    /// Fails with [`Error::ConnectionClosed`] when the stream is closed or
    /// the parent connection is no longer CONNECTED. Empty writes send
    /// nothing.
    pub async fn write(&self, content: &[u8]) -> Result<usize> {
        if content.is_empty() {
            return Ok(0);
        }
        let message = Message {
            id: self.inner.id,
            operation: operations::STREAM,
            content_length: content.len() as u64,
            ..Default::default()
        };
        self.core
            .write_frame(&message, Some(content), Some(&self.inner))
            .await?;
        Ok(content.len())
    }

    /// Send STREAM frames from `reader` until EOF, one frame per non-empty
    /// read. EOF counts as success; returns the total number of payload
    /// bytes sent.
    pub async fn read_from<R>(&self, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            if !self.core.connected() {
                return Err(self.core.stored_error());
            }
            if self.closed() {
                return Err(Error::ConnectionClosed);
            }
            let n = reader.read(&mut buf).await.map_err(Error::read)?;
            if n == 0 {
                return Ok(total);
            }
            self.write(&buf[..n]).await?;
            total += n as u64;
        }
    }

    /// Read received bytes into `buf`, waiting until data arrives.
    ///
    /// Fails with [`Error::ConnectionClosed`] when the stream is closed or
    /// the parent connection is no longer CONNECTED.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let mut notified = std::pin::pin!(self.inner.readable.notified());
            notified.as_mut().enable();
            {
                if !self.core.connected() {
                    return Err(Error::ConnectionClosed);
                }
                if self.closed() {
                    return Err(Error::ConnectionClosed);
                }
                let mut recv = self.inner.recv.lock().unwrap();
                if !recv.is_empty() {
                    let n = buf.len().min(recv.len());
                    buf[..n].copy_from_slice(&recv[..n]);
                    recv.advance(n);
                    return Ok(n);
                }
            }
            notified.await;
        }
    }

    /// Drain received bytes into `writer` until the stream closes.
    ///
    /// Data buffered before the close is still delivered; a closed, drained
    /// stream ends the drain with the total byte count. A parent connection
    /// failure surfaces the stored connection error instead.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut total = 0u64;
        loop {
            let mut notified = std::pin::pin!(self.inner.readable.notified());
            notified.as_mut().enable();

            let chunk = {
                let mut recv = self.inner.recv.lock().unwrap();
                if recv.is_empty() {
                    None
                } else {
                    Some(recv.split().freeze())
                }
            };

            match chunk {
                Some(chunk) => {
                    writer.write_all(&chunk).await.map_err(Error::write)?;
                    total += chunk.len() as u64;
                }
                None => {
                    if self.closed() {
                        return Ok(total);
                    }
                    if !self.core.connected() {
                        return Err(self.core.stored_error());
                    }
                    notified.await;
                }
            }
        }
    }

    /// Close the stream: no further local writes are accepted and a
    /// STREAMCLOSE frame is sent for this id. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.readable.notify_waiters();
        self.core.remove_stream(self.inner.id);

        let message = Message {
            id: self.inner.id,
            operation: operations::STREAMCLOSE,
            content_length: 0,
            ..Default::default()
        };
        self.core.write_frame(&message, None, None).await
    }
}
