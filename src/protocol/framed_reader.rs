//! Framed reader over a streaming byte source.
//!
//! Pulls complete headers and payloads out of an `AsyncRead`, keeping
//! partial reads in an internal scratch buffer. The three dispatch cases of
//! the connection's reader worker map onto three short operations here:
//!
//! - [`FramedReader::next_message`] — decode the next header,
//! - [`FramedReader::read_payload`] — collect a payload into one owned
//!   allocation of exactly the payload's length,
//! - [`FramedReader::copy_payload`] — stream a payload chunk-wise into a
//!   caller-supplied sink (used for sub-stream receive buffers).
//!
//! On a magic mismatch the buffered region is abandoned and parsing
//! resynchronizes at the next read cycle.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::wire_format::{Message, MESSAGE_SIZE};
use crate::error::{Error, Result};

/// Scratch capacity kept available for every read from the stream.
pub const DEFAULT_READ_CHUNK: usize = 1 << 19;

fn eof() -> Error {
    Error::read(std::io::Error::from(std::io::ErrorKind::UnexpectedEof))
}

/// Buffered frame parser over an `AsyncRead`.
pub struct FramedReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    /// Create a framed reader with the default scratch capacity.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(DEFAULT_READ_CHUNK),
        }
    }

    /// Read once from the stream into the scratch buffer.
    ///
    /// An end-of-stream read surfaces as `UnexpectedEof` so the connection
    /// can distinguish it from a hard I/O failure.
    async fn fill(&mut self) -> Result<()> {
        self.buf.reserve(DEFAULT_READ_CHUNK);
        let n = self
            .reader
            .read_buf(&mut self.buf)
            .await
            .map_err(Error::read)?;
        if n == 0 {
            return Err(eof());
        }
        Ok(())
    }

    /// Decode the next header from the stream.
    ///
    /// Returns [`Error::InvalidFrame`] when the reserved prefix does not
    /// match; the buffered region has then been discarded and the next call
    /// starts from a fresh read.
    pub async fn next_message(&mut self) -> Result<Message> {
        while self.buf.len() < MESSAGE_SIZE {
            self.fill().await?;
        }
        match Message::decode(&self.buf[..MESSAGE_SIZE]) {
            Ok(message) => {
                self.buf.advance(MESSAGE_SIZE);
                Ok(message)
            }
            Err(e) => {
                self.buf.clear();
                Err(e)
            }
        }
    }

    /// Collect exactly `len` payload bytes into a single owned buffer.
    ///
    /// Fills first from the scratch buffer, then reads the remainder
    /// directly from the stream. No allocation beyond the payload itself.
    pub async fn read_payload(&mut self, len: usize) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(len);
        let take = len.min(self.buf.len());
        out.extend_from_slice(&self.buf[..take]);
        self.buf.advance(take);

        while out.len() < len {
            let remaining = len - out.len();
            let n = self
                .reader
                .read_buf(&mut (&mut out).limit(remaining))
                .await
                .map_err(Error::read)?;
            if n == 0 {
                return Err(eof());
            }
        }
        Ok(out.freeze())
    }

    /// Stream exactly `len` payload bytes into `sink`, chunk by chunk.
    ///
    /// Buffered bytes are drained first; the rest is copied as it arrives
    /// from the stream without collecting the payload in one place.
    pub async fn copy_payload<F>(&mut self, len: usize, mut sink: F) -> Result<()>
    where
        F: FnMut(&[u8]),
    {
        let mut remaining = len;
        loop {
            let take = remaining.min(self.buf.len());
            if take > 0 {
                sink(&self.buf[..take]);
                self.buf.advance(take);
                remaining -= take;
            }
            if remaining == 0 {
                return Ok(());
            }
            self.fill().await?;
        }
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Abandon the buffered region so parsing resynchronizes at the next
    /// read cycle.
    pub fn resync(&mut self) {
        self.buf.clear();
    }

    /// Consume the reader and return the underlying stream. Buffered but
    /// unparsed bytes are dropped.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn frame(message: &Message, payload: &[u8]) -> Vec<u8> {
        let mut bytes = message.encode().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    fn message(id: u64, operation: u32, content_length: u64) -> Message {
        Message {
            id,
            operation,
            content_length,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_single_frame() {
        let bytes = frame(&message(1, 16, 5), b"hello");
        let mut reader = FramedReader::new(&bytes[..]);

        let decoded = reader.next_message().await.unwrap();
        assert_eq!(decoded.id, 1);
        let payload = reader.read_payload(5).await.unwrap();
        assert_eq!(&payload[..], b"hello");
    }

    #[tokio::test]
    async fn test_multiple_frames_in_one_segment() {
        let mut bytes = frame(&message(1, 16, 5), b"first");
        bytes.extend(frame(&message(2, 16, 6), b"second"));
        bytes.extend(frame(&message(3, 16, 0), b""));
        let mut reader = FramedReader::new(&bytes[..]);

        let m1 = reader.next_message().await.unwrap();
        assert_eq!(m1.id, 1);
        assert_eq!(&reader.read_payload(5).await.unwrap()[..], b"first");

        let m2 = reader.next_message().await.unwrap();
        assert_eq!(m2.id, 2);
        assert_eq!(&reader.read_payload(6).await.unwrap()[..], b"second");

        let m3 = reader.next_message().await.unwrap();
        assert_eq!(m3.id, 3);
        assert_eq!(m3.content_length, 0);
    }

    #[tokio::test]
    async fn test_header_split_across_reads() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FramedReader::new(rx);

        let bytes = frame(&message(7, 16, 4), b"data");
        let (head, tail) = bytes.split_at(13);

        let head = head.to_vec();
        let tail = tail.to_vec();
        let writer = tokio::spawn(async move {
            tx.write_all(&head).await.unwrap();
            tokio::task::yield_now().await;
            tx.write_all(&tail).await.unwrap();
        });

        let decoded = reader.next_message().await.unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(&reader.read_payload(4).await.unwrap()[..], b"data");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_payload_larger_than_read_chunk() {
        let payload: Vec<u8> = (0..DEFAULT_READ_CHUNK * 2 + 17)
            .map(|i| (i % 251) as u8)
            .collect();
        let bytes = frame(&message(1, 16, payload.len() as u64), &payload);
        let mut reader = FramedReader::new(&bytes[..]);

        reader.next_message().await.unwrap();
        let decoded = reader.read_payload(payload.len()).await.unwrap();
        assert_eq!(&decoded[..], &payload[..]);
    }

    #[tokio::test]
    async fn test_copy_payload_chunked() {
        let payload = vec![0xAB; 100_000];
        let bytes = frame(&message(1, 2, payload.len() as u64), &payload);
        let mut reader = FramedReader::new(&bytes[..]);

        reader.next_message().await.unwrap();
        let mut collected = Vec::new();
        reader
            .copy_payload(payload.len(), |chunk| collected.extend_from_slice(chunk))
            .await
            .unwrap();
        assert_eq!(collected, payload);
    }

    #[tokio::test]
    async fn test_bad_magic_resynchronizes() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        let mut reader = FramedReader::new(rx);

        tx.write_all(&[0u8; MESSAGE_SIZE]).await.unwrap();
        assert!(matches!(
            reader.next_message().await,
            Err(Error::InvalidFrame)
        ));
        assert_eq!(reader.buffered(), 0);

        tx.write_all(&frame(&message(5, 16, 2), b"ok")).await.unwrap();
        let decoded = reader.next_message().await.unwrap();
        assert_eq!(decoded.id, 5);
        assert_eq!(&reader.read_payload(2).await.unwrap()[..], b"ok");
    }

    #[tokio::test]
    async fn test_eof_mid_header() {
        let bytes = message(1, 16, 0).encode();
        let mut reader = FramedReader::new(&bytes[..MESSAGE_SIZE - 3]);

        match reader.next_message().await {
            Err(Error::Read(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected eof, got {:?}", other.map(|m| m.id)),
        }
    }

    #[tokio::test]
    async fn test_eof_mid_payload() {
        let bytes = frame(&message(1, 16, 10), b"short");
        let mut reader = FramedReader::new(&bytes[..]);

        reader.next_message().await.unwrap();
        match reader.read_payload(10).await {
            Err(Error::Read(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected eof, got {:?}", other.map(|b| b.len())),
        }
    }
}
