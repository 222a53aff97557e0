//! Bounded packet queue decoupling the reader worker from the consumer.
//!
//! Fixed-capacity FIFO with close semantics: `push` blocks while full and
//! fails once closed, `pop` blocks while empty and drains remaining items
//! before failing after close. Safe for any number of producers and
//! consumers; the connection uses one of each.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::protocol::Packet;

/// Default queue capacity in packets.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1 << 10;

struct Inner {
    items: VecDeque<Packet>,
    closed: bool,
}

pub(crate) struct PacketQueue {
    capacity: usize,
    inner: Mutex<Inner>,
    not_empty: Notify,
    not_full: Notify,
}

impl PacketQueue {
    /// Create a queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of two");
        Self {
            capacity,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Append a packet, waiting for space while the queue is full.
    ///
    /// Fails with [`Error::QueueClosed`] once the queue is closed.
    pub async fn push(&self, packet: Packet) -> Result<()> {
        let mut packet = Some(packet);
        loop {
            let mut notified = pin!(self.not_full.notified());
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.closed {
                    return Err(Error::QueueClosed);
                }
                if inner.items.len() < self.capacity {
                    inner.items.push_back(packet.take().unwrap());
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Remove and return the head packet, waiting while the queue is empty.
    ///
    /// After close, remaining items are still delivered; once drained, fails
    /// with [`Error::QueueClosed`].
    pub async fn pop(&self) -> Result<Packet> {
        loop {
            let mut notified = pin!(self.not_empty.notified());
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(packet) = inner.items.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Ok(packet);
                }
                if inner.closed {
                    return Err(Error::QueueClosed);
                }
            }
            notified.await;
        }
    }

    /// Close the queue, waking all blocked producers and consumers.
    /// Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::protocol::Message;

    fn packet(id: u64) -> Packet {
        Packet::empty(Message {
            id,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = PacketQueue::new(8);
        for id in 0..5 {
            queue.push(packet(id)).await.unwrap();
        }
        for id in 0..5 {
            assert_eq!(queue.pop().await.unwrap().message.id, id);
        }
    }

    #[tokio::test]
    async fn test_pop_blocks_until_push() {
        let queue = Arc::new(PacketQueue::new(2));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.unwrap().message.id })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(packet(77)).await.unwrap();
        assert_eq!(consumer.await.unwrap(), 77);
    }

    #[tokio::test]
    async fn test_push_blocks_while_full() {
        let queue = Arc::new(PacketQueue::new(2));
        queue.push(packet(1)).await.unwrap();
        queue.push(packet(2)).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(packet(3)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.pop().await.unwrap().message.id, 1);
        producer.await.unwrap().unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_push_after_close_fails() {
        let queue = PacketQueue::new(2);
        queue.close();
        assert!(matches!(
            queue.push(packet(1)).await,
            Err(Error::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_pop_drains_then_fails_after_close() {
        let queue = PacketQueue::new(4);
        queue.push(packet(1)).await.unwrap();
        queue.push(packet(2)).await.unwrap();
        queue.close();

        assert_eq!(queue.pop().await.unwrap().message.id, 1);
        assert_eq!(queue.pop().await.unwrap().message.id, 2);
        assert!(matches!(queue.pop().await, Err(Error::QueueClosed)));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_pop() {
        let queue = Arc::new(PacketQueue::new(2));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        assert!(matches!(consumer.await.unwrap(), Err(Error::QueueClosed)));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_push() {
        let queue = Arc::new(PacketQueue::new(2));
        queue.push(packet(1)).await.unwrap();
        queue.push(packet(2)).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(packet(3)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        assert!(matches!(producer.await.unwrap(), Err(Error::QueueClosed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let queue = PacketQueue::new(2);
        queue.close();
        queue.close();
        assert!(matches!(queue.pop().await, Err(Error::QueueClosed)));
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_capacity_must_be_power_of_two() {
        let _ = PacketQueue::new(3);
    }
}
