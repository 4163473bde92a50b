//! Bounded event queue with an explicit overflow policy
//!
//! Pushes never wait. When the queue is full an item is discarded
//! according to [`Overflow`] and counted in [`BoundedQueue::dropped`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// What to discard when a push finds the queue full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// Evict the oldest queued item to make room
    DropOldest,
    /// Keep the queue as is and discard the new item
    DropNewest,
}

/// Multi-producer, single-consumer queue that never blocks producers
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    overflow: Overflow,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize, overflow: Overflow) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            overflow,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Enqueues an item
    ///
    /// Returns `false` when an item had to be discarded, either the evicted
    /// oldest one or `item` itself, or when the queue is closed.
    pub fn push(&self, item: T) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let accepted = {
            let mut items = self.lock();
            if items.len() < self.capacity {
                items.push_back(item);
                true
            } else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if self.overflow == Overflow::DropOldest {
                    items.pop_front();
                    items.push_back(item);
                }
                false
            }
        };

        self.notify.notify_one();
        accepted
    }

    /// Waits for the next item
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            if let Some(item) = self.lock().pop_front() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Takes the next item without waiting
    pub fn try_recv(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Stops accepting items and wakes the consumer
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Discards everything still queued
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items discarded on overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_push_within_capacity() {
        let queue = BoundedQueue::new(3, Overflow::DropOldest);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let queue = BoundedQueue::new(2, Overflow::DropOldest);
        queue.push(1);
        queue.push(2);
        assert!(!queue.push(3));

        assert_eq!(queue.try_recv(), Some(2));
        assert_eq!(queue.try_recv(), Some(3));
        assert_eq!(queue.try_recv(), None);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_drop_newest_keeps_oldest() {
        let queue = BoundedQueue::new(2, Overflow::DropNewest);
        queue.push("a");
        queue.push("b");
        assert!(!queue.push("c"));

        assert_eq!(queue.try_recv(), Some("a"));
        assert_eq!(queue.try_recv(), Some("b"));
        assert_eq!(queue.try_recv(), None);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let queue = BoundedQueue::new(0, Overflow::DropOldest);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.push(7));
    }

    #[test]
    fn test_closed_queue_rejects_pushes() {
        let queue = BoundedQueue::new(2, Overflow::DropOldest);
        queue.close();
        assert!(!queue.push(1));
        assert!(queue.is_empty());
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_recv_waits_for_push() {
        let queue = Arc::new(BoundedQueue::new(4, Overflow::DropOldest));
        let producer = Arc::clone(&queue);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(42);
        });

        let item = tokio::time::timeout(Duration::from_secs(2), queue.recv())
            .await
            .unwrap();
        assert_eq!(item, Some(42));
    }

    #[tokio::test]
    async fn test_recv_drains_then_ends_after_close() {
        let queue = BoundedQueue::new(4, Overflow::DropOldest);
        queue.push(1);
        queue.close();

        assert_eq!(queue.recv().await, Some(1));
        assert_eq!(queue.recv().await, None);
    }
}
