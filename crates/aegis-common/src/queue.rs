//! Bounded async work queue
//!
//! Single-producer-friendly, single-consumer drain used by the learning
//! pipeline's hot path. `push` is synchronous and never blocks: on overflow
//! the oldest pending item is dropped and a warning emitted, because safety
//! work takes precedence over learning completeness.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

/// Bounded FIFO queue with drop-oldest overflow behavior
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    total_enqueued: AtomicU64,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        BoundedQueue {
            items: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            total_enqueued: AtomicU64::new(0),
        }
    }

    /// Enqueue an item without blocking. Returns `false` when the queue is
    /// closed; on overflow the oldest item is evicted.
    pub fn push(&self, item: T) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                items.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "learning queue overflow, dropped oldest item");
            }
            items.push_back(item);
        }
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        true
    }

    /// Await the next item. Returns `None` once the queue is closed and
    /// fully drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut items = self.items.lock();
                if let Some(item) = items.pop_front() {
                    return Some(item);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue. Pending items remain poppable; further pushes are
    /// rejected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Items evicted by overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Items accepted since creation
    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn fifo_order_preserved() {
        let q = BoundedQueue::new(8);
        for i in 0..5 {
            assert!(q.push(i));
        }
        for i in 0..5 {
            assert_eq!(q.pop().await, Some(i));
        }
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let q = BoundedQueue::new(3);
        for i in 0..5 {
            q.push(i);
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.dropped(), 2);
        // 0 and 1 were evicted
        assert_eq!(q.pop().await, Some(2));
        assert_eq!(q.pop().await, Some(3));
        assert_eq!(q.pop().await, Some(4));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let q = Arc::new(BoundedQueue::new(8));
        q.push(1);
        q.push(2);
        q.close();
        assert!(!q.push(3));
        assert_eq!(q.pop().await, Some(1));
        assert_eq!(q.pop().await, Some(2));
        assert_eq!(q.pop().await, None);
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let q = Arc::new(BoundedQueue::new(4));
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.pop().await });
        tokio::task::yield_now().await;
        q.push(42);
        assert_eq!(waiter.await.unwrap(), Some(42));
    }
}
