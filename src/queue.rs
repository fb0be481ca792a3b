//! The bounded MPSC conveyor between producers and the writer worker
//! and the four backpressure policies applied when it's
//! full.
//!
//! Built on `Mutex<VecDeque<_>>` plus a `Condvar`-style wakeup rather
//! than a channel crate, because `DropOldest` needs to reach in and
//! remove the front element — a bounded MPSC channel type does not
//! expose that.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;

/// One slot in the queue: a serialized record, an explicit-flush
/// sentinel carrying the ticket the requester is waiting on, or the
/// shutdown sentinel.
#[derive(Debug, Clone)]
pub enum QueueItem {
    Record(Bytes),
    Flush(u64),
    Shutdown,
}

/// Backpressure policy applied on enqueue when the queue is at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    Block,
    DropOldest,
    DropNewest,
    Warn,
}

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// The new item was rejected (`DropNewest`/`Warn` under pressure).
    Rejected,
    /// The new item was enqueued after evicting the oldest item
    /// (`DropOldest`).
    EnqueuedAfterEvicting,
}

struct Inner {
    items: Mutex<VecDeque<QueueItem>>,
    not_empty: Condvar,
}

/// A bounded, multi-producer / single-consumer queue of serialized
/// records.
pub struct BoundedQueue {
    inner: Inner,
    capacity: usize,
    policy: BackpressurePolicy,
    len: AtomicUsize,
    warned_this_episode: std::sync::atomic::AtomicBool,
}

impl BoundedQueue {
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        BoundedQueue {
            inner: Inner {
                items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
                not_empty: Condvar::new(),
            },
            capacity,
            policy,
            len: AtomicUsize::new(0),
            warned_this_episode: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Approximate size query. Relaxed: readers may observe
    /// a slightly stale value, acceptable for observability.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue one item, applying the configured backpressure policy
    /// when full. Returns how the enqueue resolved so the caller can
    /// update `dropped`/`enqueued` counters precisely.
    pub fn enqueue(&self, item: QueueItem) -> EnqueueOutcome {
        let mut items = self.inner.items.lock().unwrap();
        if items.len() < self.capacity {
            items.push_back(item);
            self.len.store(items.len(), Ordering::Relaxed);
            self.warned_this_episode.store(false, Ordering::Relaxed);
            self.inner.not_empty.notify_one();
            return EnqueueOutcome::Enqueued;
        }

        match self.policy {
            BackpressurePolicy::Block => {
                // Wait for room; a concurrent pop() will shrink the queue
                // and notify us indirectly by the time we re-check.
                loop {
                    items = self
                        .inner
                        .not_empty
                        .wait_timeout(items, Duration::from_millis(50))
                        .unwrap()
                        .0;
                    if items.len() < self.capacity {
                        items.push_back(item);
                        self.len.store(items.len(), Ordering::Relaxed);
                        self.inner.not_empty.notify_one();
                        return EnqueueOutcome::Enqueued;
                    }
                }
            }
            BackpressurePolicy::DropOldest => {
                items.pop_front();
                items.push_back(item);
                self.len.store(items.len(), Ordering::Relaxed);
                self.inner.not_empty.notify_one();
                EnqueueOutcome::EnqueuedAfterEvicting
            }
            BackpressurePolicy::DropNewest => EnqueueOutcome::Rejected,
            BackpressurePolicy::Warn => {
                if !self.warned_this_episode.swap(true, Ordering::Relaxed) {
                    log::warn!(
                        "logxpy: queue at capacity ({}), dropping newest records",
                        self.capacity
                    );
                }
                EnqueueOutcome::Rejected
            }
        }
    }

    /// Enqueues a control sentinel (`Flush`/`Shutdown`) unconditionally,
    /// bypassing the backpressure policy entirely. A sentinel dropped
    /// under `DropNewest`/`Warn` would leave a `flush()`/`shutdown()`
    /// caller waiting with nothing ever going to wake it, so control
    /// items always land at the back of the queue, after every data item
    /// already sitting there.
    pub fn enqueue_control(&self, item: QueueItem) {
        let mut items = self.inner.items.lock().unwrap();
        items.push_back(item);
        self.len.store(items.len(), Ordering::Relaxed);
        self.inner.not_empty.notify_one();
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<QueueItem> {
        let mut items = self.inner.items.lock().unwrap();
        let item = items.pop_front();
        self.len.store(items.len(), Ordering::Relaxed);
        item
    }

    /// Blocking pop with a timeout.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<QueueItem> {
        let deadline = Instant::now() + timeout;
        let mut items = self.inner.items.lock().unwrap();
        loop {
            if let Some(item) = items.pop_front() {
                self.len.store(items.len(), Ordering::Relaxed);
                return Some(item);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, result) = self.inner.not_empty.wait_timeout(items, remaining).unwrap();
            items = guard;
            if result.timed_out() && items.is_empty() {
                return None;
            }
        }
    }
}

/// Coordinates an explicit flush request with the writer thread's
/// completion of it. `Supervisor::flush` allocates a ticket, enqueues a
/// `QueueItem::Flush(ticket)` right behind it, and waits here rather
/// than polling queue length — queue length alone says nothing about
/// what's sitting in the writer's in-memory batch or its destinations'
/// buffers. Built on the same `Mutex` + `Condvar` shape as
/// `BoundedQueue` itself, since a bounded channel type doesn't expose a
/// way to wait on an externally-driven completion count.
pub struct FlushSignal {
    next_ticket: AtomicU64,
    completed_through: Mutex<u64>,
    condvar: Condvar,
}

impl FlushSignal {
    pub fn new() -> Self {
        FlushSignal {
            next_ticket: AtomicU64::new(0),
            completed_through: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Allocates the next flush ticket. The caller must enqueue
    /// `QueueItem::Flush(ticket)` immediately afterward so the ticket's
    /// position in the queue reflects everything enqueued up to now.
    pub fn request(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Called by the writer once it has flushed and synced through the
    /// given ticket. Completion is monotonic: a stale report from a
    /// ticket already superseded is a no-op.
    pub fn mark_completed_through(&self, ticket: u64) {
        let mut completed = self.completed_through.lock().unwrap();
        if ticket > *completed {
            *completed = ticket;
        }
        self.condvar.notify_all();
    }

    /// Blocks until `ticket` has been marked complete, or `timeout`
    /// elapses.
    pub fn wait_until(&self, ticket: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completed = self.completed_through.lock().unwrap();
        while *completed < ticket {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, result) = self.condvar.wait_timeout(completed, remaining).unwrap();
            completed = guard;
            if result.timed_out() && *completed < ticket {
                return false;
            }
        }
        true
    }
}

impl Default for FlushSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(n: u8) -> QueueItem {
        QueueItem::Record(Bytes::from(vec![n]))
    }

    #[test]
    fn drop_oldest_evicts_front() {
        let q = BoundedQueue::new(2, BackpressurePolicy::DropOldest);
        assert_eq!(q.enqueue(item(1)), EnqueueOutcome::Enqueued);
        assert_eq!(q.enqueue(item(2)), EnqueueOutcome::Enqueued);
        assert_eq!(
            q.enqueue(item(3)),
            EnqueueOutcome::EnqueuedAfterEvicting
        );
        let first = q.try_pop().unwrap();
        match first {
            QueueItem::Record(b) => assert_eq!(b.as_ref(), &[2]),
            _ => panic!("expected record"),
        }
    }

    #[test]
    fn drop_newest_rejects_without_mutating_queue() {
        let q = BoundedQueue::new(1, BackpressurePolicy::DropNewest);
        assert_eq!(q.enqueue(item(1)), EnqueueOutcome::Enqueued);
        assert_eq!(q.enqueue(item(2)), EnqueueOutcome::Rejected);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn pop_timeout_returns_none_when_empty() {
        let q = BoundedQueue::new(4, BackpressurePolicy::Block);
        let start = Instant::now();
        assert!(q.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn block_policy_waits_for_room() {
        use std::sync::Arc;
        use std::thread;

        let q = Arc::new(BoundedQueue::new(1, BackpressurePolicy::Block));
        assert_eq!(q.enqueue(item(1)), EnqueueOutcome::Enqueued);

        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || {
            // Blocks until the main thread pops.
            q2.enqueue(item(2))
        });

        thread::sleep(Duration::from_millis(30));
        assert_eq!(q.len(), 1);
        q.try_pop();
        let outcome = handle.join().unwrap();
        assert_eq!(outcome, EnqueueOutcome::Enqueued);
    }

    #[test]
    fn flush_signal_wait_returns_once_its_ticket_is_marked() {
        let signal = FlushSignal::new();
        let a = signal.request();
        let b = signal.request();
        assert!(!signal.wait_until(a, Duration::from_millis(10)));
        signal.mark_completed_through(a);
        assert!(signal.wait_until(a, Duration::from_millis(10)));
        assert!(!signal.wait_until(b, Duration::from_millis(10)));
        signal.mark_completed_through(b);
        assert!(signal.wait_until(a, Duration::from_millis(10)));
        assert!(signal.wait_until(b, Duration::from_millis(10)));
    }

    #[test]
    fn enqueue_control_bypasses_capacity() {
        let q = BoundedQueue::new(1, BackpressurePolicy::DropNewest);
        assert_eq!(q.enqueue(item(1)), EnqueueOutcome::Enqueued);
        q.enqueue_control(QueueItem::Flush(7));
        assert_eq!(q.len(), 2);
    }
}
