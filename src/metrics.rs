//! Pipeline metrics: every enqueue, write, drop, and restart is
//! counted. Updated from both producer and writer threads; relaxed
//! atomics throughout — eventually accurate enough for observability,
//! not a source of truth for exact accounting.
//!
//! One `AtomicU64`/`AtomicUsize` field per counter, `Ordering::Relaxed`
//! everywhere, plain `fetch_add`/`load` accessor methods.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Point-in-time snapshot returned by `Logger::metrics()`.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub written: u64,
    pub dropped: u64,
    pub errors: u64,
    pub pending: u64,
    pub restarts: u64,
    pub serialization_errors: u64,
    pub destination_errors: u64,
    pub adaptive_batch_size: u64,
}

#[derive(Debug, Default)]
pub struct Metrics {
    enqueued: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
    restarts: AtomicU64,
    serialization_errors: AtomicU64,
    destination_errors: AtomicU64,
    adaptive_batch_size: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_written_by(&self, n: u64) {
        self.written.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_dropped_by(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_restarts(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_serialization_errors(&self) {
        self.serialization_errors.fetch_add(1, Ordering::Relaxed);
        self.inc_errors();
    }

    pub fn inc_destination_errors(&self) {
        self.destination_errors.fetch_add(1, Ordering::Relaxed);
        self.inc_errors();
    }

    pub fn set_adaptive_batch_size(&self, size: usize) {
        self.adaptive_batch_size.store(size, Ordering::Relaxed);
    }

    /// `pending` is the queue's live approximate size, the most direct
    /// measurement available; `written + dropped + pending == enqueued`
    /// holds at any consistent observation point, modulo in-flight
    /// records the writer is actively batching but hasn't flushed yet.
    pub fn snapshot(&self, queue_len: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            pending: queue_len,
            restarts: self.restarts.load(Ordering::Relaxed),
            serialization_errors: self.serialization_errors.load(Ordering::Relaxed),
            destination_errors: self.destination_errors.load(Ordering::Relaxed),
            adaptive_batch_size: self.adaptive_batch_size.load(Ordering::Relaxed) as u64,
        }
    }
}
