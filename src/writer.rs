//! The writer worker: the single dedicated thread that drains the
//! bounded queue, batches according to the flush controller, and
//! dispatches to every registered destination.
//!
//! Poll for ready work, decide whether to act, act, record stats,
//! repeat — running on a plain `std::thread` rather than a green task,
//! so the writer keeps making progress even if an async runtime the
//! caller embeds it in stalls; this pipeline has no async runtime of
//! its own at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::destination::Destination;
use crate::flush::FlushController;
use crate::metrics::Metrics;
use crate::queue::{BoundedQueue, FlushSignal, QueueItem};

/// Everything the writer thread owns exclusively; never shared, never
/// touched by a producer thread. Only the writer worker ever calls a
/// destination.
pub struct Writer {
    queue: Arc<BoundedQueue>,
    destinations: Vec<Box<dyn Destination>>,
    metrics: Arc<Metrics>,
    flush: FlushController,
    batch: Vec<Bytes>,
    shutdown_requested: Arc<AtomicBool>,
    flush_signal: Arc<FlushSignal>,
}

/// Outcome of one flush attempt, surfaced for tests and for the
/// supervisor's degraded-destination bookkeeping.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub records_written: u64,
    pub destination_errors: u64,
}

impl Writer {
    pub fn new(
        queue: Arc<BoundedQueue>,
        destinations: Vec<Box<dyn Destination>>,
        metrics: Arc<Metrics>,
        flush: FlushController,
        shutdown_requested: Arc<AtomicBool>,
        flush_signal: Arc<FlushSignal>,
    ) -> Self {
        Writer {
            queue,
            destinations,
            metrics,
            flush,
            batch: Vec::new(),
            shutdown_requested,
            flush_signal,
        }
    }

    /// The worker's main loop. Runs until it pops the shutdown sentinel,
    /// which only happens after every producer-visible enqueue has
    /// drained — a graceful shutdown drains before it stops.
    pub fn run(&mut self) {
        loop {
            let timeout = self.flush.poll_timeout();
            match self.queue.pop_timeout(timeout) {
                Some(QueueItem::Record(bytes)) => {
                    self.batch.push(bytes);
                    self.flush.record_enqueued();
                    if let Some(size) = self.flush.adaptive_batch_size() {
                        self.metrics.set_adaptive_batch_size(size);
                    }
                    if let Some(reason) = self.flush.should_flush(self.batch.len()) {
                        let _ = reason;
                        self.flush_batch();
                    }
                }
                Some(QueueItem::Flush(ticket)) => {
                    // Highest-priority trigger: an explicit flush request
                    // drains whatever's already batched and forces every
                    // destination durable, unlike the periodic/triggered
                    // path, which only writes and leaves syncing to the
                    // next explicit flush or shutdown.
                    self.flush_batch();
                    self.sync_all();
                    self.flush_signal.mark_completed_through(ticket);
                }
                Some(QueueItem::Shutdown) => {
                    self.flush_batch();
                    let pending_flushes = self.drain_remaining();
                    self.sync_all();
                    for ticket in pending_flushes {
                        self.flush_signal.mark_completed_through(ticket);
                    }
                    return;
                }
                None => {
                    // Timed out with nothing new: a pending batch may
                    // still need to flush on the interval/deadline
                    // trigger even though no new record arrived.
                    if self.flush.should_flush(self.batch.len()).is_some() {
                        self.flush_batch();
                    }
                    if self.shutdown_requested.load(Ordering::Relaxed) && self.batch.is_empty() {
                        return;
                    }
                }
            }
        }
    }

    /// Drains every item still sitting in the queue without blocking,
    /// used once the shutdown sentinel has been seen so nothing
    /// enqueued just before shutdown is lost. Any flush tickets seen
    /// along the way are returned rather than marked complete here,
    /// since they must not be reported until after the caller's
    /// subsequent `sync_all`.
    fn drain_remaining(&mut self) -> Vec<u64> {
        let mut pending_flushes = Vec::new();
        while let Some(item) = self.queue.try_pop() {
            match item {
                QueueItem::Record(bytes) => self.batch.push(bytes),
                QueueItem::Flush(ticket) => pending_flushes.push(ticket),
                QueueItem::Shutdown => {}
            }
        }
        self.flush_batch();
        pending_flushes
    }

    /// Sends the current batch to every destination and resets flush
    /// state. Each destination's failure is independent: one destination
    /// erroring never stops the others from receiving the batch
    pub fn flush_batch(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        if self.batch.is_empty() {
            return report;
        }
        for dest in &mut self.destinations {
            let result = if dest.supports_native_batch() {
                dest.write_batch(&self.batch)
            } else {
                self.batch.iter().try_for_each(|b| dest.write(b))
            };
            match result {
                Ok(()) => {
                    report.records_written += self.batch.len() as u64;
                }
                Err(err) => {
                    report.destination_errors += 1;
                    self.metrics.inc_destination_errors();
                    log::warn!(
                        "logxpy: destination {:?} write failed: {}",
                        dest.name(),
                        err
                    );
                }
            }
        }
        self.metrics.inc_written_by(self.batch.len() as u64);
        self.batch.clear();
        self.flush.note_flushed();
        report
    }

    fn sync_all(&mut self) {
        for dest in &mut self.destinations {
            if let Err(err) = dest.sync() {
                log::warn!("logxpy: destination {:?} sync failed: {}", dest.name(), err);
                self.metrics.inc_destination_errors();
            }
        }
    }
}

/// Spawns the writer on a dedicated `std::thread` and returns its
/// `JoinHandle`.
pub fn spawn(mut writer: Writer) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("logxpy-writer".to_string())
        .spawn(move || writer.run())
        .expect("failed to spawn logxpy writer thread")
}

/// Executes a record's write synchronously on the caller's own thread,
/// bypassing the queue entirely — used by the supervisor's sync
/// fallback and by `async_enabled = false`.
pub fn write_sync(
    destinations: &mut [Box<dyn Destination>],
    metrics: &Metrics,
    bytes: &Bytes,
) {
    for dest in destinations {
        if let Err(err) = dest.write(bytes) {
            metrics.inc_destination_errors();
            log::warn!(
                "logxpy: sync-mode write to {:?} failed: {}",
                dest.name(),
                err
            );
        } else {
            metrics.inc_written_by(1);
        }
    }
}
