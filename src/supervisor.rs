//! Writer supervision: owns the writer thread's lifecycle —
//! starting it, detecting a crash, restarting with exponential backoff,
//! falling back to synchronous emission once the restart budget is
//! exhausted, and handling `fork()` by reinitializing state in the
//! child.
//!
//! The background loop retries with a capped backoff, and additionally
//! falls back to synchronous emission once the restart budget is
//! exhausted, and detects an unreinitialized `fork()`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::config::WriterConfig;
use crate::destination::Destination;
use crate::flush::FlushController;
use crate::metrics::Metrics;
use crate::queue::{BoundedQueue, FlushSignal, QueueItem};
use crate::writer::{self, Writer};

/// A destination factory: the supervisor needs to rebuild destinations
/// from scratch on every restart (a crashed writer may have left a file
/// handle or mmap in an inconsistent state), so it stores how to make
/// them rather than the instances themselves.
pub type DestinationFactory = Box<dyn Fn() -> std::io::Result<Vec<Box<dyn Destination>>> + Send>;

/// Coordinates the writer thread across its whole lifetime: start,
/// crash-restart, sync fallback, explicit flush/shutdown, fork
/// recovery.
pub struct Supervisor {
    queue: Arc<BoundedQueue>,
    metrics: Arc<Metrics>,
    config: WriterConfig,
    make_destinations: Arc<Mutex<DestinationFactory>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_requested: Arc<AtomicBool>,
    /// Shared across every writer restart so a `flush()` call racing a
    /// crash-restart still gets woken by whichever incarnation of the
    /// writer thread handles its ticket.
    flush_signal: Arc<FlushSignal>,
    restart_attempts: AtomicU32,
    sync_mode: AtomicBool,
    /// PID captured at start; compared against the live PID on every
    /// emission to detect an unreinitialized post-`fork()` child
    owner_pid: AtomicU64,
    sync_destinations: Mutex<Option<Vec<Box<dyn Destination>>>>,
}

impl Supervisor {
    pub fn start(
        config: WriterConfig,
        make_destinations: DestinationFactory,
    ) -> std::io::Result<Arc<Self>> {
        let queue = Arc::new(BoundedQueue::new(config.queue_capacity, config.policy));
        let metrics = Arc::new(Metrics::new());
        let make_destinations = Arc::new(Mutex::new(make_destinations));

        let sup = Arc::new(Supervisor {
            queue,
            metrics,
            config,
            make_destinations,
            handle: Mutex::new(None),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            flush_signal: Arc::new(FlushSignal::new()),
            restart_attempts: AtomicU32::new(0),
            sync_mode: AtomicBool::new(false),
            owner_pid: AtomicU64::new(std::process::id() as u64),
            sync_destinations: Mutex::new(None),
        });

        if sup.config.async_enabled {
            sup.spawn_writer()?;
        } else {
            sup.enter_sync_mode()?;
        }
        Ok(sup)
    }

    fn flush_controller(&self) -> FlushController {
        let mut fc = FlushController::new(
            self.config.writer_mode,
            self.config.batch_size,
            self.config.flush_interval,
            self.config.deadline,
        );
        if self.config.adaptive_tuning {
            fc = fc.with_adaptive_tuning(
                self.config.adaptive_max_batch_size,
                self.config.adaptive_min_flush_interval,
            );
        }
        fc
    }

    fn spawn_writer(self: &Arc<Self>) -> std::io::Result<()> {
        let destinations = (self.make_destinations.lock().unwrap())()?;
        let writer = Writer::new(
            self.queue.clone(),
            destinations,
            self.metrics.clone(),
            self.flush_controller(),
            self.shutdown_requested.clone(),
            self.flush_signal.clone(),
        );

        let sup = self.clone();
        let join = std::thread::Builder::new()
            .name("logxpy-writer".to_string())
            .spawn(move || sup.run_supervised(writer))
            .expect("failed to spawn logxpy writer thread");
        *self.handle.lock().unwrap() = Some(join);
        Ok(())
    }

    /// Runs the writer inside `catch_unwind` so a panic in user-provided
    /// destination code becomes a detected crash rather than silently
    /// taking the whole process down — this requires `panic = "unwind"`
    fn run_supervised(self: Arc<Self>, mut writer: Writer) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| writer.run()));
        if let Err(payload) = result {
            let message = panic_message(&payload);
            log::error!("logxpy: writer thread panicked: {message}");
            self.metrics.inc_restarts();
            self.on_writer_crash();
        }
    }

    fn on_writer_crash(self: &Arc<Self>) {
        let attempts = self.restart_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts > self.config.restart_max_attempts {
            log::error!(
                "logxpy: restart budget ({}) exhausted, falling back to sync mode",
                self.config.restart_max_attempts
            );
            let _ = self.enter_sync_mode();
            return;
        }
        let backoff = backoff_for_attempt(
            attempts,
            self.config.restart_initial_backoff,
            self.config.restart_max_backoff,
        );
        log::warn!("logxpy: restarting writer thread (attempt {attempts}) after {backoff:?}");
        std::thread::sleep(backoff);
        if let Err(err) = self.spawn_writer() {
            log::error!("logxpy: failed to restart writer thread: {err}");
            let _ = self.enter_sync_mode();
        }
    }

    /// Switches every future emission to write synchronously on the
    /// caller's thread, abandoning the queue and the dedicated writer
    fn enter_sync_mode(&self) -> std::io::Result<()> {
        let destinations = (self.make_destinations.lock().unwrap())()?;
        *self.sync_destinations.lock().unwrap() = Some(destinations);
        self.sync_mode.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Writes one record directly on the calling thread, lazily opening
    /// the direct-write destination set if this is the first caller to
    /// need it. Used both by permanent sync-fallback (already populated
    /// by `enter_sync_mode`) and by a thread-scoped `sync_mode()` guard
    /// that never flips the global `sync_mode` flag.
    fn write_direct(&self, bytes: &Bytes) {
        let mut guard = self.sync_destinations.lock().unwrap();
        if guard.is_none() {
            match (self.make_destinations.lock().unwrap())() {
                Ok(destinations) => *guard = Some(destinations),
                Err(err) => {
                    log::error!("logxpy: failed to open destinations for direct write: {err}");
                    return;
                }
            }
        }
        if let Some(destinations) = guard.as_mut() {
            writer::write_sync(destinations, &self.metrics, bytes);
        }
    }

    pub fn is_sync_mode(&self) -> bool {
        self.sync_mode.load(Ordering::Relaxed)
    }

    pub fn queue(&self) -> &Arc<BoundedQueue> {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Detects an unreinitialized post-fork child: a forked
    /// child inherits the parent's queue and writer-thread memory but
    /// not the writer thread itself, so it must fall back to sync mode
    /// until a fresh `Supervisor` is built.
    pub fn check_fork(&self) {
        let live_pid = std::process::id() as u64;
        if self.owner_pid.load(Ordering::Relaxed) != live_pid {
            log::warn!("logxpy: detected fork, switching to sync mode in child process");
            let _ = self.enter_sync_mode();
            self.owner_pid.store(live_pid, Ordering::Relaxed);
        }
    }

    /// Submits one already-serialized record, routing through the queue
    /// in async mode or writing it synchronously on the caller's thread
    /// when in permanent sync-fallback mode, or when `force_sync` is set
    /// by a thread-local `sync_mode()` scope.
    pub fn submit(&self, bytes: Bytes, force_sync: bool) -> crate::queue::EnqueueOutcome {
        use crate::queue::EnqueueOutcome;

        if self.is_sync_mode() || force_sync {
            self.write_direct(&bytes);
            return EnqueueOutcome::Enqueued;
        }
        self.metrics.inc_enqueued();
        let outcome = self.queue.enqueue(QueueItem::Record(bytes));
        match outcome {
            EnqueueOutcome::Enqueued => {}
            EnqueueOutcome::Rejected | EnqueueOutcome::EnqueuedAfterEvicting => {
                self.metrics.inc_dropped_by(1);
            }
        }
        outcome
    }

    /// Blocks until every record enqueued before this call has been
    /// flushed to and synced on every destination, or the timeout
    /// elapses.
    ///
    /// Queue length alone can't answer this: a record can be popped off
    /// the queue into the writer's in-memory batch, and even once
    /// written, a block-buffered destination holds it in a `BufWriter`
    /// until something calls `sync`. So this allocates a ticket and
    /// enqueues an explicit `Flush` sentinel right behind it — the
    /// writer processes the queue in order, so every record already
    /// enqueued is guaranteed to be in the batch by the time the writer
    /// reaches this ticket — then waits for the writer to report it
    /// flushed and synced through that ticket.
    pub fn flush(&self, timeout: Duration) -> bool {
        if self.is_sync_mode() {
            return true;
        }
        let ticket = self.flush_signal.request();
        self.queue.enqueue_control(QueueItem::Flush(ticket));
        self.flush_signal.wait_until(ticket, timeout)
    }

    /// Requests an orderly shutdown: enqueues the sentinel, waits for
    /// the writer to drain and exit, joins its thread.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        if self.is_sync_mode() {
            return true;
        }
        self.queue.enqueue_control(QueueItem::Shutdown);
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let start = Instant::now();
            while !handle.is_finished() {
                if start.elapsed() >= timeout {
                    return false;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            let _ = handle.join();
        }
        true
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Exponential backoff, doubling from `initial` and capped at `max`
fn backoff_for_attempt(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    initial
        .checked_mul(factor as u32)
        .unwrap_or(max)
        .min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_secs(30);
        assert_eq!(backoff_for_attempt(1, initial, max), Duration::from_millis(100));
        assert_eq!(backoff_for_attempt(2, initial, max), Duration::from_millis(200));
        assert_eq!(backoff_for_attempt(3, initial, max), Duration::from_millis(400));
        assert_eq!(backoff_for_attempt(20, initial, max), max);
    }

    #[test]
    fn panic_message_extracts_string_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
    }
}
