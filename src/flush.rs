//! Flush controller: decides when the writer drains its
//! accumulated batch to the destination. Three modes, in priority order
//! when more than one trigger could fire on the same tick: batch-size
//! reached, deadline exceeded, interval elapsed.
//!
//! "How many items are ready" stays separate from "should we act now,"
//! which is exactly the shape a flush decision needs.

use std::time::{Duration, Instant};

/// How the writer decides to flush its current batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterMode {
    /// Flush as soon as any configured trigger fires (batch size,
    /// deadline, or interval) — the common case.
    Trigger,
    /// Flush unconditionally once per loop iteration, ignoring the
    /// other triggers; used for low-volume destinations where batching
    /// gains nothing.
    Loop,
    /// Never flush automatically; only an explicit `Logger::flush()`
    /// call drains the batch.
    Manual,
}

/// Why `FlushController::should_flush` decided to flush, in descending
/// priority order: the first of these conditions to hold is
/// the one reported, even if several hold simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    BatchSizeReached,
    DeadlineExceeded,
    IntervalElapsed,
    LoopMode,
    Explicit,
}

pub struct FlushController {
    mode: WriterMode,
    batch_size: usize,
    flush_interval: Duration,
    deadline: Duration,
    last_flush: Instant,
    oldest_pending: Option<Instant>,
    /// Moving-average arrival rate, in records/sec; only maintained when
    /// adaptive tuning is enabled.
    adaptive: Option<AdaptiveTuner>,
}

struct AdaptiveTuner {
    max_batch_size: usize,
    min_flush_interval: Duration,
    ema_rate: f64,
    last_sample: Instant,
    samples_since_last: u64,
}

const EMA_ALPHA: f64 = 0.2;

impl AdaptiveTuner {
    fn new(max_batch_size: usize, min_flush_interval: Duration) -> Self {
        AdaptiveTuner {
            max_batch_size,
            min_flush_interval,
            ema_rate: 0.0,
            last_sample: Instant::now(),
            samples_since_last: 0,
        }
    }

    fn record_arrival(&mut self) {
        self.samples_since_last += 1;
        let elapsed = self.last_sample.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            let instantaneous = self.samples_since_last as f64 / elapsed;
            self.ema_rate = EMA_ALPHA * instantaneous + (1.0 - EMA_ALPHA) * self.ema_rate;
            self.samples_since_last = 0;
            self.last_sample = Instant::now();
        }
    }

    /// Suggests a batch size proportional to the observed arrival rate,
    /// clamped so it never exceeds the configured ceiling and never goes
    /// below the floor the caller explicitly asked for.
    fn suggested_batch_size(&self, configured_floor: usize) -> usize {
        let suggested = (self.ema_rate * 0.1).ceil() as usize;
        suggested.clamp(configured_floor, self.max_batch_size)
    }
}

impl FlushController {
    pub fn new(
        mode: WriterMode,
        batch_size: usize,
        flush_interval: Duration,
        deadline: Duration,
    ) -> Self {
        FlushController {
            mode,
            batch_size,
            flush_interval,
            deadline,
            last_flush: Instant::now(),
            oldest_pending: None,
            adaptive: None,
        }
    }

    pub fn with_adaptive_tuning(
        mut self,
        max_batch_size: usize,
        min_flush_interval: Duration,
    ) -> Self {
        self.adaptive = Some(AdaptiveTuner::new(max_batch_size, min_flush_interval));
        self
    }

    /// Called once per record accepted into the current batch.
    pub fn record_enqueued(&mut self) {
        if self.oldest_pending.is_none() {
            self.oldest_pending = Some(Instant::now());
        }
        if let Some(tuner) = self.adaptive.as_mut() {
            tuner.record_arrival();
        }
    }

    fn effective_batch_size(&self) -> usize {
        match &self.adaptive {
            Some(tuner) if self.batch_size > 0 => tuner.suggested_batch_size(self.batch_size),
            _ => self.batch_size,
        }
    }

    /// The batch size the adaptive tuner currently suggests, for
    /// publishing to `Metrics`. `None` when adaptive tuning isn't
    /// enabled, in which case the configured `batch_size` applies
    /// unchanged and there's nothing to report.
    pub fn adaptive_batch_size(&self) -> Option<usize> {
        self.adaptive.is_some().then(|| self.effective_batch_size())
    }

    fn effective_flush_interval(&self) -> Duration {
        match &self.adaptive {
            Some(tuner) => self.flush_interval.max(tuner.min_flush_interval),
            None => self.flush_interval,
        }
    }

    /// Returns the reason to flush now, or `None` if the batch should
    /// keep accumulating.
    pub fn should_flush(&self, pending_len: usize) -> Option<FlushReason> {
        if self.mode == WriterMode::Manual {
            return None;
        }
        if self.mode == WriterMode::Loop {
            return if pending_len > 0 {
                Some(FlushReason::LoopMode)
            } else {
                None
            };
        }
        if pending_len == 0 {
            return None;
        }
        let batch_size = self.effective_batch_size();
        if batch_size > 0 && pending_len >= batch_size {
            return Some(FlushReason::BatchSizeReached);
        }
        if self.deadline.is_zero() {
            return Some(FlushReason::DeadlineExceeded);
        }
        if let Some(oldest) = self.oldest_pending {
            if oldest.elapsed() >= self.deadline {
                return Some(FlushReason::DeadlineExceeded);
            }
        }
        let interval = self.effective_flush_interval();
        if !interval.is_zero() && self.last_flush.elapsed() >= interval {
            return Some(FlushReason::IntervalElapsed);
        }
        None
    }

    /// How long the writer should block waiting for new items before
    /// re-checking its triggers (used by the batching loop's
    /// `pop_timeout`). `Manual` mode waits indefinitely since nothing
    /// else can fire.
    pub fn poll_timeout(&self) -> Duration {
        match self.mode {
            WriterMode::Manual => Duration::from_secs(3600),
            WriterMode::Loop => Duration::from_millis(10),
            WriterMode::Trigger => {
                let interval = self.effective_flush_interval();
                if interval.is_zero() {
                    Duration::from_millis(50)
                } else {
                    interval
                }
            }
        }
    }

    /// Resets batching state after a flush has actually happened.
    pub fn note_flushed(&mut self) {
        self.last_flush = Instant::now();
        self.oldest_pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_trigger_fires_first() {
        let mut ctrl = FlushController::new(
            WriterMode::Trigger,
            4,
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        for _ in 0..4 {
            ctrl.record_enqueued();
        }
        assert_eq!(ctrl.should_flush(4), Some(FlushReason::BatchSizeReached));
    }

    #[test]
    fn zero_deadline_flushes_immediately() {
        let ctrl = FlushController::new(
            WriterMode::Trigger,
            100,
            Duration::from_secs(60),
            Duration::ZERO,
        );
        assert_eq!(ctrl.should_flush(1), Some(FlushReason::DeadlineExceeded));
    }

    #[test]
    fn manual_mode_never_auto_flushes() {
        let ctrl = FlushController::new(
            WriterMode::Manual,
            1,
            Duration::from_millis(1),
            Duration::ZERO,
        );
        assert_eq!(ctrl.should_flush(100), None);
    }

    #[test]
    fn loop_mode_flushes_whenever_anything_is_pending() {
        let ctrl = FlushController::new(WriterMode::Loop, 0, Duration::ZERO, Duration::ZERO);
        assert_eq!(ctrl.should_flush(1), Some(FlushReason::LoopMode));
        assert_eq!(ctrl.should_flush(0), None);
    }

    #[test]
    fn adaptive_tuning_never_drops_batch_size_below_configured_floor() {
        let mut ctrl = FlushController::new(
            WriterMode::Trigger,
            50,
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
        .with_adaptive_tuning(500, Duration::from_millis(1));
        // no arrivals recorded yet: ema_rate stays at 0, suggestion would
        // be 0 without the clamp to the configured floor.
        assert_eq!(ctrl.effective_batch_size(), 50);
        ctrl.record_enqueued();
        assert!(ctrl.effective_batch_size() >= 50);
    }
}
