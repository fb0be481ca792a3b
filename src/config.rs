//! Pipeline configuration.
//!
//! A plain builder, not file-loaded — parsing a config file is a
//! separate, external collaborator concern. Defaults live as small
//! free functions (`default_queue_capacity()` etc.) for readability.

use std::time::Duration;

use crate::flush::WriterMode;
use crate::queue::BackpressurePolicy;
use crate::record::Level;

/// Which file-writing strategy a destination uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    LineFlushed,
    BlockBuffered,
    Mmap,
}

fn default_queue_capacity() -> usize {
    10_000
}
fn default_batch_size() -> usize {
    100
}
fn default_flush_interval() -> Duration {
    Duration::from_millis(250)
}
fn default_deadline() -> Duration {
    Duration::from_secs(5)
}
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_flush_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_restart_max_attempts() -> u32 {
    10
}
fn default_restart_initial_backoff() -> Duration {
    Duration::from_millis(100)
}
fn default_restart_max_backoff() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Minimum level that reaches the pipeline at all.
    pub level: Level,
    /// When `false`, every emission takes the sync-fallback path
    /// directly, bypassing the queue and writer thread entirely.
    pub async_enabled: bool,
    pub queue_capacity: usize,
    pub policy: BackpressurePolicy,
    pub writer_mode: WriterMode,
    pub destination_kind: DestinationKind,

    /// Flush when the batch reaches this many records; 0 disables the
    /// trigger.
    pub batch_size: usize,
    /// Flush when this much time has elapsed since the last flush; zero
    /// disables the trigger.
    pub flush_interval: Duration,
    /// Force a flush once the oldest buffered record exceeds this age;
    /// zero flushes every record immediately.
    pub deadline: Duration,

    pub shutdown_timeout: Duration,
    pub default_flush_timeout: Duration,

    pub restart_max_attempts: u32,
    pub restart_initial_backoff: Duration,
    pub restart_max_backoff: Duration,

    /// Enables the moving-average rate estimator. Advisory only; never
    /// overrides explicit `batch_size`/`flush_interval` bounds in a way
    /// that would violate them.
    pub adaptive_tuning: bool,
    pub adaptive_max_batch_size: usize,
    pub adaptive_min_flush_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            level: Level::Info,
            async_enabled: true,
            queue_capacity: default_queue_capacity(),
            policy: BackpressurePolicy::Block,
            writer_mode: WriterMode::Trigger,
            destination_kind: DestinationKind::BlockBuffered,
            batch_size: default_batch_size(),
            flush_interval: default_flush_interval(),
            deadline: default_deadline(),
            shutdown_timeout: default_shutdown_timeout(),
            default_flush_timeout: default_flush_timeout(),
            restart_max_attempts: default_restart_max_attempts(),
            restart_initial_backoff: default_restart_initial_backoff(),
            restart_max_backoff: default_restart_max_backoff(),
            adaptive_tuning: false,
            adaptive_max_batch_size: default_batch_size() * 10,
            adaptive_min_flush_interval: Duration::from_millis(10),
        }
    }
}

impl WriterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn async_enabled(mut self, enabled: bool) -> Self {
        self.async_enabled = enabled;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn policy(mut self, policy: BackpressurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn writer_mode(mut self, mode: WriterMode) -> Self {
        self.writer_mode = mode;
        self
    }

    pub fn destination_kind(mut self, kind: DestinationKind) -> Self {
        self.destination_kind = kind;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn adaptive_tuning(mut self, enabled: bool) -> Self {
        self.adaptive_tuning = enabled;
        self
    }

    /// Read `LOGXPY_SYNC=1` and fold it into `async_enabled`: the env var can only force sync mode,
    /// never re-enable async if the caller explicitly disabled it.
    pub fn apply_env_overrides(mut self) -> Self {
        if std::env::var("LOGXPY_SYNC").as_deref() == Ok("1") {
            self.async_enabled = false;
        }
        self
    }
}
