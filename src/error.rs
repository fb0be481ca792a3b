//! Error taxonomy. Every variant here is counted in `Metrics`
//! and never propagated to application code by default — the public API
//! signals failure only through return values and the metrics snapshot

use thiserror::Error;

use crate::id::TaskId;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Enqueue denied under `DropNewest`/`Warn` while the queue is full.
    #[error("queue full, record dropped")]
    QueueFull,

    /// A record could not be encoded; a placeholder was written instead.
    #[error("serialization failed for record: {reason}")]
    SerializationError { reason: String },

    /// A single destination's write failed; the writer continues with
    /// the remaining destinations.
    #[error("destination {name:?} write failed: {source}")]
    DestinationWriteError {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The writer thread panicked; the supervisor will restart it.
    #[error("writer thread panicked: {message}")]
    WriterCrash { message: String },

    /// The supervisor exhausted its restart budget and fell back to
    /// synchronous, caller-thread emission.
    #[error("restart limit ({attempts}) exceeded, falling back to sync mode")]
    RestartLimitExceeded { attempts: u32 },

    /// Graceful shutdown did not complete within the requested deadline.
    #[error("shutdown did not complete within {timeout_secs}s")]
    ShutdownTimeout { timeout_secs: f64 },

    /// A scope's `finish()` was called more than once.
    #[error("scope for task {0} finished more than once")]
    DoubleFinish(TaskId),
}
