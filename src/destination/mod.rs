//! Pluggable byte sinks.
//!
//! A destination is only ever touched from the writer thread, so
//! implementations need no internal synchronization — every method
//! here takes `&mut self`.

mod block_buffered;
mod line_flushed;
mod mmap;

pub use block_buffered::BlockBufferedFile;
pub use line_flushed::LineFlushedFile;
pub use mmap::MmapFile;

use bytes::Bytes;

/// A byte sink registered with the writer.
pub trait Destination: Send {
    /// Human-readable name used in metrics/log messages.
    fn name(&self) -> &str;

    /// Write a single record's bytes. Implementations MUST retry on
    /// short writes until the full buffer is drained.
    fn write(&mut self, bytes: &Bytes) -> std::io::Result<()>;

    /// Write a batch as one call when the destination can do so more
    /// efficiently than per-item `write`.
    /// Default implementation falls back to a tight per-item loop.
    fn write_batch(&mut self, items: &[Bytes]) -> std::io::Result<()> {
        for item in items {
            self.write(item)?;
        }
        Ok(())
    }

    /// Whether `write_batch` is a genuine batch write (true) rather than
    /// the default per-item loop (false) — the writer uses this only
    /// for diagnostics, since both paths are always correct.
    fn supports_native_batch(&self) -> bool {
        false
    }

    /// Force any buffered bytes to durable storage. Called on explicit
    /// flush and on graceful shutdown.
    fn sync(&mut self) -> std::io::Result<()>;
}

/// Concatenate a batch into one buffer for destinations that accept a
/// single contiguous write.
pub fn concat_batch(items: &[Bytes]) -> Vec<u8> {
    let total: usize = items.iter().map(|b| b.len()).sum();
    let mut out = Vec::with_capacity(total);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}
