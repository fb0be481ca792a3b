//! Line-flushed file destination: lowest latency to disk,
//! lowest throughput — one `write` plus one `fsync` per record.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use bytes::Bytes;

use super::Destination;

pub struct LineFlushedFile {
    file: File,
    path: String,
}

impl LineFlushedFile {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)?;
        Ok(LineFlushedFile {
            file,
            path: path.display().to_string(),
        })
    }

    fn fsync(&self) -> io::Result<()> {
        nix::unistd::fsync(self.file.as_raw_fd()).map_err(io::Error::from)
    }
}

impl Destination for LineFlushedFile {
    fn name(&self) -> &str {
        &self.path
    }

    fn write(&mut self, bytes: &Bytes) -> io::Result<()> {
        // `write_all` already retries on short writes.
        self.file.write_all(bytes)?;
        self.fsync()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.fsync()
    }
}
