//! Memory-mapped file destination: advances a mapping
//! window, writes directly into it, and remaps when the tail nears the
//! end of the current window — fast amortized cost, zero-copy.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use bytes::Bytes;
use memmap2::MmapMut;

use super::Destination;

/// Window grown in 16 MiB steps; a log file grows incrementally rather
/// than being mapped fixed-size up front.
const WINDOW_STEP: u64 = 16 * 1024 * 1024;

pub struct MmapFile {
    file: File,
    mmap: MmapMut,
    /// Total bytes currently mapped (the file's allocated length).
    mapped_len: u64,
    /// Absolute offset of the next byte to write.
    write_pos: u64,
    path: String,
}

impl MmapFile {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let existing_len = file.metadata()?.len();
        let write_pos = existing_len;
        let mapped_len = existing_len.max(WINDOW_STEP);
        file.set_len(mapped_len)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(MmapFile {
            file,
            mmap,
            mapped_len,
            write_pos,
            path: path.display().to_string(),
        })
    }

    fn ensure_capacity(&mut self, additional: u64) -> io::Result<()> {
        if self.write_pos + additional <= self.mapped_len {
            return Ok(());
        }
        // Remap: flush what's written so far, grow the file, map again.
        self.mmap.flush()?;
        let mut new_len = self.mapped_len;
        while self.write_pos + additional > new_len {
            new_len += WINDOW_STEP;
        }
        self.file.set_len(new_len)?;
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        self.mapped_len = new_len;
        Ok(())
    }

    fn write_at_cursor(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.ensure_capacity(bytes.len() as u64)?;
        let start = self.write_pos as usize;
        let end = start + bytes.len();
        self.mmap[start..end].copy_from_slice(bytes);
        self.write_pos = end as u64;
        Ok(())
    }
}

impl Destination for MmapFile {
    fn name(&self) -> &str {
        &self.path
    }

    fn write(&mut self, bytes: &Bytes) -> io::Result<()> {
        self.write_at_cursor(bytes)
    }

    fn write_batch(&mut self, items: &[Bytes]) -> io::Result<()> {
        let merged = super::concat_batch(items);
        self.write_at_cursor(&merged)
    }

    fn supports_native_batch(&self) -> bool {
        true
    }

    fn sync(&mut self) -> io::Result<()> {
        self.mmap.flush()?;
        // Trim the trailing, not-yet-written portion of the pre-grown
        // window so the file on disk reflects exactly what was written.
        self.file.set_len(self.write_pos)?;
        Ok(())
    }
}

impl Drop for MmapFile {
    fn drop(&mut self) {
        let _ = self.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_visible_after_sync() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ndjson");
        {
            let mut dest = MmapFile::open(&path).unwrap();
            dest.write(&Bytes::from_static(b"one\n")).unwrap();
            dest.write(&Bytes::from_static(b"two\n")).unwrap();
            dest.sync().unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "one\ntwo\n");
    }

    #[test]
    fn remaps_when_window_is_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ndjson");
        let mut dest = MmapFile::open(&path).unwrap();
        let chunk = vec![b'x'; (WINDOW_STEP as usize) / 2 + 1];
        dest.write(&Bytes::from(chunk.clone())).unwrap();
        dest.write(&Bytes::from(chunk)).unwrap();
        dest.sync().unwrap();
        let content = std::fs::read(&path).unwrap();
        assert_eq!(content.len() as u64, WINDOW_STEP + 2);
    }
}
