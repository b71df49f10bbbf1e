//! File-based storage backend using position-based I/O (`pread`/`pwrite`).
//!
//! On Unix, reads are completely lock-free via [`std::os::unix::fs::FileExt`]:
//! `read_exact_at()` takes `&self` and never touches the file cursor, allowing
//! concurrent reads from multiple threads with zero synchronization.
//!
//! Appends and truncations are serialized via a lightweight
//! [`parking_lot::Mutex`] guard (a unit `()` sentinel, not wrapping the
//! `File`) so the end offset cannot move between reading it and writing.

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

use super::StorageBackend;
use crate::error::Result;

/// File-based storage backend.
///
/// Durability requires the caller to invoke [`sync`](StorageBackend::sync)
/// after appends; data is not guaranteed on disk until `fsync` completes.
pub struct FileBackend {
    /// The underlying file handle.
    file: File,
    /// Serializes appends and truncations.
    write_lock: Mutex<()>,
    /// Path for diagnostics.
    path: PathBuf,
}

impl FileBackend {
    /// Opens a segment file, creating it empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        Ok(Self { file, write_lock: Mutex::new(()), path: path.as_ref().to_path_buf() })
    }

    /// Path of the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend").field("path", &self.path).finish()
    }
}

impl StorageBackend for FileBackend {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        read_exact_at_offset(&self.file, buf, offset)
    }

    fn append(&self, data: &[u8]) -> Result<u64> {
        let _guard = self.write_lock.lock();
        let offset = self.file.metadata()?.len();
        write_all_at_offset(&self.file, data, offset)?;
        Ok(offset)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.file.set_len(len)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        // sync_data() takes &self, no lock needed.
        self.file.sync_data()?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

// ---------------------------------------------------------------------------
// Platform-specific position-based I/O helpers
// ---------------------------------------------------------------------------

/// Reads exactly `buf.len()` bytes from `file` at the given byte `offset`.
#[cfg(unix)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    file.read_exact_at(buf, offset)?;
    Ok(())
}

/// Windows fallback: `seek_read` updates the file cursor, so this is NOT
/// lock-free.
#[cfg(windows)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "unexpected end of file during seek_read",
            )
            .into());
        }
        pos += n;
    }
    Ok(())
}

/// Writes all of `data` to `file` at the given byte `offset`.
#[cfg(unix)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    file.write_all_at(data, offset)?;
    Ok(())
}

/// Windows fallback for positional writes. A zero-length write is an error,
/// not a retry.
#[cfg(windows)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        match file.seek_write(&data[pos..], offset + pos as u64)? {
            0 => return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into()),
            n => pos += n,
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path().join("seg")).unwrap();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        backend.sync().unwrap();

        let mut buf = [0u8; 11];
        backend.read_exact_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello world");
        assert_eq!(backend.len().unwrap(), 11);
    }

    #[test]
    fn test_reopen_keeps_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg");
        {
            let backend = FileBackend::open(&path).unwrap();
            backend.append(b"durable").unwrap();
            backend.sync().unwrap();
        }
        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.len().unwrap(), 7);
        assert_eq!(backend.path(), path.as_path());
    }

    #[test]
    fn test_truncate_discards_tail() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path().join("seg")).unwrap();
        backend.append(b"keep-drop").unwrap();
        backend.truncate(4).unwrap();
        assert_eq!(backend.len().unwrap(), 4);
        assert_eq!(backend.append(b"!").unwrap(), 4);
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path().join("seg")).unwrap();
        backend.append(b"abc").unwrap();
        let mut buf = [0u8; 8];
        assert!(backend.read_exact_at(0, &mut buf).is_err());
    }

    /// Concurrent appends never interleave or overlap.
    #[test]
    fn test_concurrent_appends_do_not_overlap() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(FileBackend::open(dir.path().join("seg")).unwrap());

        let handles: Vec<_> = (0u8..4)
            .map(|t| {
                let b = Arc::clone(&backend);
                std::thread::spawn(move || {
                    (0..50).map(|_| b.append(&[t; 16]).unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut offsets: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        offsets.sort_unstable();
        for (i, offset) in offsets.iter().enumerate() {
            assert_eq!(*offset, i as u64 * 16);
        }
        for offset in offsets {
            let mut chunk = [0u8; 16];
            backend.read_exact_at(offset, &mut chunk).unwrap();
            assert!(chunk.iter().all(|b| *b == chunk[0]), "torn append at {offset}");
        }
    }
}
