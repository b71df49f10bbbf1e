//! Temporary store directories for tests.
//!
//! [`TestDir`] wraps [`tempfile::TempDir`] and adds the raw file surgery that
//! recovery and tamper tests need: reading, truncating and flipping bytes of a
//! closed store's segment files.

// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::expect_used)]

use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

/// A managed temporary directory for tests.
///
/// The directory is automatically cleaned up when this struct is dropped.
///
/// # Example
///
/// ```
/// use proofkv_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// dir.write("tx.log", b"garbage");
/// dir.flip_byte("tx.log", 0);
/// assert_eq!(dir.read("tx.log")[0], b'g' ^ 0xFF);
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Creates a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let inner = TempDir::new().expect("failed to create temp directory");
        Self { inner }
    }

    /// Returns the path to the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Joins a relative path to the temporary directory.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }

    /// Reads a whole file.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be read.
    #[must_use]
    pub fn read(&self, name: impl AsRef<Path>) -> Vec<u8> {
        std::fs::read(self.join(name)).expect("failed to read test file")
    }

    /// Replaces a file's contents.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write(&self, name: impl AsRef<Path>, bytes: &[u8]) {
        std::fs::write(self.join(name), bytes).expect("failed to write test file");
    }

    /// Length of a file in bytes.
    ///
    /// # Panics
    ///
    /// Panics if the file metadata cannot be read.
    #[must_use]
    pub fn file_len(&self, name: impl AsRef<Path>) -> u64 {
        std::fs::metadata(self.join(name)).expect("failed to stat test file").len()
    }

    /// Shrinks (or zero-extends) a file to `len` bytes, as a torn write would.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be opened or resized.
    pub fn truncate(&self, name: impl AsRef<Path>, len: u64) {
        let file = OpenOptions::new()
            .write(true)
            .open(self.join(name))
            .expect("failed to open test file");
        file.set_len(len).expect("failed to resize test file");
    }

    /// Inverts every bit of the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be rewritten or `offset` is past the end.
    pub fn flip_byte(&self, name: impl AsRef<Path>, offset: usize) {
        let name = name.as_ref();
        let mut bytes = self.read(name);
        bytes[offset] ^= 0xFF;
        self.write(name, &bytes);
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
