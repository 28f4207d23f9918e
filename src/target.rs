//! Test file lifecycle.
//!
//! The benchmark drives all IO against a single flat binary file sized to a
//! whole number of blocks and content-filled by repeating one template block.
//! The file is created and sized exactly once before any worker thread
//! starts, reopened with direct-IO flags for the measured phase, and deleted
//! at teardown unless reuse across runs was requested.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// The singleton backing file of one benchmark run.
pub struct TestFile {
    path: PathBuf,
    size: u64,
    block_size: u64,
    direct: bool,
    keep: bool,
    // Held open for the whole run so the path cannot vanish between
    // initialization and the per-thread reopens.
    handle: Option<File>,
}

impl TestFile {
    /// Creates (or reuses) and opens the test file.
    ///
    /// The target size is rounded down to a whole number of blocks. An
    /// existing file is reused only when `reuse` is set and its size already
    /// matches the rounded target; otherwise it is recreated and filled by
    /// repeatedly writing `template`, then flushed to stable storage before
    /// the direct-IO reopen.
    pub fn initialize(
        path: &Path,
        direct: bool,
        size: u64,
        template: &[u8],
        reuse: bool,
    ) -> Result<Self> {
        let block_size = template.len() as u64;
        let rounded = size / block_size * block_size;

        let matches_existing = reuse
            && fs::metadata(path)
                .map(|m| m.is_file() && m.len() == rounded)
                .unwrap_or(false);

        if !matches_existing {
            Self::create_and_fill(path, rounded, template).map_err(|source| Error::FileInit { source })?;
        }

        let handle = Self::open_options(direct)
            .open(path)
            .map_err(|source| Error::FileInit { source })?;

        Ok(TestFile {
            path: path.to_path_buf(),
            size: rounded,
            block_size,
            direct,
            keep: reuse,
            handle: Some(handle),
        })
    }

    fn create_and_fill(path: &Path, size: u64, template: &[u8]) -> io::Result<()> {
        let mut file = File::create(path)?;
        let blocks = size / template.len() as u64;
        for _ in 0..blocks {
            file.write_all(template)?;
        }
        file.sync_all()
    }

    /// Opens an additional handle for a per-thread IO context, with the same
    /// direct-IO flags as the shared handle.
    pub fn open_for_io(&self) -> io::Result<File> {
        Self::open_options(self.direct).open(&self.path)
    }

    #[cfg(unix)]
    fn open_options(direct: bool) -> OpenOptions {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        // O_DIRECT is Linux-specific; other Unixes fall back to buffered IO.
        if direct {
            #[cfg(target_os = "linux")]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.custom_flags(libc::O_DIRECT);
            }
        }
        options
    }

    #[cfg(windows)]
    fn open_options(direct: bool) -> OpenOptions {
        use std::os::windows::fs::OpenOptionsExt;
        use windows_sys::Win32::Storage::FileSystem::{
            FILE_FLAG_NO_BUFFERING, FILE_FLAG_OVERLAPPED, FILE_FLAG_WRITE_THROUGH,
        };

        let mut flags = FILE_FLAG_OVERLAPPED;
        if direct {
            flags |= FILE_FLAG_NO_BUFFERING | FILE_FLAG_WRITE_THROUGH;
        }
        let mut options = OpenOptions::new();
        options.read(true).write(true).custom_flags(flags);
        options
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes, always a whole number of blocks.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn direct(&self) -> bool {
        self.direct
    }

    /// Releases the shared handle and removes the file from disk unless it
    /// is being kept for reuse. Removal is best-effort; a file left behind
    /// does not invalidate collected results.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.handle.take().is_some() && !self.keep {
            let _ = fs::remove_file(&self.path);
        }
    }
}

impl Drop for TestFile {
    fn drop(&mut self) {
        self.release();
    }
}
