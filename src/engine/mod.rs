//! Asynchronous IO backend abstraction.
//!
//! A backend owns one per-thread submission context against the shared test
//! file and exposes non-blocking submit and poll operations. Submissions are
//! keyed by a caller-chosen token — an index into the worker's task-slot pool
//! — which the backend hands back verbatim when the operation completes, so
//! the backend never allocates per-operation state that outlives a poll.
//!
//! Two platform backends exist: Linux native AIO (`libaio`) and Windows
//! overlapped IO over a completion port (`iocp`). The portable `sync` backend
//! performs the transfer at submit time and surfaces it at the next poll; it
//! is the fallback on other platforms and the test vehicle everywhere. The
//! `mock` backend is a scriptable stand-in for exercising the task engine's
//! state machine. Further backends (io_uring) can be added behind the same
//! trait without touching the task engine.

use std::fmt;

use crate::error::Result;
use crate::target::TestFile;

pub mod mock;
pub mod sync;

#[cfg(target_os = "linux")]
pub mod libaio;

#[cfg(windows)]
pub mod iocp;

/// Direction of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Read => "read",
            RequestKind::Write => "write",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One IO submission.
///
/// # Safety
///
/// `buffer` must point to at least `length` bytes, aligned for direct IO, and
/// must stay valid and untouched by anyone else until the completion carrying
/// `token` has been observed. The task engine guarantees this by giving each
/// slot exclusive ownership of its buffer while the slot is pending.
#[derive(Debug)]
pub struct IoRequest {
    pub kind: RequestKind,
    pub offset: u64,
    pub buffer: *mut u8,
    pub length: usize,
    pub token: u64,
}

// The raw buffer pointer stays within the submitting thread; the request is
// Send so boxed engines can move between threads at spawn time.
unsafe impl Send for IoRequest {}

/// A successfully completed operation.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    /// Token of the originating request (task-slot index).
    pub token: u64,
    /// Bytes transferred, always the full requested length.
    pub bytes: usize,
}

/// Per-thread asynchronous IO context.
///
/// Engines are created per worker thread and never shared; `Send` allows the
/// boxed engine to move onto its thread. All methods are non-blocking.
pub trait IoEngine: Send {
    /// Establishes the submission context against `file`, sized for up to
    /// `queue_depth` simultaneously outstanding operations.
    fn open(&mut self, file: &TestFile, queue_depth: usize) -> Result<()>;

    /// Enqueues one non-blocking operation. An error means the backend
    /// rejected the request (queue full, invalid handle) and is fatal to the
    /// owning worker thread.
    fn submit(&mut self, request: IoRequest) -> Result<()>;

    /// Non-blocking completion check: the token of one finished operation,
    /// or `None` when nothing is ready. A completed operation that reports
    /// an error status or a short transfer surfaces as `Err`; the failed
    /// operation is considered retired.
    fn poll_completion(&mut self) -> Result<Option<Completion>>;

    /// Releases the context. Callers drain their in-flight operations first;
    /// engines may nevertheless consume stragglers to guarantee the OS has
    /// relinquished every buffer before the slot pool is freed.
    fn close(&mut self) -> Result<()>;
}

/// Engine selection, resolved per worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    /// The platform's native asynchronous backend.
    #[default]
    Platform,
    /// Portable synchronous fallback.
    Sync,
}

/// Instantiates a fresh engine of the requested kind.
pub fn create_engine(kind: EngineKind) -> Box<dyn IoEngine> {
    match kind {
        EngineKind::Platform => platform_engine(),
        EngineKind::Sync => Box::new(sync::SyncEngine::new()),
    }
}

#[cfg(target_os = "linux")]
fn platform_engine() -> Box<dyn IoEngine> {
    Box::new(libaio::LibaioEngine::new())
}

#[cfg(windows)]
fn platform_engine() -> Box<dyn IoEngine> {
    Box::new(iocp::IocpEngine::new())
}

#[cfg(not(any(target_os = "linux", windows)))]
fn platform_engine() -> Box<dyn IoEngine> {
    Box::new(sync::SyncEngine::new())
}

/// Minimum direct-IO alignment, reported by the platform.
#[cfg(unix)]
pub fn memory_page_size() -> usize {
    // sysconf cannot fail for _SC_PAGESIZE on any supported platform.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Minimum direct-IO alignment, reported by the platform.
#[cfg(windows)]
pub fn memory_page_size() -> usize {
    use std::mem::MaybeUninit;
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    let mut info = MaybeUninit::<SYSTEM_INFO>::uninit();
    // GetSystemInfo always succeeds and fully initializes the struct.
    unsafe {
        GetSystemInfo(info.as_mut_ptr());
        info.assume_init().dwPageSize as usize
    }
}
