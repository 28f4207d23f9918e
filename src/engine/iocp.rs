//! Windows overlapped-IO backend.
//!
//! Each engine reopens the test file with `FILE_FLAG_OVERLAPPED` (plus
//! `FILE_FLAG_NO_BUFFERING | FILE_FLAG_WRITE_THROUGH` for direct access) and
//! binds the handle to a private completion port — an IOCP association is
//! per-handle, so per-thread contexts cannot share one handle. One
//! `OVERLAPPED` record is preallocated per task slot; the completion token is
//! recovered from the dequeued record's position in that pool.

use std::fs::File;
use std::io;
use std::mem;
use std::os::windows::io::AsRawHandle;
use std::ptr;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_IO_PENDING, HANDLE, WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatus, OVERLAPPED, OVERLAPPED_0, OVERLAPPED_0_0,
};

use super::{Completion, IoEngine, IoRequest, RequestKind};
use crate::error::{Error, Result};
use crate::target::TestFile;

pub struct IocpEngine {
    file: Option<File>,
    port: HANDLE,
    /// One record per task slot; addresses must stay stable while operations
    /// are in flight, hence the boxed slice.
    overlapped: Box<[OVERLAPPED]>,
    /// Expected transfer length per slot, for short-transfer detection.
    lengths: Box<[usize]>,
    kinds: Box<[RequestKind]>,
    in_flight: usize,
}

// The OVERLAPPED pool is only ever touched from the owning worker thread;
// Send is required to move the boxed engine onto that thread.
unsafe impl Send for IocpEngine {}

impl IocpEngine {
    pub fn new() -> Self {
        IocpEngine {
            file: None,
            port: ptr::null_mut(),
            overlapped: Box::new([]),
            lengths: Box::new([]),
            kinds: Box::new([]),
            in_flight: 0,
        }
    }

    fn token_of(&self, record: *mut OVERLAPPED) -> u64 {
        // The dequeued record always comes from our pool.
        let base = self.overlapped.as_ptr();
        unsafe { record.offset_from(base) as u64 }
    }
}

impl Default for IocpEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IoEngine for IocpEngine {
    fn open(&mut self, file: &TestFile, queue_depth: usize) -> Result<()> {
        let handle = file
            .open_for_io()
            .map_err(|source| Error::FileInit { source })?;

        // Creates the port and associates the file handle in one call; the
        // port is drained by this thread only.
        let port = unsafe {
            CreateIoCompletionPort(handle.as_raw_handle() as HANDLE, ptr::null_mut(), 0, 1)
        };
        if port.is_null() {
            return Err(Error::FileInit {
                source: io::Error::last_os_error(),
            });
        }

        self.file = Some(handle);
        self.port = port;
        self.overlapped = vec![unsafe { mem::zeroed::<OVERLAPPED>() }; queue_depth].into();
        self.lengths = vec![0usize; queue_depth].into();
        self.kinds = vec![RequestKind::Read; queue_depth].into();
        self.in_flight = 0;
        Ok(())
    }

    fn submit(&mut self, request: IoRequest) -> Result<()> {
        let reject = |source: io::Error| Error::Submit {
            op: request.kind.as_str(),
            offset: request.offset,
            source,
        };

        let file = self
            .file
            .as_ref()
            .ok_or_else(|| reject(io::Error::new(io::ErrorKind::Other, "engine not open")))?;

        let token = request.token as usize;
        if token >= self.overlapped.len() {
            return Err(reject(io::Error::new(
                io::ErrorKind::WouldBlock,
                "submission queue full",
            )));
        }

        self.overlapped[token] = OVERLAPPED {
            Internal: 0,
            InternalHigh: 0,
            Anonymous: OVERLAPPED_0 {
                Anonymous: OVERLAPPED_0_0 {
                    Offset: request.offset as u32,
                    OffsetHigh: (request.offset >> 32) as u32,
                },
            },
            hEvent: ptr::null_mut(),
        };
        self.lengths[token] = request.length;
        self.kinds[token] = request.kind;

        let handle = file.as_raw_handle() as HANDLE;
        let record_ptr = &mut self.overlapped[token] as *mut OVERLAPPED;
        let ok = unsafe {
            match request.kind {
                RequestKind::Read => ReadFile(
                    handle,
                    request.buffer,
                    request.length as u32,
                    ptr::null_mut(),
                    record_ptr,
                ),
                RequestKind::Write => WriteFile(
                    handle,
                    request.buffer,
                    request.length as u32,
                    ptr::null_mut(),
                    record_ptr,
                ),
            }
        };

        if ok == 0 {
            let code = unsafe { GetLastError() };
            if code != ERROR_IO_PENDING {
                return Err(reject(io::Error::from_raw_os_error(code as i32)));
            }
        }
        // A synchronous success still posts to the completion port, so both
        // outcomes are handled uniformly at poll time.
        self.in_flight += 1;
        Ok(())
    }

    fn poll_completion(&mut self) -> Result<Option<Completion>> {
        if self.in_flight == 0 {
            return Ok(None);
        }

        let mut bytes: u32 = 0;
        let mut key: usize = 0;
        let mut record: *mut OVERLAPPED = ptr::null_mut();
        let ok = unsafe {
            GetQueuedCompletionStatus(self.port, &mut bytes, &mut key, &mut record, 0)
        };

        if ok == 0 {
            if record.is_null() {
                // Nothing was dequeued: either nothing is ready yet or the
                // port itself failed.
                let code = unsafe { GetLastError() };
                if code == WAIT_TIMEOUT {
                    return Ok(None);
                }
                return Err(Error::Completion {
                    op: "poll",
                    source: io::Error::from_raw_os_error(code as i32),
                });
            }
            // An operation was dequeued with a failure status.
            let token = self.token_of(record);
            self.in_flight -= 1;
            let code = unsafe { GetLastError() };
            return Err(Error::Completion {
                op: self.kinds[token as usize].as_str(),
                source: io::Error::from_raw_os_error(code as i32),
            });
        }

        let token = self.token_of(record);
        self.in_flight -= 1;

        let expected = self.lengths[token as usize];
        if (bytes as usize) < expected {
            return Err(Error::short_transfer(
                self.kinds[token as usize].as_str(),
                expected,
                bytes as usize,
            ));
        }

        Ok(Some(Completion {
            token,
            bytes: bytes as usize,
        }))
    }

    fn close(&mut self) -> Result<()> {
        if !self.port.is_null() {
            // Consume stragglers so the OS has relinquished every buffer
            // before the slot pool is freed.
            while self.in_flight > 0 {
                let mut bytes: u32 = 0;
                let mut key: usize = 0;
                let mut record: *mut OVERLAPPED = ptr::null_mut();
                let ok = unsafe {
                    GetQueuedCompletionStatus(self.port, &mut bytes, &mut key, &mut record, 100)
                };
                if ok == 0 && record.is_null() {
                    break;
                }
                self.in_flight -= 1;
            }

            unsafe { CloseHandle(self.port) };
            self.port = ptr::null_mut();
        }
        self.file = None;
        Ok(())
    }
}

impl Drop for IocpEngine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
