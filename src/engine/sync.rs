//! Synchronous fallback backend.
//!
//! Performs each transfer with a positioned read/write syscall at submit time
//! and parks the outcome in a completion queue that `poll_completion` drains
//! one entry at a time. Semantically every operation is in flight from submit
//! until its completion is observed, which preserves the task engine's slot
//! accounting while trading away actual submission/completion overlap. Always
//! available, so it doubles as the platform fallback and the end-to-end test
//! vehicle.

use std::collections::VecDeque;
use std::fs::File;
use std::slice;

use super::{Completion, IoEngine, IoRequest, RequestKind};
use crate::error::{Error, Result};
use crate::target::TestFile;

pub struct SyncEngine {
    file: Option<File>,
    ready: VecDeque<Result<Completion>>,
}

impl SyncEngine {
    pub fn new() -> Self {
        SyncEngine {
            file: None,
            ready: VecDeque::new(),
        }
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

impl IoEngine for SyncEngine {
    fn open(&mut self, file: &TestFile, queue_depth: usize) -> Result<()> {
        self.file = Some(
            file.open_for_io()
                .map_err(|source| Error::FileInit { source })?,
        );
        self.ready.reserve(queue_depth);
        Ok(())
    }

    fn submit(&mut self, request: IoRequest) -> Result<()> {
        let file = self.file.as_ref().ok_or_else(|| {
            Error::Submit {
                op: request.kind.as_str(),
                offset: request.offset,
                source: std::io::Error::new(std::io::ErrorKind::Other, "engine not open"),
            }
        })?;

        let op = request.kind.as_str();
        let transferred = match request.kind {
            RequestKind::Read => {
                // Safety: the task slot owns this buffer until the completion
                // below is observed; see the IoRequest contract.
                let buf = unsafe { slice::from_raw_parts_mut(request.buffer, request.length) };
                read_at(file, buf, request.offset)
            }
            RequestKind::Write => {
                let buf = unsafe { slice::from_raw_parts(request.buffer, request.length) };
                write_at(file, buf, request.offset)
            }
        };

        // OS errors and short transfers are completion-time failures, matching
        // the asynchronous backends.
        let outcome = match transferred {
            Ok(bytes) if bytes == request.length => Ok(Completion {
                token: request.token,
                bytes,
            }),
            Ok(bytes) => Err(Error::short_transfer(op, request.length, bytes)),
            Err(source) => Err(Error::Completion { op, source }),
        };
        self.ready.push_back(outcome);
        Ok(())
    }

    fn poll_completion(&mut self) -> Result<Option<Completion>> {
        match self.ready.pop_front() {
            Some(Ok(completion)) => Ok(Some(completion)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.ready.clear();
        self.file = None;
        Ok(())
    }
}
