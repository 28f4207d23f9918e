//! Linux native AIO backend.
//!
//! Uses the kernel AIO interface (`io_setup`/`io_submit`/`io_getevents`/
//! `io_destroy`) through direct syscalls via libc rather than the LGPL
//! libaio binding. Each engine owns one AIO context sized to the worker's
//! queue depth and a pool of control blocks indexed by completion token, so
//! no per-operation state is heap-allocated on the hot path.
//!
//! Kernel AIO is only genuinely asynchronous for O_DIRECT files, which is
//! exactly how the benchmark opens its test file.

use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

use super::{Completion, IoEngine, IoRequest, RequestKind};
use crate::error::{Error, Result};
use crate::target::TestFile;

type AioContext = libc::c_ulong;

const IOCB_CMD_PREAD: u16 = 0;
const IOCB_CMD_PWRITE: u16 = 1;

/// Kernel `struct iocb` (uapi/linux/aio_abi.h), little-endian layout.
#[repr(C)]
#[derive(Clone, Copy, Default)]
struct IoControlBlock {
    data: u64,
    key: u32,
    rw_flags: u32,
    lio_opcode: u16,
    reqprio: i16,
    fildes: u32,
    buf: u64,
    nbytes: u64,
    offset: i64,
    reserved2: u64,
    flags: u32,
    resfd: u32,
}

/// Kernel `struct io_event`.
#[repr(C)]
#[derive(Clone, Copy, Default)]
struct AioEvent {
    data: u64,
    obj: u64,
    res: i64,
    res2: i64,
}

unsafe fn io_setup(nr_events: libc::c_int, ctx: *mut AioContext) -> libc::c_int {
    libc::syscall(libc::SYS_io_setup, nr_events, ctx) as libc::c_int
}

unsafe fn io_destroy(ctx: AioContext) -> libc::c_int {
    libc::syscall(libc::SYS_io_destroy, ctx) as libc::c_int
}

unsafe fn io_submit(
    ctx: AioContext,
    nr: libc::c_long,
    iocbs: *mut *mut IoControlBlock,
) -> libc::c_int {
    libc::syscall(libc::SYS_io_submit, ctx, nr, iocbs) as libc::c_int
}

unsafe fn io_getevents(
    ctx: AioContext,
    min_nr: libc::c_long,
    nr: libc::c_long,
    events: *mut AioEvent,
    timeout: *mut libc::timespec,
) -> libc::c_int {
    libc::syscall(libc::SYS_io_getevents, ctx, min_nr, nr, events, timeout) as libc::c_int
}

pub struct LibaioEngine {
    file: Option<File>,
    ctx: Option<AioContext>,
    /// Control blocks indexed by completion token; a token's block is free
    /// whenever its slot is idle, so the pool never needs a free list.
    iocbs: Vec<IoControlBlock>,
    /// Reusable event buffer for io_getevents.
    events: Vec<AioEvent>,
    /// Completions reaped in a batch but not yet handed to the caller.
    reaped: VecDeque<Result<Completion>>,
    in_flight: usize,
}

impl LibaioEngine {
    pub fn new() -> Self {
        LibaioEngine {
            file: None,
            ctx: None,
            iocbs: Vec::new(),
            events: Vec::new(),
            reaped: VecDeque::new(),
            in_flight: 0,
        }
    }

    /// Reaps whatever the kernel has finished, without blocking.
    fn reap(&mut self) -> Result<()> {
        let ctx = match self.ctx {
            Some(ctx) => ctx,
            None => return Ok(()),
        };
        if self.in_flight == 0 {
            return Ok(());
        }

        let mut timeout = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let reaped = unsafe {
            io_getevents(
                ctx,
                0,
                self.events.len() as libc::c_long,
                self.events.as_mut_ptr(),
                &mut timeout,
            )
        };
        if reaped < 0 {
            return Err(Error::Completion {
                op: "poll",
                source: io::Error::last_os_error(),
            });
        }

        for i in 0..reaped as usize {
            let event = self.events[i];
            self.in_flight -= 1;
            let token = event.data;
            let iocb = &self.iocbs[token as usize];
            let op = match iocb.lio_opcode {
                IOCB_CMD_PWRITE => "write",
                _ => "read",
            };

            let outcome = if event.res < 0 {
                Err(Error::Completion {
                    op,
                    source: io::Error::from_raw_os_error(-event.res as i32),
                })
            } else if (event.res as u64) < iocb.nbytes {
                Err(Error::short_transfer(op, iocb.nbytes as usize, event.res as usize))
            } else {
                Ok(Completion {
                    token,
                    bytes: event.res as usize,
                })
            };
            self.reaped.push_back(outcome);
        }
        Ok(())
    }
}

impl Default for LibaioEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IoEngine for LibaioEngine {
    fn open(&mut self, file: &TestFile, queue_depth: usize) -> Result<()> {
        let handle = file
            .open_for_io()
            .map_err(|source| Error::FileInit { source })?;

        let mut ctx: AioContext = 0;
        let rc = unsafe { io_setup(queue_depth as libc::c_int, &mut ctx) };
        if rc < 0 {
            return Err(Error::FileInit {
                source: io::Error::last_os_error(),
            });
        }

        self.file = Some(handle);
        self.ctx = Some(ctx);
        self.iocbs = vec![IoControlBlock::default(); queue_depth];
        self.events = vec![AioEvent::default(); queue_depth];
        self.in_flight = 0;
        Ok(())
    }

    fn submit(&mut self, request: IoRequest) -> Result<()> {
        let reject = |source: io::Error| Error::Submit {
            op: request.kind.as_str(),
            offset: request.offset,
            source,
        };

        let fd = self
            .file
            .as_ref()
            .ok_or_else(|| reject(io::Error::new(io::ErrorKind::Other, "engine not open")))?
            .as_raw_fd();
        let ctx = self
            .ctx
            .ok_or_else(|| reject(io::Error::new(io::ErrorKind::Other, "engine not open")))?;

        let token = request.token as usize;
        if token >= self.iocbs.len() {
            return Err(reject(io::Error::new(
                io::ErrorKind::WouldBlock,
                "submission queue full",
            )));
        }

        self.iocbs[token] = IoControlBlock {
            data: request.token,
            lio_opcode: match request.kind {
                RequestKind::Read => IOCB_CMD_PREAD,
                RequestKind::Write => IOCB_CMD_PWRITE,
            },
            fildes: fd as u32,
            buf: request.buffer as u64,
            nbytes: request.length as u64,
            offset: request.offset as i64,
            ..IoControlBlock::default()
        };

        let mut iocb_ptr = &mut self.iocbs[token] as *mut IoControlBlock;
        let rc = unsafe { io_submit(ctx, 1, &mut iocb_ptr) };
        if rc < 0 {
            return Err(reject(io::Error::last_os_error()));
        }
        if rc == 0 {
            return Err(reject(io::Error::new(
                io::ErrorKind::WouldBlock,
                "submission queue full",
            )));
        }

        self.in_flight += 1;
        Ok(())
    }

    fn poll_completion(&mut self) -> Result<Option<Completion>> {
        if self.reaped.is_empty() {
            self.reap()?;
        }
        match self.reaped.pop_front() {
            Some(Ok(completion)) => Ok(Some(completion)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(ctx) = self.ctx.take() {
            // Consume any stragglers so the kernel has relinquished every
            // buffer before the slot pool is freed.
            while self.in_flight > 0 {
                let mut timeout = libc::timespec {
                    tv_sec: 0,
                    tv_nsec: 1_000_000,
                };
                let reaped = unsafe {
                    io_getevents(
                        ctx,
                        1,
                        self.events.len() as libc::c_long,
                        self.events.as_mut_ptr(),
                        &mut timeout,
                    )
                };
                if reaped <= 0 {
                    break;
                }
                self.in_flight -= reaped as usize;
            }

            let rc = unsafe { io_destroy(ctx) };
            if rc < 0 {
                return Err(Error::Completion {
                    op: "close",
                    source: io::Error::last_os_error(),
                });
            }
        }
        self.reaped.clear();
        self.file = None;
        Ok(())
    }
}

impl Drop for LibaioEngine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory_page_size;
    use crate::util::buffer::AlignedBuffer;
    use tempfile::TempDir;

    const BLOCK: usize = 4096;

    fn test_file(dir: &TempDir, blocks: u64, fill: u8) -> TestFile {
        let template = vec![fill; BLOCK];
        TestFile::initialize(
            &dir.path().join("aio.dat"),
            false, // buffered, for tmpfs compatibility in tests
            blocks * BLOCK as u64,
            &template,
            false,
        )
        .unwrap()
    }

    #[test]
    fn open_and_close() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, 1, 0);

        let mut engine = LibaioEngine::new();
        engine.open(&file, 8).unwrap();
        engine.close().unwrap();
    }

    #[test]
    fn read_returns_file_contents() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, 4, 0x7E);

        let mut engine = LibaioEngine::new();
        engine.open(&file, 4).unwrap();

        let mut buf = AlignedBuffer::new(BLOCK, memory_page_size());
        engine
            .submit(IoRequest {
                kind: RequestKind::Read,
                offset: 2 * BLOCK as u64,
                buffer: buf.as_mut_ptr(),
                length: BLOCK,
                token: 3,
            })
            .unwrap();

        let completion = loop {
            if let Some(completion) = engine.poll_completion().unwrap() {
                break completion;
            }
            std::thread::yield_now();
        };
        assert_eq!(completion.token, 3);
        assert_eq!(completion.bytes, BLOCK);
        assert!(buf.as_slice().iter().all(|&b| b == 0x7E));

        engine.close().unwrap();
    }

    #[test]
    fn write_round_trips() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, 2, 0);

        let mut engine = LibaioEngine::new();
        engine.open(&file, 2).unwrap();

        let mut out = AlignedBuffer::new(BLOCK, memory_page_size());
        out.as_mut_slice().fill(0xA5);
        engine
            .submit(IoRequest {
                kind: RequestKind::Write,
                offset: BLOCK as u64,
                buffer: out.as_mut_ptr(),
                length: BLOCK,
                token: 0,
            })
            .unwrap();
        while engine.poll_completion().unwrap().is_none() {
            std::thread::yield_now();
        }
        engine.close().unwrap();

        let contents = std::fs::read(file.path()).unwrap();
        assert!(contents[BLOCK..].iter().all(|&b| b == 0xA5));
    }

    #[test]
    fn out_of_range_token_is_a_submit_error() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, 1, 0);

        let mut engine = LibaioEngine::new();
        engine.open(&file, 1).unwrap();

        let mut buf = AlignedBuffer::new(BLOCK, memory_page_size());
        let result = engine.submit(IoRequest {
            kind: RequestKind::Read,
            offset: 0,
            buffer: buf.as_mut_ptr(),
            length: BLOCK,
            token: 1, // queue depth is 1, valid tokens are {0}
        });
        assert!(matches!(result, Err(Error::Submit { .. })));
        engine.close().unwrap();
    }

    #[test]
    fn submit_without_open_fails() {
        let mut engine = LibaioEngine::new();
        let mut buf = [0u8; 512];
        let result = engine.submit(IoRequest {
            kind: RequestKind::Read,
            offset: 0,
            buffer: buf.as_mut_ptr(),
            length: 512,
            token: 0,
        });
        assert!(matches!(result, Err(Error::Submit { .. })));
    }
}
