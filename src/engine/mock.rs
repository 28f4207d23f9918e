//! Scriptable in-memory backend for tests.
//!
//! Completes operations first-in first-out without touching the OS, records
//! every submission for later inspection, and can inject submit failures,
//! completion failures, and artificial completion latency (a number of empty
//! polls before each completion becomes visible). The latter keeps operations
//! pending across scheduler iterations, which is what the task-engine state
//! machine tests need.

use std::collections::VecDeque;
use std::io;
use std::slice;

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use super::{Completion, IoEngine, IoRequest, RequestKind};
use crate::block;
use crate::error::{Error, Result};
use crate::target::TestFile;

/// Record of one submission, kept for test assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub kind: RequestKind,
    pub offset: u64,
    pub length: usize,
    pub token: u64,
}

pub struct MockEngine {
    pending: VecDeque<IoRequest>,
    submissions: Vec<SubmissionRecord>,
    /// Submission index (0-based) that fails, if any.
    fail_submit_at: Option<usize>,
    /// Completion index (0-based) that fails, if any.
    fail_completion_at: Option<usize>,
    completed: usize,
    /// Empty polls required before each completion surfaces.
    polls_per_completion: usize,
    polls_since_completion: usize,
    /// Fill read buffers with a CRC-tagged payload on completion.
    service_reads: bool,
    max_pending: usize,
    rng: Xoshiro256PlusPlus,
}

impl MockEngine {
    pub fn new() -> Self {
        MockEngine {
            pending: VecDeque::new(),
            submissions: Vec::new(),
            fail_submit_at: None,
            fail_completion_at: None,
            completed: 0,
            polls_per_completion: 0,
            polls_since_completion: 0,
            service_reads: false,
            max_pending: 0,
            rng: Xoshiro256PlusPlus::seed_from_u64(0x10D1),
        }
    }

    /// Fails the `index`-th submission (0-based) with a queue-full error.
    pub fn fail_submit_at(&mut self, index: usize) {
        self.fail_submit_at = Some(index);
    }

    /// Fails the `index`-th completion (0-based) with an IO error.
    pub fn fail_completion_at(&mut self, index: usize) {
        self.fail_completion_at = Some(index);
    }

    /// Requires `polls` empty polls before each completion surfaces.
    pub fn set_completion_latency(&mut self, polls: usize) {
        self.polls_per_completion = polls;
    }

    /// Makes completed reads deliver a CRC-tagged payload into their buffer.
    pub fn set_service_reads(&mut self, on: bool) {
        self.service_reads = on;
    }

    pub fn submissions(&self) -> &[SubmissionRecord] {
        &self.submissions
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Highest number of simultaneously outstanding operations observed.
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IoEngine for MockEngine {
    fn open(&mut self, _file: &TestFile, _queue_depth: usize) -> Result<()> {
        Ok(())
    }

    fn submit(&mut self, request: IoRequest) -> Result<()> {
        if self.fail_submit_at == Some(self.submissions.len()) {
            return Err(Error::Submit {
                op: request.kind.as_str(),
                offset: request.offset,
                source: io::Error::new(io::ErrorKind::WouldBlock, "injected queue rejection"),
            });
        }

        self.submissions.push(SubmissionRecord {
            kind: request.kind,
            offset: request.offset,
            length: request.length,
            token: request.token,
        });
        self.pending.push_back(request);
        self.max_pending = self.max_pending.max(self.pending.len());
        Ok(())
    }

    fn poll_completion(&mut self) -> Result<Option<Completion>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        if self.polls_since_completion < self.polls_per_completion {
            self.polls_since_completion += 1;
            return Ok(None);
        }
        self.polls_since_completion = 0;

        let request = self.pending.pop_front().expect("checked non-empty");
        let index = self.completed;
        self.completed += 1;

        if self.fail_completion_at == Some(index) {
            return Err(Error::Completion {
                op: request.kind.as_str(),
                source: io::Error::new(io::ErrorKind::Other, "injected completion failure"),
            });
        }

        if self.service_reads && request.kind == RequestKind::Read {
            // Safety: the submitting slot still owns this buffer; see the
            // IoRequest contract.
            let buf = unsafe { slice::from_raw_parts_mut(request.buffer, request.length) };
            block::fill(&mut self.rng, buf, true);
        }

        Ok(Some(Completion {
            token: request.token,
            bytes: request.length,
        }))
    }

    fn close(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }
}
