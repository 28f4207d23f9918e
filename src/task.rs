//! The per-thread task engine.
//!
//! Keeps exactly `queue_depth` IO operations perpetually in flight against
//! the shared offset plan: each loop iteration admits new work into idle
//! slots while the engine is running, then drains every completion the
//! backend has ready. Admission stops when the configured duration elapses
//! (checked once per iteration, during admission only) or, for untimed runs,
//! after exactly one full pass over the plan; in-flight operations are always
//! drained before the loop exits so no buffer is freed while the OS still
//! owns it — on fatal errors as well as on normal completion.

use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::block;
use crate::engine::{IoEngine, IoRequest, RequestKind};
use crate::error::{Error, Result};
use crate::plan::OffsetEntry;
use crate::stats::ThreadReport;
use crate::target::TestFile;
use crate::util::buffer::AlignedBuffer;

/// Per-thread scheduling parameters.
#[derive(Debug, Clone)]
pub struct TaskOptions {
    /// Number of simultaneously outstanding operations (queue depth).
    pub queue_depth: usize,
    /// Wall-time bound in seconds; 0 means exactly one full plan pass.
    pub seconds: u32,
    /// Verify a CRC tag on every read and stamp one into every write.
    pub crc: bool,
    /// First plan index this thread consumes (nonzero only for phase-shifted
    /// thread starts).
    pub start_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    ReadPending,
    WritePending,
}

/// One concurrently-outstanding operation and its exclusively-owned buffer.
struct TaskSlot {
    state: SlotState,
    buffer: AlignedBuffer,
    /// Block address of the operation currently in this slot.
    address: u64,
    submitted_at: Instant,
}

impl TaskSlot {
    fn new(block_size: usize, alignment: usize) -> Self {
        TaskSlot {
            state: SlotState::Idle,
            buffer: AlignedBuffer::new(block_size, alignment),
            address: 0,
            submitted_at: Instant::now(),
        }
    }
}

/// Runs this thread's share of the benchmark to completion.
///
/// On a fatal error the already-submitted operations are drained before the
/// error is returned, so every buffer has been relinquished by the OS by the
/// time the slot pool drops.
pub fn run_tasks(
    engine: &mut dyn IoEngine,
    file: &TestFile,
    plan: &[OffsetEntry],
    opts: &TaskOptions,
) -> Result<ThreadReport> {
    if plan.is_empty() {
        return Err(Error::Config("offset plan is empty".into()));
    }

    engine.open(file, opts.queue_depth)?;

    let block_size = file.block_size() as usize;
    let alignment = crate::engine::memory_page_size();
    let mut rng = Xoshiro256PlusPlus::from_entropy();

    let mut slots: Vec<TaskSlot> = (0..opts.queue_depth)
        .map(|_| TaskSlot::new(block_size, alignment))
        .collect();

    // Without integrity tags the write payload never changes, so one random
    // fill per slot up front covers the whole run.
    if !opts.crc {
        for slot in &mut slots {
            block::fill(&mut rng, slot.buffer.as_mut_slice(), false);
        }
    }

    let mut report = ThreadReport::new();
    let mut pending = 0usize;
    let mut issued = 0u64;
    let mut index = opts.start_index % plan.len();
    let duration = Duration::from_secs(u64::from(opts.seconds));
    let mut running = true;
    let started = Instant::now();

    let outcome: Result<()> = 'run: loop {
        if running && opts.seconds > 0 {
            running = started.elapsed() < duration;
        }

        if running && pending < slots.len() {
            for token in 0..slots.len() {
                if slots[token].state != SlotState::Idle {
                    continue;
                }
                let entry = plan[index];
                index += 1;
                if index >= plan.len() {
                    // The plan replays cyclically for duration-bounded runs.
                    index = 0;
                }

                let slot = &mut slots[token];
                slot.address = entry.address;
                let kind = if entry.is_read {
                    slot.state = SlotState::ReadPending;
                    RequestKind::Read
                } else {
                    if opts.crc {
                        block::fill(&mut rng, slot.buffer.as_mut_slice(), true);
                    }
                    slot.state = SlotState::WritePending;
                    RequestKind::Write
                };
                slot.submitted_at = Instant::now();

                let submitted = engine.submit(IoRequest {
                    kind,
                    offset: entry.address,
                    buffer: slot.buffer.as_mut_ptr(),
                    length: block_size,
                    token: token as u64,
                });
                if let Err(error) = submitted {
                    // The operation never entered the queue.
                    slot.state = SlotState::Idle;
                    break 'run Err(error);
                }
                pending += 1;

                if opts.seconds == 0 {
                    issued += 1;
                    if issued >= plan.len() as u64 {
                        running = false;
                        break;
                    }
                }
            }
        }

        let mut retired = 0usize;
        loop {
            match engine.poll_completion() {
                Ok(Some(completion)) => {
                    let token = completion.token as usize;
                    let slot = &mut slots[token];
                    pending -= 1;
                    retired += 1;
                    report.latency.record(slot.submitted_at.elapsed());
                    report.bytes_transferred += completion.bytes as u64;

                    let was_read = slot.state == SlotState::ReadPending;
                    slot.state = SlotState::Idle;
                    if was_read {
                        if opts.crc && !block::verify(slot.buffer.as_slice()) {
                            break 'run Err(Error::Integrity {
                                offset: slot.address,
                            });
                        }
                        report.read_ops += 1;
                    } else {
                        report.write_ops += 1;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    // The failed operation was consumed by the backend.
                    pending -= 1;
                    break 'run Err(error);
                }
            }
        }

        if !running && pending == 0 {
            break Ok(());
        }
        if retired == 0 && pending == slots.len() {
            // Queue is full and nothing completed this round.
            std::thread::yield_now();
        }
    };

    report.duration = started.elapsed();

    match outcome {
        Ok(()) => {
            engine.close()?;
            Ok(report)
        }
        Err(error) => {
            drain_in_flight(engine, &mut pending);
            let _ = engine.close();
            Err(error)
        }
    }
}

/// Consumes every already-submitted operation after a fatal error, so the OS
/// relinquishes ownership of all slot buffers before they are freed.
fn drain_in_flight(engine: &mut dyn IoEngine, pending: &mut usize) {
    while *pending > 0 {
        match engine.poll_completion() {
            Ok(Some(_)) | Err(_) => *pending -= 1,
            Ok(None) => std::thread::yield_now(),
        }
    }
}
