//! Request-offset planning.
//!
//! A plan covers every whole block of the test file exactly once: one entry
//! per block position carrying the block's byte address and its read/write
//! intent. The plan is built once per run, shared read-only across worker
//! threads, and replayed cyclically when the run is duration-bounded.
//!
//! Planning works in whole blocks rather than byte offsets so that every
//! address is naturally aligned for direct IO. A trailing partial block, if
//! the file size is not an exact multiple, is dropped.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::error::{Error, Result};

/// Kind of workload driven against the test file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    Read,
    Write,
    ReadWrite,
}

/// One planned block access. Immutable once generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetEntry {
    /// Byte address of the block within the file.
    pub address: u64,
    /// Read intent; false means write.
    pub is_read: bool,
}

/// Ordered sequence of block accesses for one full file pass.
pub type OffsetPlan = Vec<OffsetEntry>;

/// Builds the offset plan for one run.
///
/// In mixed mode the first `⌊blocks * read_percentage / 100⌋` index positions
/// are reads and the remainder writes, assigned before any shuffle. The
/// shuffle therefore redistributes which address carries which intent, not
/// the global read/write ratio.
pub fn build(
    file_size: u64,
    block_size: u64,
    io_type: IoType,
    read_percentage: u8,
    randomize: bool,
    alignment: u64,
) -> Result<OffsetPlan> {
    if block_size == 0 || block_size % alignment != 0 {
        return Err(Error::Config(format!(
            "block size must be a nonzero multiple of {alignment} bytes"
        )));
    }
    if file_size < block_size {
        return Err(Error::Config(format!(
            "file size {file_size} is smaller than one block ({block_size})"
        )));
    }

    let blocks = file_size / block_size;
    let read_blocks = blocks * u64::from(read_percentage) / 100;

    let mut entries = Vec::with_capacity(blocks as usize);
    for index in 0..blocks {
        let is_read = match io_type {
            IoType::Read => true,
            IoType::Write => false,
            IoType::ReadWrite => index < read_blocks,
        };
        entries.push(OffsetEntry {
            address: index * block_size,
            is_read,
        });
    }

    if randomize {
        entries.shuffle(&mut Xoshiro256PlusPlus::from_entropy());
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: u64 = 4096;

    #[test]
    fn one_entry_per_whole_block() {
        let plan = build(64 * BLOCK, BLOCK, IoType::Write, 0, false, BLOCK).unwrap();
        assert_eq!(plan.len(), 64);
    }

    #[test]
    fn trailing_partial_block_is_dropped() {
        let plan = build(10 * BLOCK + 123, BLOCK, IoType::Read, 0, false, BLOCK).unwrap();
        assert_eq!(plan.len(), 10);
    }

    #[test]
    fn sequential_plan_is_ascending() {
        let plan = build(32 * BLOCK, BLOCK, IoType::Read, 0, false, BLOCK).unwrap();
        for (index, entry) in plan.iter().enumerate() {
            assert_eq!(entry.address, index as u64 * BLOCK);
            assert!(entry.is_read);
        }
    }

    #[test]
    fn pure_write_plan_has_no_reads() {
        let plan = build(16 * BLOCK, BLOCK, IoType::Write, 100, false, BLOCK).unwrap();
        assert!(plan.iter().all(|e| !e.is_read));
    }

    #[test]
    fn mixed_split_is_assigned_before_shuffle() {
        // 1000 blocks at 30% reads: first 300 positions read, last 700 write.
        let plan = build(1000 * BLOCK, BLOCK, IoType::ReadWrite, 30, false, BLOCK).unwrap();
        assert_eq!(plan.len(), 1000);
        assert!(plan[..300].iter().all(|e| e.is_read));
        assert!(plan[300..].iter().all(|e| !e.is_read));
    }

    #[test]
    fn shuffle_preserves_addresses_and_intent_counts() {
        let sequential = build(500 * BLOCK, BLOCK, IoType::ReadWrite, 40, false, BLOCK).unwrap();
        let shuffled = build(500 * BLOCK, BLOCK, IoType::ReadWrite, 40, true, BLOCK).unwrap();

        let reads = |p: &OffsetPlan| p.iter().filter(|e| e.is_read).count();
        assert_eq!(reads(&sequential), 200);
        assert_eq!(reads(&shuffled), 200);

        let mut seq_addrs: Vec<u64> = sequential.iter().map(|e| e.address).collect();
        let mut shuf_addrs: Vec<u64> = shuffled.iter().map(|e| e.address).collect();
        seq_addrs.sort_unstable();
        shuf_addrs.sort_unstable();
        assert_eq!(seq_addrs, shuf_addrs);
    }

    #[test]
    fn rejects_zero_block_size() {
        assert!(matches!(
            build(1 << 20, 0, IoType::Read, 0, false, 4096),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn rejects_unaligned_block_size() {
        assert!(matches!(
            build(1 << 20, 1000, IoType::Read, 0, false, 4096),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn rejects_file_smaller_than_block() {
        assert!(matches!(
            build(BLOCK - 1, BLOCK, IoType::Read, 0, false, BLOCK),
            Err(Error::Config(_))
        ));
    }
}
