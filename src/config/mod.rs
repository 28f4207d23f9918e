//! Benchmark configuration.
//!
//! One `BenchConfig` describes the single workload a run executes. The CLI
//! (or any other embedder) fully populates and validates the configuration
//! before the core is invoked; validation failures are `Error::Config` and
//! are rejected before any IO happens.

pub mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::EngineKind;
use crate::error::{Error, Result};
use crate::plan::IoType;

/// Message sink for progress logging. Defaults to a no-op.
pub type LogFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Returns the default no-op log sink.
pub fn null_log() -> LogFn {
    Arc::new(|_| {})
}

#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Workload kind driven against the file.
    pub io_type: IoType,
    /// Test duration in seconds; 0 runs exactly one full file pass.
    pub seconds: u32,
    /// Read share for mixed workloads, 0–100.
    pub read_percentage: u8,
    /// Shuffle the offset plan instead of ascending address order.
    pub random_access: bool,
    /// Phase-shift each thread's starting plan index to desynchronize
    /// access patterns.
    pub unaligned_offsets: bool,
    /// Worker thread count.
    pub threads: u32,
    /// Outstanding operations per thread (queue depth).
    pub tasks: u32,
    /// Path of the benchmark's backing file.
    pub file_name: PathBuf,
    /// Target file size in bytes (rounded down to whole blocks).
    pub file_size: u64,
    /// IO block size in bytes.
    pub block_size: u64,
    /// Tag written blocks with a CRC and verify it on read-back.
    pub crc: bool,
    /// Keep and reuse an existing file across runs.
    pub reuse_file: bool,
    /// Open the file with direct-IO flags.
    pub direct: bool,
    /// Backend selection.
    pub engine: EngineKind,
}

impl BenchConfig {
    /// Checks the parameters that must hold before any IO is issued.
    pub fn validate(&self, page_size: u64) -> Result<()> {
        if self.block_size == 0 || self.block_size % page_size != 0 {
            return Err(Error::Config(format!(
                "block size must be a nonzero multiple of {page_size} bytes"
            )));
        }
        if self.file_size < self.block_size {
            return Err(Error::Config(
                "file size must hold at least one block".into(),
            ));
        }
        if self.threads == 0 || self.tasks == 0 {
            return Err(Error::Config("invalid thread or task number".into()));
        }
        if self.read_percentage > 100 {
            return Err(Error::Config("read percentage must be 0-100".into()));
        }
        Ok(())
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            io_type: IoType::Read,
            seconds: 0,
            read_percentage: 50,
            random_access: false,
            unaligned_offsets: false,
            threads: 1,
            tasks: 1,
            file_name: PathBuf::from("iodrill.dat"),
            file_size: 0,
            block_size: 0,
            crc: false,
            reuse_file: false,
            direct: true,
            engine: EngineKind::Platform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> BenchConfig {
        BenchConfig {
            file_size: 1 << 20,
            block_size: 4096,
            tasks: 8,
            ..BenchConfig::default()
        }
    }

    #[test]
    fn accepts_aligned_parameters() {
        assert!(valid().validate(4096).is_ok());
    }

    #[test]
    fn rejects_zero_block_size() {
        let config = BenchConfig {
            block_size: 0,
            ..valid()
        };
        assert!(matches!(config.validate(4096), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_unaligned_block_size() {
        let config = BenchConfig {
            block_size: 4096 + 512,
            ..valid()
        };
        assert!(matches!(config.validate(4096), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_file_smaller_than_block() {
        let config = BenchConfig {
            file_size: 2048,
            ..valid()
        };
        assert!(matches!(config.validate(4096), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_zero_threads_or_tasks() {
        let no_threads = BenchConfig {
            threads: 0,
            ..valid()
        };
        assert!(no_threads.validate(4096).is_err());

        let no_tasks = BenchConfig {
            tasks: 0,
            ..valid()
        };
        assert!(no_tasks.validate(4096).is_err());
    }

    #[test]
    fn rejects_read_percentage_above_100() {
        let config = BenchConfig {
            read_percentage: 101,
            ..valid()
        };
        assert!(config.validate(4096).is_err());
    }
}
