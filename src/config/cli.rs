//! CLI argument parsing using clap.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use super::BenchConfig;
use crate::engine::EngineKind;
use crate::plan::IoType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IoTypeArg {
    /// Read-only workload
    R,
    /// Write-only workload
    W,
    /// Mixed read/write workload
    Rw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineArg {
    /// Native asynchronous backend for this platform
    Platform,
    /// Portable synchronous fallback
    Sync,
}

/// iodrill - raw storage throughput and latency measurement
#[derive(Parser, Debug)]
#[command(name = "iodrill")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Duration of the test in seconds (0 = exactly one full file pass)
    #[arg(short = 's', long, default_value = "0")]
    pub seconds: u32,

    /// IO test type
    #[arg(short = 'i', long = "io_type", value_enum)]
    pub io_type: IoTypeArg,

    /// Read percentage for mixed workloads (0-100)
    #[arg(short = 'p', long = "read_percentage", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub read_percentage: Option<u8>,

    /// Write percentage for mixed workloads (0-100); complement of the read share
    #[arg(short = 'w', long = "write_percentage", value_parser = clap::value_parser!(u8).range(0..=100), conflicts_with = "read_percentage")]
    pub write_percentage: Option<u8>,

    /// Random instead of sequential block order
    #[arg(short = 'r', long)]
    pub random: bool,

    /// Phase-shift each thread's starting offset to avoid lock-step access
    #[arg(short = 'u', long)]
    pub unaligned: bool,

    /// Number of worker threads
    #[arg(short = 't', long = "thread", default_value = "1")]
    pub threads: u32,

    /// Number of outstanding IO operations per thread
    #[arg(short = 'o', long = "task", default_value = "1")]
    pub tasks: u32,

    /// Path of the file to use for the test
    #[arg(short = 'n', long = "file_name")]
    pub file_name: PathBuf,

    /// Size of the test file in MB
    #[arg(short = 'z', long = "file_size")]
    pub file_size_mb: u64,

    /// Size of each IO block in KB
    #[arg(short = 'b', long = "block_size")]
    pub block_size_kb: u64,

    /// Tag written blocks with a CRC32 and verify it on read-back
    #[arg(short = 'c', long)]
    pub crc: bool,

    /// Reuse an existing test file and keep it after the run
    #[arg(long)]
    pub reuse: bool,

    /// Use buffered IO instead of direct (unbuffered) IO
    #[arg(long)]
    pub buffered: bool,

    /// IO backend
    #[arg(long, value_enum, default_value = "platform")]
    pub engine: EngineArg,

    /// Show log messages
    #[arg(short = 'l', long)]
    pub log: bool,

    /// Emit the results as JSON
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Converts parsed arguments into a core configuration.
    pub fn to_config(&self) -> BenchConfig {
        let read_percentage = match (self.read_percentage, self.write_percentage) {
            (Some(read), _) => read,
            (None, Some(write)) => 100 - write,
            (None, None) => 50,
        };

        BenchConfig {
            io_type: match self.io_type {
                IoTypeArg::R => IoType::Read,
                IoTypeArg::W => IoType::Write,
                IoTypeArg::Rw => IoType::ReadWrite,
            },
            seconds: self.seconds,
            read_percentage,
            random_access: self.random,
            unaligned_offsets: self.unaligned,
            threads: self.threads,
            tasks: self.tasks,
            file_name: self.file_name.clone(),
            file_size: self.file_size_mb * 1024 * 1024,
            block_size: self.block_size_kb * 1024,
            crc: self.crc,
            reuse_file: self.reuse,
            direct: !self.buffered,
            engine: match self.engine {
                EngineArg::Platform => EngineKind::Platform,
                EngineArg::Sync => EngineKind::Sync,
            },
        }
    }
}
