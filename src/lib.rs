//! iodrill - raw storage throughput and latency measurement
//!
//! iodrill drives a configurable population of outstanding asynchronous
//! read/write requests against a test file, using direct (unbuffered) IO so
//! results reflect device behavior rather than page-cache effects.
//!
//! # Architecture
//!
//! - **Offset planner**: sequential, random, and mixed-ratio block address
//!   generation covering every block of the file exactly once
//! - **Task engine**: per-thread scheduler holding a fixed number of IO
//!   operations perpetually in flight
//! - **Platform backends**: Linux native AIO and Windows IO completion
//!   ports, plus a portable synchronous fallback
//! - **Block integrity**: optional CRC32 tagging and read-back verification

pub mod bench;
pub mod block;
pub mod config;
pub mod engine;
pub mod error;
pub mod plan;
pub mod stats;
pub mod target;
pub mod task;
pub mod util;

// Re-export the embedding surface
pub use bench::Benchmark;
pub use config::BenchConfig;
pub use error::{Error, Result};
