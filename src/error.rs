//! Error taxonomy for a benchmark run.
//!
//! Errors fall into two tiers: configuration and file-initialization failures
//! abort the run before any worker thread starts, while submission, completion,
//! and integrity failures are fatal to the worker thread that observed them.
//! The orchestrator keeps only the first fatal error and discards all thread
//! results once any is recorded.

use std::io;

use thiserror::Error;

/// Result type used throughout iodrill.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before any IO is issued. Never retried.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Creating, sizing, or opening the test file failed. Aborts the whole
    /// run before any worker thread starts.
    #[error("test file initialization failed: {source}")]
    FileInit {
        #[source]
        source: io::Error,
    },

    /// The backend rejected a submission (queue full, invalid handle).
    #[error("{op} submit failed at offset {offset}: {source}")]
    Submit {
        op: &'static str,
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// A completed operation reported an error status or a short transfer.
    #[error("{op} completion failed: {source}")]
    Completion {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// CRC mismatch on read-back: silent corruption or misdirected IO.
    #[error("block integrity check failed at offset {offset}")]
    Integrity { offset: u64 },
}

impl Error {
    /// Builds the completion error for a transfer that moved fewer bytes
    /// than requested.
    pub fn short_transfer(op: &'static str, expected: usize, got: usize) -> Self {
        Error::Completion {
            op,
            source: io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short transfer: {got} of {expected} bytes"),
            ),
        }
    }
}
