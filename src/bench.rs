//! Benchmark orchestration.
//!
//! Validates the configuration, initializes the test file exactly once,
//! builds the shared offset plan, runs one task engine per worker thread
//! (inline when a single thread is requested), and tears the file down. The
//! plan is shared by reference — it is immutable for the lifetime of the run,
//! so the workers need no synchronization beyond the first-error cell. Any
//! fatal worker error discards every thread's results: a partially-measured
//! run cannot be trusted for throughput reporting.

use std::sync::OnceLock;
use std::thread;

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::block;
use crate::config::{null_log, BenchConfig, LogFn};
use crate::engine::{create_engine, memory_page_size};
use crate::error::{Error, Result};
use crate::plan::{self, OffsetPlan};
use crate::stats::ThreadReport;
use crate::target::TestFile;
use crate::task::{self, TaskOptions};

pub struct Benchmark {
    config: BenchConfig,
    log: LogFn,
}

impl Benchmark {
    pub fn new(config: BenchConfig) -> Self {
        Benchmark {
            config,
            log: null_log(),
        }
    }

    /// Installs a message sink for progress logging.
    pub fn set_log_fn(&mut self, log: LogFn) {
        self.log = log;
    }

    /// Runs the configured workload and returns one report per thread.
    ///
    /// Configuration and file-initialization failures abort before any
    /// worker starts. A fatal error inside any worker discards all results
    /// and surfaces the first such error.
    pub fn execute(&self) -> Result<Vec<ThreadReport>> {
        let page_size = memory_page_size() as u64;
        self.config.validate(page_size)?;

        let cpus = num_cpus::get();
        if self.config.threads as usize > cpus {
            (self.log)(&format!(
                "{} threads oversubscribe {} available CPUs",
                self.config.threads, cpus
            ));
        }

        let plan = plan::build(
            self.config.file_size,
            self.config.block_size,
            self.config.io_type,
            self.config.read_percentage,
            self.config.random_access,
            page_size,
        )?;

        (self.log)("Initialization...");
        let mut template = vec![0u8; self.config.block_size as usize];
        block::fill(
            &mut Xoshiro256PlusPlus::from_entropy(),
            &mut template,
            self.config.crc,
        );
        let file = TestFile::initialize(
            &self.config.file_name,
            self.config.direct,
            self.config.file_size,
            &template,
            self.config.reuse_file,
        )?;

        (self.log)("Start test threads");
        let starts = start_indices(
            plan.len(),
            self.config.threads as usize,
            self.config.unaligned_offsets,
        );
        let first_error: OnceLock<Error> = OnceLock::new();
        let mut reports = Vec::with_capacity(starts.len());

        if starts.len() == 1 {
            // No spawn overhead for the trivial case.
            reports.push(self.run_worker(&file, &plan, starts[0], &first_error));
        } else {
            thread::scope(|scope| {
                let handles: Vec<_> = starts
                    .iter()
                    .map(|&start| {
                        let file = &file;
                        let plan = &plan;
                        let cell = &first_error;
                        scope.spawn(move || self.run_worker(file, plan, start, cell))
                    })
                    .collect();
                for handle in handles {
                    let report = handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
                    reports.push(report);
                }
            });
        }
        (self.log)("Test threads finished");

        file.close();

        if let Some(error) = first_error.into_inner() {
            return Err(error);
        }
        Ok(reports)
    }

    fn run_worker(
        &self,
        file: &TestFile,
        plan: &OffsetPlan,
        start_index: usize,
        first_error: &OnceLock<Error>,
    ) -> ThreadReport {
        (self.log)("Task thread started");
        let mut engine = create_engine(self.config.engine);
        let opts = TaskOptions {
            queue_depth: self.config.tasks as usize,
            seconds: self.config.seconds,
            crc: self.config.crc,
            start_index,
        };
        let report = match task::run_tasks(engine.as_mut(), file, plan, &opts) {
            Ok(report) => report,
            Err(error) => {
                // Only the first fatal error is kept.
                let _ = first_error.set(error);
                ThreadReport::failed()
            }
        };
        (self.log)("Task thread finished");
        report
    }
}

/// Starting plan index per thread. With unaligned starts, thread k begins
/// `k * planLen / threads` entries into the plan to desynchronize the
/// threads' access patterns.
fn start_indices(plan_len: usize, threads: usize, unaligned: bool) -> Vec<usize> {
    let stride = if unaligned { plan_len / threads } else { 0 };
    (0..threads).map(|k| k * stride).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineKind;
    use crate::plan::IoType;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    const BLOCK: u64 = 4096;

    fn config(dir: &TempDir, io_type: IoType, blocks: u64) -> BenchConfig {
        BenchConfig {
            io_type,
            file_name: dir.path().join("bench.dat"),
            file_size: blocks * BLOCK,
            block_size: BLOCK,
            tasks: 8,
            direct: false,
            engine: EngineKind::Sync,
            ..BenchConfig::default()
        }
    }

    #[test]
    fn write_pass_completes_every_block() {
        let dir = TempDir::new().unwrap();
        let bench = Benchmark::new(config(&dir, IoType::Write, 256));
        let reports = bench.execute().unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].write_ops, 256);
        assert_eq!(reports[0].read_ops, 0);
        assert_eq!(reports[0].bytes_transferred, 256 * BLOCK);
        assert!(!reports[0].failed);
    }

    #[test]
    fn each_thread_runs_a_full_pass() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, IoType::Read, 64);
        cfg.threads = 4;
        let reports = Benchmark::new(cfg).execute().unwrap();

        assert_eq!(reports.len(), 4);
        for report in &reports {
            assert_eq!(report.read_ops, 64);
            assert!(!report.failed);
        }
    }

    #[test]
    fn crc_round_trip_verifies() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, IoType::ReadWrite, 64);
        cfg.crc = true;
        cfg.read_percentage = 50;
        let reports = Benchmark::new(cfg).execute().unwrap();

        assert_eq!(reports[0].read_ops, 32);
        assert_eq!(reports[0].write_ops, 32);
    }

    #[test]
    fn corrupted_file_yields_total_failure() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, IoType::Read, 16);
        cfg.crc = true;
        cfg.reuse_file = true;

        // An existing file of matching size but without CRC tags: every
        // read-back fails verification.
        fs::write(&cfg.file_name, vec![0u8; 16 * BLOCK as usize]).unwrap();

        let result = Benchmark::new(cfg).execute();
        assert!(matches!(result, Err(Error::Integrity { .. })));
    }

    #[test]
    fn validation_rejects_before_touching_disk() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, IoType::Write, 16);
        cfg.block_size = BLOCK + 1;

        let result = Benchmark::new(cfg.clone()).execute();
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(!cfg.file_name.exists());
    }

    #[test]
    fn reused_file_survives_the_run() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, IoType::Write, 16);
        cfg.reuse_file = true;

        Benchmark::new(cfg.clone()).execute().unwrap();
        assert!(cfg.file_name.exists());

        // Second run reuses it in place.
        Benchmark::new(cfg.clone()).execute().unwrap();
        assert!(cfg.file_name.exists());
    }

    #[test]
    fn file_is_removed_without_reuse() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, IoType::Write, 16);
        let path = cfg.file_name.clone();

        Benchmark::new(cfg).execute().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn log_sink_receives_messages() {
        let dir = TempDir::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&counter);

        let mut bench = Benchmark::new(config(&dir, IoType::Write, 16));
        bench.set_log_fn(Arc::new(move |_| {
            observed.fetch_add(1, Ordering::Relaxed);
        }));
        bench.execute().unwrap();

        assert!(counter.load(Ordering::Relaxed) >= 4);
    }

    #[test]
    fn unaligned_starts_stride_evenly() {
        assert_eq!(start_indices(1000, 4, true), vec![0, 250, 500, 750]);
        assert_eq!(start_indices(1000, 4, false), vec![0, 0, 0, 0]);
        assert_eq!(start_indices(10, 3, true), vec![0, 3, 6]);
        assert_eq!(start_indices(5, 1, true), vec![0]);
    }
}
