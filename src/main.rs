//! iodrill CLI entry point

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use iodrill::config::cli::Cli;
use iodrill::config::BenchConfig;
use iodrill::plan::IoType;
use iodrill::stats::{LatencyHistogram, ThreadReport};
use iodrill::Benchmark;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.to_config();

    let mut benchmark = Benchmark::new(config.clone());
    if cli.log {
        benchmark.set_log_fn(Arc::new(|message| println!("{message}")));
    }

    if !cli.json {
        println!("Start benchmark...");
    }

    let reports = match benchmark.execute() {
        Ok(reports) => reports,
        Err(error) => {
            eprintln!("{error}");
            eprintln!("Operation failed");
            std::process::exit(1);
        }
    };

    if cli.json {
        print_json(&config, &reports).context("failed to render JSON report")?;
    } else {
        print_text(&reports);
    }
    Ok(())
}

fn print_text(reports: &[ThreadReport]) {
    let mut total_bytes = 0u64;
    let mut elapsed = Duration::ZERO;
    let mut latency = LatencyHistogram::new();

    for report in reports {
        println!(
            "Read ops: {} - Write ops: {} - Total read/write (KB): {}",
            report.read_ops,
            report.write_ops,
            report.bytes_transferred / 1024
        );
        total_bytes += report.bytes_transferred;
        elapsed = elapsed.max(report.duration);
        latency.merge(&report.latency);
    }

    let seconds = elapsed.as_secs_f64();
    if total_bytes > 0 && seconds > 0.0 {
        let total_ops: u64 = reports.iter().map(|r| r.total_ops()).sum();
        println!(
            "MB/s {:.2}",
            total_bytes as f64 / (1024.0 * 1024.0) / seconds
        );
        println!("IOPS {:.0}", total_ops as f64 / seconds);
        if !latency.is_empty() {
            println!(
                "Latency us (mean/p99/max): {:.1}/{}/{}",
                latency.mean_us(),
                latency.percentile_us(99.0),
                latency.max_us()
            );
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    timestamp: String,
    config: JsonConfig<'a>,
    threads: Vec<JsonThread>,
    totals: JsonTotals,
}

#[derive(Serialize)]
struct JsonConfig<'a> {
    io_type: &'a str,
    seconds: u32,
    threads: u32,
    tasks: u32,
    file_size_bytes: u64,
    block_size_bytes: u64,
    random_access: bool,
    crc: bool,
    direct: bool,
}

#[derive(Serialize)]
struct JsonThread {
    duration_ms: u128,
    read_ops: u64,
    write_ops: u64,
    bytes_transferred: u64,
    latency_mean_us: f64,
    latency_p50_us: u64,
    latency_p99_us: u64,
    latency_max_us: u64,
}

#[derive(Serialize)]
struct JsonTotals {
    bytes_transferred: u64,
    read_ops: u64,
    write_ops: u64,
    throughput_mb_s: f64,
    iops: f64,
}

fn print_json(config: &BenchConfig, reports: &[ThreadReport]) -> Result<()> {
    let threads: Vec<JsonThread> = reports
        .iter()
        .map(|report| JsonThread {
            duration_ms: report.duration.as_millis(),
            read_ops: report.read_ops,
            write_ops: report.write_ops,
            bytes_transferred: report.bytes_transferred,
            latency_mean_us: report.latency.mean_us(),
            latency_p50_us: report.latency.percentile_us(50.0),
            latency_p99_us: report.latency.percentile_us(99.0),
            latency_max_us: report.latency.max_us(),
        })
        .collect();

    let total_bytes: u64 = reports.iter().map(|r| r.bytes_transferred).sum();
    let read_ops: u64 = reports.iter().map(|r| r.read_ops).sum();
    let write_ops: u64 = reports.iter().map(|r| r.write_ops).sum();
    let elapsed = reports
        .iter()
        .map(|r| r.duration)
        .max()
        .unwrap_or(Duration::ZERO);
    let seconds = elapsed.as_secs_f64();

    let report = JsonReport {
        timestamp: chrono::Utc::now().to_rfc3339(),
        config: JsonConfig {
            io_type: match config.io_type {
                IoType::Read => "read",
                IoType::Write => "write",
                IoType::ReadWrite => "readwrite",
            },
            seconds: config.seconds,
            threads: config.threads,
            tasks: config.tasks,
            file_size_bytes: config.file_size,
            block_size_bytes: config.block_size,
            random_access: config.random_access,
            crc: config.crc,
            direct: config.direct,
        },
        threads,
        totals: JsonTotals {
            bytes_transferred: total_bytes,
            read_ops,
            write_ops,
            throughput_mb_s: if seconds > 0.0 {
                total_bytes as f64 / (1024.0 * 1024.0) / seconds
            } else {
                0.0
            },
            iops: if seconds > 0.0 {
                (read_ops + write_ops) as f64 / seconds
            } else {
                0.0
            },
        },
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
