use std::io::{self, Write};

use crate::controller::RunState;
use crate::models::{Report, RunConfig};
use crate::stats::AggregateStats;

/// Round to two decimal places for presentation
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Derive the presented metrics of a run
pub fn build_report(config: &RunConfig, state: &RunState, stats: &AggregateStats) -> Report {
    let total = state.total;
    let elapsed = state.elapsed().as_secs_f64();

    let success_rate = if total > 0 {
        100.0 * stats.success as f64 / total as f64
    } else {
        0.0
    };

    let qps = if elapsed > 0.0 {
        total as f64 / elapsed
    } else {
        0.0
    };

    Report {
        target_url: config.request.target_url.trim().to_string(),
        method: config.request.method,
        concurrency: state.concurrency,
        total_requests: total,
        completed: state.completed,
        success: stats.success,
        failure: stats.failure,
        stopped: state.stopped,
        started_at: state.started_at,
        elapsed_secs: round2(elapsed),
        success_rate: round2(success_rate),
        qps: round2(qps),
        avg_latency_ms: round2(stats.avg_latency_ms()),
        min_latency_ms: round2(stats.min_latency_ms()),
        max_latency_ms: round2(stats.max_latency_ms()),
        status_codes: stats.status_codes.clone(),
    }
}

/// Write a human readable summary
pub fn write_text_report<W: Write>(report: &Report, writer: &mut W) -> io::Result<()> {
    writeln!(writer, "Target:\t\t{} {}", report.method, report.target_url)?;
    if let Some(started_at) = report.started_at {
        writeln!(writer, "Started:\t{}", started_at.to_rfc3339())?;
    }
    writeln!(writer, "Concurrency:\t{}", report.concurrency)?;
    writeln!(
        writer,
        "Requests:\t{} (completed {}{})",
        report.total_requests,
        report.completed,
        if report.stopped { ", stopped" } else { "" }
    )?;
    writeln!(writer, "Duration:\t{:.2}s", report.elapsed_secs)?;
    writeln!(writer, "Success:\t{}", report.success)?;
    writeln!(writer, "Failure:\t{}", report.failure)?;
    writeln!(writer, "Success rate:\t{:.2}%", report.success_rate)?;
    writeln!(writer, "QPS:\t\t{:.2} req/s", report.qps)?;
    writeln!(
        writer,
        "Latency:\tavg {:.2}ms | min {:.2}ms | max {:.2}ms",
        report.avg_latency_ms, report.min_latency_ms, report.max_latency_ms
    )?;

    let codes: Vec<String> = report
        .status_codes
        .iter()
        .map(|(key, count)| format!("{}={}", key, count))
        .collect();
    writeln!(writer, "Status codes:\t{}", codes.join(" "))?;

    Ok(())
}

/// Write the report as pretty JSON
pub fn write_json_report<W: Write>(report: &Report, writer: &mut W) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, report)?;
    writeln!(writer)
}
