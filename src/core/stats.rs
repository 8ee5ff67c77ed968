//! Benchmark statistics
//!
//! Computed over the full record sequence after a run; the records
//! themselves are never altered. Latency percentiles come from an HDR
//! histogram of successful samples at microsecond resolution.

use std::collections::BTreeMap;

use hdrhistogram::Histogram;
use serde::Serialize;

use crate::core::adapter::BackendId;
use crate::core::benchmark::{BenchmarkOutcome, BenchmarkRecord};
use crate::core::coords::{CoordinatePair, PairKey};
use crate::core::mode::Mode;

/// Latency distribution in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub min_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub stddev_ms: f64,
    /// Coefficient of variation
    pub cv_percent: f64,
}

/// Aggregate view of one (backend, pair, mode) record series
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkSummary {
    pub backend: BackendId,
    pub pair: CoordinatePair,
    pub mode: Mode,
    pub rounds: usize,
    /// Records that were attempted and did not succeed
    pub failures: usize,
    pub skipped: usize,
    pub failure_rate: f64,
    /// `None` when no attempt succeeded
    pub latency: Option<LatencyStats>,
    pub mean_cpu_ms: f64,
    pub mean_payload_bytes: f64,
    /// Mean payload bytes per millisecond of latency
    pub bytes_per_ms: Option<f64>,
}

/// Failed share of attempted (non-skipped) records; 0 for an empty series
pub fn failure_rate(records: &[BenchmarkRecord]) -> f64 {
    let attempted = records
        .iter()
        .filter(|r| r.outcome != BenchmarkOutcome::Skipped)
        .count();
    if attempted == 0 {
        return 0.0;
    }
    let failed = records
        .iter()
        .filter(|r| r.outcome != BenchmarkOutcome::Skipped && !r.is_success())
        .count();
    failed as f64 / attempted as f64
}

/// Latency statistics over the successful records, `None` if there are none
pub fn latency_stats(records: &[BenchmarkRecord]) -> Option<LatencyStats> {
    // Three significant digits; auto-resizing keeps very slow samples
    let mut hist = Histogram::<u64>::new(3).ok()?;
    for record in records.iter().filter(|r| r.is_success()) {
        let micros = (record.latency.as_micros() as u64).max(1);
        hist.record(micros).ok()?;
    }
    if hist.is_empty() {
        return None;
    }

    let ms = |micros: u64| micros as f64 / 1000.0;
    let mean_ms = hist.mean() / 1000.0;
    let stddev_ms = hist.stdev() / 1000.0;
    Some(LatencyStats {
        min_ms: ms(hist.min()),
        p50_ms: ms(hist.value_at_quantile(0.50)),
        p90_ms: ms(hist.value_at_quantile(0.90)),
        p95_ms: ms(hist.value_at_quantile(0.95)),
        p99_ms: ms(hist.value_at_quantile(0.99)),
        max_ms: ms(hist.max()),
        mean_ms,
        stddev_ms,
        cv_percent: if mean_ms > 0.0 { stddev_ms / mean_ms * 100.0 } else { 0.0 },
    })
}

/// Group records by (backend, pair, mode) and summarize each series
pub fn summarize(records: &[BenchmarkRecord]) -> Vec<BenchmarkSummary> {
    let mut groups: BTreeMap<(BackendId, PairKey, Mode), Vec<BenchmarkRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.backend.clone(), record.pair.key(), record.mode))
            .or_default()
            .push(record.clone());
    }

    groups
        .into_values()
        .filter_map(|series| {
            let first = series.first()?;
            let successes: Vec<&BenchmarkRecord> = series.iter().filter(|r| r.is_success()).collect();
            let skipped = series
                .iter()
                .filter(|r| r.outcome == BenchmarkOutcome::Skipped)
                .count();

            let mean = |values: Vec<f64>| {
                if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            };
            let mean_cpu_ms = mean(successes.iter().map(|r| r.cpu_time.as_secs_f64() * 1000.0).collect());
            let mean_payload_bytes = mean(successes.iter().map(|r| r.payload_bytes as f64).collect());
            let latency = latency_stats(&series);
            let bytes_per_ms = latency
                .as_ref()
                .filter(|l| l.mean_ms > 0.0)
                .map(|l| mean_payload_bytes / l.mean_ms);

            Some(BenchmarkSummary {
                backend: first.backend.clone(),
                pair: first.pair.clone(),
                mode: first.mode,
                rounds: series.len(),
                failures: series.len() - successes.len() - skipped,
                skipped,
                failure_rate: failure_rate(&series),
                latency,
                mean_cpu_ms,
                mean_payload_bytes,
                bytes_per_ms,
            })
        })
        .collect()
}
