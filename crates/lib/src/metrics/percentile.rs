//! Values the aggregator derives locally from fetched rows.

use serde_json::Value;

/// Latency at the 50th and 95th percentile; both absent without samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyPercentiles {
    pub p50: Option<f64>,
    pub p95: Option<f64>,
}

/// Numeric `meta.latency_ms` values of the sampled rows. Anything non-numeric is dropped.
pub fn latency_samples(rows: &[Value]) -> Vec<f64> {
    rows.iter()
        .filter_map(|row| row.get("meta")?.get("latency_ms")?.as_f64())
        .filter(|n| n.is_finite())
        .collect()
}

/// Nearest-rank value at `floor(n * q)`, or the largest sample when that index is past the end.
fn nearest_rank(sorted: &[f64], q: f64) -> Option<f64> {
    let idx = (sorted.len() as f64 * q).floor() as usize;
    sorted.get(idx).or_else(|| sorted.last()).copied()
}

pub fn latency_percentiles(mut samples: Vec<f64>) -> LatencyPercentiles {
    if samples.is_empty() {
        return LatencyPercentiles::default();
    }
    samples.sort_by(f64::total_cmp);
    LatencyPercentiles {
        p50: nearest_rank(&samples, 0.5),
        p95: nearest_rank(&samples, 0.95),
    }
}

/// Percentage of visitors who were seen before the window, rounded to one decimal.
/// No visitors means 0.
pub fn returning_rate(returning: u64, visitors: u64) -> f64 {
    let rate = returning as f64 / visitors.max(1) as f64 * 100.0;
    (rate * 10.0).round() / 10.0
}
