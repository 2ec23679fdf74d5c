//! Windowed statistics over raw samples.

use super::models::{Sample, Stats};

/// Nearest-rank percentile over an ascending slice, no interpolation.
///
/// The index is `floor(len * p)`, clamped to the last element.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (sorted.len() as f64 * p).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Compute stats for the samples of one target. An empty slice yields the
/// zero-valued result.
pub fn compute_stats(target: &str, period_hours: i64, samples: &[Sample]) -> Stats {
    if samples.is_empty() {
        return Stats::empty(target, period_hours);
    }

    let count = samples.len();
    let healthy = samples.iter().filter(|s| s.is_healthy).count();

    let mut latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms).collect();
    latencies.sort_by(|a, b| a.total_cmp(b));
    let avg = latencies.iter().sum::<f64>() / count as f64;

    Stats {
        target: target.to_string(),
        period_hours,
        count,
        uptime: healthy as f64 / count as f64 * 100.0,
        avg_latency_ms: avg,
        p95_latency_ms: percentile(&latencies, 0.95),
        p99_latency_ms: percentile(&latencies, 0.99),
        error_rate: (count - healthy) as f64 / count as f64 * 100.0,
    }
}
