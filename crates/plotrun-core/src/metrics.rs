//! Rolling step-duration samples.

use std::collections::VecDeque;

use serde::Serialize;

/// Summary of the retained samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub count: usize,
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
}

/// Keeps the most recent `window` step durations.
#[derive(Debug, Clone)]
pub struct DurationSamples {
    window: usize,
    samples: VecDeque<u64>,
}

impl DurationSamples {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window.min(4096)),
        }
    }

    pub fn record(&mut self, duration_ms: u64) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(duration_ms);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Nearest-rank percentiles over the retained window.
    pub fn snapshot(&self) -> MetricsSnapshot {
        if self.samples.is_empty() {
            return MetricsSnapshot::default();
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        MetricsSnapshot {
            count,
            mean_ms: sum as f64 / count as f64,
            p50_ms: percentile(&sorted, 50),
            p95_ms: percentile(&sorted, 95),
            max_ms: sorted[count - 1],
        }
    }
}

impl Default for DurationSamples {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn percentile(sorted: &[u64], pct: usize) -> u64 {
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted[rank - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot() {
        assert_eq!(DurationSamples::default().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn percentiles_and_mean() {
        let mut samples = DurationSamples::new(100);
        for ms in 1..=100 {
            samples.record(ms);
        }
        let snap = samples.snapshot();
        assert_eq!(snap.count, 100);
        assert_eq!(snap.p50_ms, 50);
        assert_eq!(snap.p95_ms, 95);
        assert_eq!(snap.max_ms, 100);
        assert!((snap.mean_ms - 50.5).abs() < 1e-9);
    }

    #[test]
    fn window_drops_oldest() {
        let mut samples = DurationSamples::new(3);
        for ms in [100, 1, 2, 3] {
            samples.record(ms);
        }
        assert_eq!(samples.len(), 3);
        assert_eq!(samples.snapshot().max_ms, 3);
    }
}
