//! Running min/max/average over per-call latencies.

use serde::{Deserialize, Serialize};

/// O(1) accumulator updated once per completed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatistics {
    count: u64,
    min_ns: u64,
    max_ns: u64,
    total_ns: u64,
}

/// Final latency figures of a run with at least one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Number of samples.
    pub samples: u64,
    /// Smallest sample in nanoseconds.
    pub min_ns: u64,
    /// Largest sample in nanoseconds.
    pub max_ns: u64,
    /// `total_ns / samples`, rounded down.
    pub avg_ns: u64,
    /// Sum of all samples (saturating).
    pub total_ns: u64,
}

impl RunStatistics {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self {
            count: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            total_ns: 0,
        }
    }

    /// Add one sample.
    #[inline]
    pub fn update(&mut self, sample_ns: u64) {
        self.count += 1;
        self.total_ns = self.total_ns.saturating_add(sample_ns);
        self.min_ns = self.min_ns.min(sample_ns);
        self.max_ns = self.max_ns.max(sample_ns);
    }

    /// Number of samples seen.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Summary figures, or `None` for an empty run.
    pub fn summary(&self) -> Option<LatencySummary> {
        if self.count == 0 {
            return None;
        }
        Some(LatencySummary {
            samples: self.count,
            min_ns: self.min_ns,
            max_ns: self.max_ns,
            avg_ns: self.total_ns / self.count,
            total_ns: self.total_ns,
        })
    }
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_has_no_summary() {
        let stats = RunStatistics::new();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.summary(), None);
    }

    #[test]
    fn test_summary_figures() {
        let mut stats = RunStatistics::new();
        for ns in [700, 300, 500, 501] {
            stats.update(ns);
        }
        let summary = stats.summary().unwrap();
        assert_eq!(summary.samples, 4);
        assert_eq!(summary.min_ns, 300);
        assert_eq!(summary.max_ns, 700);
        assert_eq!(summary.total_ns, 2001);
        assert_eq!(summary.avg_ns, 500);
    }

    #[test]
    fn test_single_sample() {
        let mut stats = RunStatistics::new();
        stats.update(0);
        let summary = stats.summary().unwrap();
        assert_eq!((summary.min_ns, summary.max_ns, summary.avg_ns), (0, 0, 0));
    }

    #[test]
    fn test_total_saturates() {
        let mut stats = RunStatistics::new();
        stats.update(u64::MAX);
        stats.update(10);
        let summary = stats.summary().unwrap();
        assert_eq!(summary.total_ns, u64::MAX);
        assert_eq!(summary.min_ns, 10);
        assert!(summary.min_ns <= summary.avg_ns && summary.avg_ns <= summary.max_ns);
    }
}
