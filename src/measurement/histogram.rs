//! Power-of-two latency histogram.

use serde::{Deserialize, Serialize};

/// Number of buckets. Bucket `i` covers `[2^i, 2^(i+1))` nanoseconds.
pub const BUCKETS: usize = 32;

/// Bucket index for a sample: `floor(log2(ns))`, clamped to the bucket range.
///
/// A zero sample (a stale read in posted mode) lands in bucket 0 along with
/// 1 ns. Anything at or above `2^31` ns lands in the last bucket.
#[inline]
pub fn bucket_index(ns: u64) -> usize {
    match ns.checked_ilog2() {
        Some(log) => (log as usize).min(BUCKETS - 1),
        None => 0,
    }
}

/// Fixed-size log2 histogram of per-call latencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log2Histogram {
    buckets: [u64; BUCKETS],
}

impl Log2Histogram {
    /// Create an empty histogram.
    pub fn new() -> Self {
        Self {
            buckets: [0; BUCKETS],
        }
    }

    /// Count one sample.
    #[inline]
    pub fn record(&mut self, sample_ns: u64) {
        let bucket = &mut self.buckets[bucket_index(sample_ns)];
        *bucket = bucket.saturating_add(1);
    }

    /// Count in bucket `i`, or 0 if `i` is out of range.
    pub fn count(&self, i: usize) -> u64 {
        self.buckets.get(i).copied().unwrap_or(0)
    }

    /// Sum of all buckets.
    pub fn total(&self) -> u64 {
        self.buckets.iter().sum()
    }

    /// Raw bucket counts.
    pub fn buckets(&self) -> &[u64; BUCKETS] {
        &self.buckets
    }

    /// Index of the fullest bucket, or `None` if empty.
    pub fn mode(&self) -> Option<usize> {
        if self.total() == 0 {
            return None;
        }
        self.buckets
            .iter()
            .enumerate()
            .max_by_key(|(i, count)| (**count, std::cmp::Reverse(*i)))
            .map(|(i, _)| i)
    }

    /// Iterate over `(2^i, count)` pairs, the form the textual report prints.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.buckets
            .iter()
            .enumerate()
            .map(|(i, count)| (1u64 << i, *count))
    }
}

impl Default for Log2Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(1), 0);
        assert_eq!(bucket_index(2), 1);
        assert_eq!(bucket_index(3), 1);
        assert_eq!(bucket_index(4), 2);
        assert_eq!(bucket_index(500), 8);
        assert_eq!(bucket_index(511), 8);
        assert_eq!(bucket_index(512), 9);
    }

    #[test]
    fn test_large_samples_clamp_to_last_bucket() {
        assert_eq!(bucket_index(1 << 31), 31);
        assert_eq!(bucket_index((1 << 32) - 1), 31);
        assert_eq!(bucket_index(1 << 32), 31);
        assert_eq!(bucket_index(u64::MAX), 31);

        let mut hist = Log2Histogram::new();
        hist.record(u64::MAX);
        hist.record(5_000_000_000);
        assert_eq!(hist.count(31), 2);
        assert_eq!(hist.total(), 2);
    }

    #[test]
    fn test_total_tracks_records() {
        let mut hist = Log2Histogram::new();
        for ns in [1, 2, 3, 100, 1_000, 10_000, 0] {
            hist.record(ns);
        }
        assert_eq!(hist.total(), 7);
        assert_eq!(hist.count(0), 2);
        assert_eq!(hist.count(1), 2);
        assert_eq!(hist.count(6), 1);
        assert_eq!(hist.count(99), 0);
    }

    #[test]
    fn test_mode() {
        let mut hist = Log2Histogram::new();
        assert_eq!(hist.mode(), None);
        hist.record(600);
        hist.record(700);
        hist.record(3);
        assert_eq!(hist.mode(), Some(9));
    }

    #[test]
    fn test_iter_labels() {
        let hist = Log2Histogram::new();
        let labels: Vec<u64> = hist.iter().map(|(label, _)| label).collect();
        assert_eq!(labels.len(), BUCKETS);
        assert_eq!(labels[0], 1);
        assert_eq!(labels[8], 256);
        assert_eq!(labels[31], 1 << 31);
    }
}
