//! Latency sampling for the egress router
//!
//! Records sampled latencies (nanoseconds) into a bounded buffer and
//! computes percentiles on demand. The egress thread records; the metrics
//! reporter reads a summary - both through a mutex held for microseconds.

/// Sampled latency recorder with percentile queries.
#[derive(Debug)]
pub struct LatencyStats {
    samples: Vec<u64>,
    /// Overwrite cursor once the buffer is full.
    cursor: usize,
    max_samples: usize,
    sample_rate: usize,
    sample_counter: usize,
    total_recorded: u64,
}

impl LatencyStats {
    /// `sample_rate` keeps every Nth observation; `max_samples` bounds
    /// memory (oldest samples are overwritten).
    pub fn new(sample_rate: usize, max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            cursor: 0,
            max_samples,
            sample_rate: sample_rate.max(1),
            sample_counter: 0,
            total_recorded: 0,
        }
    }

    /// Record one observation (sampled).
    #[inline]
    pub fn record(&mut self, latency_ns: u64) {
        self.total_recorded += 1;
        self.sample_counter += 1;
        if self.sample_counter < self.sample_rate {
            return;
        }
        self.sample_counter = 0;
        if self.samples.len() < self.max_samples {
            self.samples.push(latency_ns);
        } else {
            self.samples[self.cursor] = latency_ns;
            self.cursor = (self.cursor + 1) % self.max_samples;
        }
    }

    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Percentile over the retained samples (`p` in 0..=100).
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn min(&self) -> Option<u64> {
        self.samples.iter().copied().min()
    }

    pub fn max(&self) -> Option<u64> {
        self.samples.iter().copied().max()
    }

    pub fn avg(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<u64>() / self.samples.len() as u64)
    }

    /// One-line summary for the metrics log.
    pub fn summary(&self) -> Option<String> {
        let min = self.min()?;
        Some(format!(
            "min={}ns avg={}ns p50={}ns p99={}ns max={}ns samples={}",
            min,
            self.avg().unwrap_or(0),
            self.percentile(50.0).unwrap_or(0),
            self.percentile(99.0).unwrap_or(0),
            self.max().unwrap_or(0),
            self.sample_count(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles() {
        let mut stats = LatencyStats::new(1, 1000);
        for i in 1..=100 {
            stats.record(i);
        }
        assert_eq!(stats.min(), Some(1));
        assert_eq!(stats.max(), Some(100));
        let p50 = stats.percentile(50.0).unwrap();
        assert!(p50 == 50 || p50 == 51, "P50 should be ~50, got {}", p50);
        assert_eq!(stats.percentile(99.0), Some(99));
        assert_eq!(stats.total_recorded(), 100);
    }

    #[test]
    fn test_sampling_rate() {
        let mut stats = LatencyStats::new(10, 1000);
        for i in 0..100 {
            stats.record(i);
        }
        assert_eq!(stats.sample_count(), 10);
        assert_eq!(stats.total_recorded(), 100);
    }

    #[test]
    fn test_bounded_buffer_overwrites() {
        let mut stats = LatencyStats::new(1, 4);
        for i in 0..10 {
            stats.record(i);
        }
        assert_eq!(stats.sample_count(), 4);
        assert_eq!(stats.total_recorded(), 10);
        // Oldest samples are gone.
        assert!(stats.min().unwrap() >= 4);
    }

    #[test]
    fn test_empty_summary() {
        let stats = LatencyStats::new(1, 10);
        assert!(stats.summary().is_none());
        assert!(stats.percentile(50.0).is_none());
        assert!(stats.avg().is_none());
    }
}
