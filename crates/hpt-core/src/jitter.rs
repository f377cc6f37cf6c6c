//! Histogram-based jitter collector for timer ticks.
//!
//! Each tick reports a jump ratio (actual interval over nominal interval) and
//! the elapsed counter ticks. The collector keeps a fixed histogram of jump
//! ratios plus running sums, and on demand reports min, max, mean, and
//! percentiles (p50, p90, p99), along with the number of ticks that landed
//! off schedule by more than a tolerance.
//!
//! The histogram uses 0.001-wide bins up to a ratio of 3.0 (3000 bins).
//! Ratios above 3.0 are clamped to the last bin.

/// Width of each histogram bin, in jump-ratio units.
const BIN_WIDTH: f64 = 0.001;

/// Number of histogram bins (covers ratios 0.0–3.0).
const NUM_BINS: usize = 3000;

/// Tolerance used by the benchmark: a tick more than 10% off is late/early.
pub const DEFAULT_TOLERANCE: f64 = 0.1;

/// Computed jitter statistics.
#[derive(Debug, Clone, Copy)]
pub struct JitterStats {
    pub count: u64,
    pub off_schedule: u64,
    pub min_ratio: f64,
    pub max_ratio: f64,
    pub mean_ratio: f64,
    pub mean_elapsed_ticks: f64,
    pub p50_ratio: f64,
    pub p90_ratio: f64,
    pub p99_ratio: f64,
}

impl std::fmt::Display for JitterStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "n={} off={} min={:.4} max={:.4} mean={:.4} p50={:.3} p90={:.3} p99={:.3} ticks={:.1}",
            self.count,
            self.off_schedule,
            self.min_ratio,
            self.max_ratio,
            self.mean_ratio,
            self.p50_ratio,
            self.p90_ratio,
            self.p99_ratio,
            self.mean_elapsed_ticks,
        )
    }
}

/// A histogram-based jitter collector.
///
/// Not thread-safe; each tick handler should own its own instance.
pub struct JitterCollector {
    bins: Vec<u64>,
    tolerance: f64,
    count: u64,
    off_schedule: u64,
    ratio_sum: f64,
    elapsed_sum: i128,
    min: f64,
    max: f64,
}

impl JitterCollector {
    /// Create a new, empty collector with the default 10% tolerance.
    pub fn new() -> Self {
        Self::with_tolerance(DEFAULT_TOLERANCE)
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            bins: vec![0u64; NUM_BINS],
            tolerance: tolerance.abs(),
            count: 0,
            off_schedule: 0,
            ratio_sum: 0.0,
            elapsed_sum: 0,
            min: f64::MAX,
            max: 0.0,
        }
    }

    /// Record one tick.
    #[inline]
    pub fn record(&mut self, jump_ratio: f64, elapsed_ticks: i64) {
        self.count += 1;
        self.ratio_sum += jump_ratio;
        self.elapsed_sum += i128::from(elapsed_ticks);
        self.min = self.min.min(jump_ratio);
        self.max = self.max.max(jump_ratio);

        if (jump_ratio - 1.0).abs() > self.tolerance {
            self.off_schedule += 1;
        }

        let bin = (jump_ratio.max(0.0) / BIN_WIDTH) as usize;
        let bin = bin.min(NUM_BINS - 1);
        self.bins[bin] += 1;
    }

    /// Returns the number of recorded ticks.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Ticks whose ratio deviated from 1.0 by more than the tolerance.
    pub fn off_schedule(&self) -> u64 {
        self.off_schedule
    }

    /// Compute summary statistics. Returns `None` if no ticks recorded.
    pub fn stats(&self) -> Option<JitterStats> {
        if self.count == 0 {
            return None;
        }

        Some(JitterStats {
            count: self.count,
            off_schedule: self.off_schedule,
            min_ratio: self.min,
            max_ratio: self.max,
            mean_ratio: self.ratio_sum / self.count as f64,
            mean_elapsed_ticks: self.elapsed_sum as f64 / self.count as f64,
            p50_ratio: self.percentile(0.50),
            p90_ratio: self.percentile(0.90),
            p99_ratio: self.percentile(0.99),
        })
    }

    /// Reset all counters and bins.
    pub fn reset(&mut self) {
        self.bins.fill(0);
        self.count = 0;
        self.off_schedule = 0;
        self.ratio_sum = 0.0;
        self.elapsed_sum = 0;
        self.min = f64::MAX;
        self.max = 0.0;
    }

    /// Compute the ratio at the given percentile (0.0–1.0).
    fn percentile(&self, pct: f64) -> f64 {
        let target = (self.count as f64 * pct).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, &count) in self.bins.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return i as f64 * BIN_WIDTH;
            }
        }
        self.max
    }
}

impl Default for JitterCollector {
    fn default() -> Self {
        Self::new()
    }
}
