//! Progress tracking for the pair emission loop.
//!
//! Logs progress when the count crosses interval boundaries and a final
//! summary with the overall rate. The matcher is a single-threaded pull
//! generator, so no synchronization is needed.

use log::info;
use std::time::Instant;

use crate::logging::{format_count, format_duration};

/// Logs progress at regular count intervals.
///
/// # Example
/// ```
/// use remate_lib::progress::ProgressTracker;
///
/// let mut tracker = ProgressTracker::new("emitted pairs").with_interval(1_000);
/// for _ in 0..2_500 {
///     tracker.record(1); // logs at 1,000 and 2,000
/// }
/// tracker.log_final(); // logs "emitted pairs: 2,500 ... (complete)"
/// ```
pub struct ProgressTracker {
    message: String,
    interval: u64,
    count: u64,
    started: Instant,
}

impl ProgressTracker {
    /// Create a tracker with a default interval of 1,000,000.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), interval: 1_000_000, count: 0, started: Instant::now() }
    }

    /// Override the logging interval.
    ///
    /// # Panics
    ///
    /// If `interval` is zero.
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        assert!(interval > 0, "interval must be positive");
        self.interval = interval;
        self
    }

    /// Add `n` items, logging if an interval boundary was crossed.
    pub fn record(&mut self, n: u64) {
        let before = self.count / self.interval;
        self.count += n;
        if self.count / self.interval > before {
            let elapsed = self.started.elapsed();
            info!(
                "{}: {} in {} ({}/s)",
                self.message,
                format_count(self.count),
                format_duration(elapsed),
                format_count(self.rate(elapsed.as_secs_f64()))
            );
        }
    }

    /// Current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Log the final count and rate.
    pub fn log_final(&self) {
        let elapsed = self.started.elapsed();
        info!(
            "{}: {} in {} ({}/s, complete)",
            self.message,
            format_count(self.count),
            format_duration(elapsed),
            format_count(self.rate(elapsed.as_secs_f64()))
        );
    }

    fn rate(&self, elapsed_secs: f64) -> u64 {
        if elapsed_secs > 0.0 {
            (self.count as f64 / elapsed_secs) as u64
        } else {
            0
        }
    }
}
